use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Environment type for configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn from_str(env: &str) -> Self {
        match env.to_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub environment: Environment,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub dist: DistConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Suppress server-error logging.
    #[serde(default)]
    pub quiet: bool,

    /// Behind a trusted proxy that pre-resolves routing.
    #[serde(default)]
    pub minimal_mode: bool,

    /// Expose pages at their filesystem paths.
    #[serde(default = "default_true")]
    pub use_fs_public_routes: bool,

    /// Development mode: edge modules and cached responses are
    /// invalidated when files change.
    #[serde(default)]
    pub dev: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            quiet: false,
            minimal_mode: false,
            use_fs_public_routes: default_true(),
            dev: false,
        }
    }
}

/// Locations of the build output the server reads at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistConfig {
    #[serde(default = "default_dist_dir")]
    pub dir: String,

    #[serde(default = "default_routes_manifest")]
    pub routes_manifest: String,

    #[serde(default = "default_pages_manifest")]
    pub pages_manifest: String,

    #[serde(default = "default_edge_manifest")]
    pub edge_manifest: String,
}

impl Default for DistConfig {
    fn default() -> Self {
        Self {
            dir: default_dist_dir(),
            routes_manifest: default_routes_manifest(),
            pages_manifest: default_pages_manifest(),
            edge_manifest: default_edge_manifest(),
        }
    }
}

impl DistConfig {
    pub fn routes_manifest_path(&self) -> std::path::PathBuf {
        Path::new(&self.dir).join(&self.routes_manifest)
    }

    pub fn pages_manifest_path(&self) -> std::path::PathBuf {
        Path::new(&self.dir).join(&self.pages_manifest)
    }

    pub fn edge_manifest_path(&self) -> std::path::PathBuf {
        Path::new(&self.dir).join(&self.edge_manifest)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_true() -> bool {
    true
}

fn default_dist_dir() -> String {
    ".edgekit".to_string()
}

fn default_routes_manifest() -> String {
    "routes-manifest.json".to_string()
}

fn default_pages_manifest() -> String {
    "pages-manifest.json".to_string()
}

fn default_edge_manifest() -> String {
    "edge-manifest.json".to_string()
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read config {}: {}", path.display(), e))
        })?;
        toml::from_str(&contents)
            .map_err(|e| Error::config(format!("invalid config {}: {}", path.display(), e)))
    }

    /// Environment-variable fallbacks over the defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(env_name) = env::var("EDGEKIT_ENV") {
            config.environment = Environment::from_str(&env_name);
        }
        if let Ok(host) = env::var("EDGEKIT_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = env::var("EDGEKIT_PORT") {
            config.server.port = port
                .parse()
                .map_err(|_| Error::config(format!("invalid EDGEKIT_PORT: {}", port)))?;
        }
        if let Ok(dist) = env::var("EDGEKIT_DIST") {
            config.dist.dir = dist;
        }
        if let Ok(quiet) = env::var("EDGEKIT_QUIET") {
            config.routing.quiet = quiet == "1" || quiet.eq_ignore_ascii_case("true");
        }

        Ok(config)
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server_address(), "127.0.0.1:3000");
        assert!(!config.routing.minimal_mode);
        assert!(config.routing.use_fs_public_routes);
        assert_eq!(config.dist.dir, ".edgekit");
    }

    #[test]
    fn test_parse_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            environment = "production"

            [server]
            host = "0.0.0.0"
            port = 8080

            [routing]
            minimal_mode = true
            quiet = true

            [dist]
            dir = "build"
            "#,
        )
        .unwrap();
        assert!(config.environment.is_production());
        assert_eq!(config.server_address(), "0.0.0.0:8080");
        assert!(config.routing.minimal_mode);
        assert!(config.routing.quiet);
        assert_eq!(
            config.dist.routes_manifest_path(),
            Path::new("build").join("routes-manifest.json")
        );
    }
}
