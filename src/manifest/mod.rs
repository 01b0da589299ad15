//! Build-output manifests
//!
//! Three manifests are read once at server start and are read-only during
//! serving: the routes manifest (base path, i18n, custom routes), the
//! pages manifest (page path to build file), and the edge manifest (page
//! path to edge-function module). Backward-compatible forms are accepted
//! where older builds produced them.

use crate::error::{Error, Result};
use crate::routing::matcher::HasPredicate;
use crate::url::locale::DomainLocale;
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::Path;

/// `routes-manifest.json`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutesManifest {
    #[serde(default)]
    pub base_path: String,
    #[serde(default)]
    pub i18n: Option<I18nConfig>,
    #[serde(default)]
    pub headers: Vec<HeaderRouteDef>,
    #[serde(default)]
    pub redirects: Vec<RedirectDef>,
    #[serde(default)]
    pub rewrites: RewritesDef,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct I18nConfig {
    pub locales: Vec<String>,
    pub default_locale: String,
    #[serde(default)]
    pub domains: Vec<DomainLocale>,
    #[serde(default = "default_true")]
    pub locale_detection: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderRouteDef {
    pub source: String,
    pub headers: Vec<HeaderKeyValue>,
    #[serde(default)]
    pub has: Vec<HasPredicate>,
    /// `basePath: false` opts this route out of base-path matching.
    #[serde(default = "default_true")]
    pub base_path: bool,
    #[serde(default)]
    pub internal: bool,
    /// `locale: false` disables locale stripping for this route.
    #[serde(default = "default_true")]
    pub locale: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeaderKeyValue {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectDef {
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub permanent: Option<bool>,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub has: Vec<HasPredicate>,
    #[serde(default = "default_true")]
    pub base_path: bool,
    #[serde(default)]
    pub internal: bool,
    #[serde(default = "default_true")]
    pub locale: bool,
}

impl RedirectDef {
    /// Effective status: explicit `statusCode` wins, then `permanent`
    /// maps to 308/307, default 307.
    pub fn status(&self) -> u16 {
        if let Some(code) = self.status_code {
            return code;
        }
        match self.permanent {
            Some(true) => 308,
            _ => 307,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewriteDef {
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub has: Vec<HasPredicate>,
    #[serde(default = "default_true")]
    pub base_path: bool,
    #[serde(default = "default_true")]
    pub locale: bool,
}

/// Rewrites come in two manifest forms: a plain ordered sequence (older
/// builds, treated as `afterFiles`) or the three-phase object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RewritesDef {
    Plain(Vec<RewriteDef>),
    Phased {
        #[serde(default, rename = "beforeFiles")]
        before_files: Vec<RewriteDef>,
        #[serde(default, rename = "afterFiles")]
        after_files: Vec<RewriteDef>,
        #[serde(default)]
        fallback: Vec<RewriteDef>,
    },
}

impl Default for RewritesDef {
    fn default() -> Self {
        RewritesDef::Phased {
            before_files: Vec::new(),
            after_files: Vec::new(),
            fallback: Vec::new(),
        }
    }
}

impl RewritesDef {
    pub fn before_files(&self) -> &[RewriteDef] {
        match self {
            RewritesDef::Plain(_) => &[],
            RewritesDef::Phased { before_files, .. } => before_files,
        }
    }

    pub fn after_files(&self) -> &[RewriteDef] {
        match self {
            RewritesDef::Plain(list) => list,
            RewritesDef::Phased { after_files, .. } => after_files,
        }
    }

    pub fn fallback(&self) -> &[RewriteDef] {
        match self {
            RewritesDef::Plain(_) => &[],
            RewritesDef::Phased { fallback, .. } => fallback,
        }
    }
}

impl RoutesManifest {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| Error::manifest(format!("invalid routes manifest: {}", e)))
    }

    pub fn locales(&self) -> &[String] {
        self.i18n.as_ref().map(|i| i.locales.as_slice()).unwrap_or(&[])
    }

    pub fn default_locale(&self) -> Option<&str> {
        self.i18n.as_ref().map(|i| i.default_locale.as_str())
    }
}

/// `pages-manifest.json`: page path to relative build file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct PagesManifest {
    pages: IndexMap<String, String>,
}

impl PagesManifest {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| Error::manifest(format!("invalid pages manifest: {}", e)))
    }

    pub fn from_pages(pages: IndexMap<String, String>) -> Self {
        Self { pages }
    }

    /// Whether the manifest has an entry for `page` after normalization.
    pub fn contains(&self, page: &str) -> bool {
        self.lookup(page).is_some()
    }

    /// Look up the build file for a page. `/index/x` is normalized to
    /// `/x` and `/index` to `/`; the root also resolves via `/index`.
    pub fn lookup(&self, page: &str) -> Option<&str> {
        if let Some(file) = self.pages.get(page) {
            return Some(file);
        }
        let normalized = normalize_page_path(page);
        if normalized != page {
            if let Some(file) = self.pages.get(&normalized) {
                return Some(file);
            }
        }
        if page == "/" {
            return self.pages.get("/index").map(|s| s.as_str());
        }
        None
    }

    /// Like [`lookup`], failing with `PageNotFound` when absent.
    pub fn page_file(&self, page: &str) -> Result<&str> {
        self.lookup(page)
            .ok_or_else(|| Error::page_not_found(page))
    }

    /// All page paths in manifest order.
    pub fn pages(&self) -> impl Iterator<Item = &str> {
        self.pages.keys().map(|s| s.as_str())
    }
}

/// Collapse the `/index` spelling of a page path.
pub fn normalize_page_path(page: &str) -> String {
    if page == "/index" {
        return "/".to_string();
    }
    if let Some(rest) = page.strip_prefix("/index/") {
        return format!("/{}", rest);
    }
    page.to_string()
}

/// One edge function as declared by the edge manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeFunctionDef {
    pub file: String,
    pub page: String,
    #[serde(default)]
    pub regexp: Option<String>,
}

/// `edge-manifest.json`: versioned object form, with the flat
/// `{ <pagePath>: <file> }` form accepted for backward compatibility.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum EdgeManifestFormat {
    Versioned {
        version: u32,
        #[serde(default, rename = "edgeFunctions")]
        edge_functions: IndexMap<String, EdgeFunctionDef>,
    },
    Flat(IndexMap<String, String>),
}

#[derive(Debug, Clone, Default)]
pub struct EdgeManifest {
    functions: Vec<EdgeFunctionDef>,
}

impl EdgeManifest {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let format: EdgeManifestFormat = serde_json::from_str(raw)
            .map_err(|e| Error::manifest(format!("invalid edge manifest: {}", e)))?;

        let functions = match format {
            EdgeManifestFormat::Versioned {
                version,
                edge_functions,
            } => {
                if version != 1 {
                    return Err(Error::manifest(format!(
                        "unsupported edge manifest version {}",
                        version
                    )));
                }
                edge_functions.into_values().collect()
            }
            EdgeManifestFormat::Flat(entries) => entries
                .into_iter()
                .map(|(page, file)| EdgeFunctionDef {
                    file,
                    page,
                    regexp: None,
                })
                .collect(),
        };

        Ok(Self { functions })
    }

    pub fn from_functions(functions: Vec<EdgeFunctionDef>) -> Self {
        Self { functions }
    }

    /// Declared functions in manifest order.
    pub fn functions(&self) -> &[EdgeFunctionDef] {
        &self.functions
    }

    /// Module file for the function registered at `page`. Absence is a
    /// `PageNotFound` error, not a silent miss.
    pub fn edge_function_path(&self, page: &str) -> Result<&str> {
        self.functions
            .iter()
            .find(|f| f.page == page)
            .map(|f| f.file.as_str())
            .ok_or_else(|| Error::page_not_found(page))
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
