use crate::cache::ResponseCache;
use crate::config::AppConfig;
use crate::edge::sandbox::{clear_sandbox_cache, ModuleLoader};
use crate::edge::EdgePipeline;
use crate::error::pages::ErrorPages;
use crate::error::{Error, Result};
use crate::http::{Request, Response, Server};
use crate::manifest::{EdgeManifest, PagesManifest, RoutesManifest};
use crate::render::{Render, StaticServe};
use crate::routing::router::EngineOptions;
use crate::routing::RoutingEngine;
use crate::url::QueryMap;
use hyper::Body;
use std::sync::Arc;

/// The edgekit application: a built routing engine plus the collaborators
/// it dispatches to.
///
/// Components are shared through `Arc`; everything reachable from
/// `handle_request` is read-only after construction, so concurrent
/// requests need no further synchronization here.
pub struct EdgeKit {
    engine: RoutingEngine,
    error_pages: ErrorPages,
    pub config: Arc<AppConfig>,
}

/// Assembles an [`EdgeKit`] from configuration, manifests and
/// collaborators.
pub struct EdgeKitBuilder {
    config: AppConfig,
    routes_manifest: Option<RoutesManifest>,
    pages_manifest: Option<PagesManifest>,
    edge_manifest: Option<EdgeManifest>,
    render: Option<Arc<dyn Render>>,
    statics: Option<Arc<dyn StaticServe>>,
    loader: Option<Arc<dyn ModuleLoader>>,
}

impl EdgeKitBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            routes_manifest: None,
            pages_manifest: None,
            edge_manifest: None,
            render: None,
            statics: None,
            loader: None,
        }
    }

    /// Use already-parsed manifests instead of reading the dist dir.
    pub fn routes_manifest(mut self, manifest: RoutesManifest) -> Self {
        self.routes_manifest = Some(manifest);
        self
    }

    pub fn pages_manifest(mut self, manifest: PagesManifest) -> Self {
        self.pages_manifest = Some(manifest);
        self
    }

    pub fn edge_manifest(mut self, manifest: EdgeManifest) -> Self {
        self.edge_manifest = Some(manifest);
        self
    }

    pub fn render(mut self, render: Arc<dyn Render>) -> Self {
        self.render = Some(render);
        self
    }

    pub fn static_files(mut self, statics: Arc<dyn StaticServe>) -> Self {
        self.statics = Some(statics);
        self
    }

    pub fn edge_modules(mut self, loader: Arc<dyn ModuleLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn build(self) -> Result<EdgeKit> {
        let config = Arc::new(self.config);

        let routes_manifest = match self.routes_manifest {
            Some(manifest) => manifest,
            None => RoutesManifest::from_file(config.dist.routes_manifest_path())?,
        };
        let pages_manifest = match self.pages_manifest {
            Some(manifest) => manifest,
            None => PagesManifest::from_file(config.dist.pages_manifest_path())?,
        };
        let edge_manifest = match self.edge_manifest {
            Some(manifest) => manifest,
            None => {
                let path = config.dist.edge_manifest_path();
                if path.exists() {
                    EdgeManifest::from_file(path)?
                } else {
                    EdgeManifest::default()
                }
            }
        };

        let render = self
            .render
            .ok_or_else(|| Error::config("a render collaborator is required"))?;
        let statics = self
            .statics
            .ok_or_else(|| Error::config("a static-file collaborator is required"))?;

        let edge = if edge_manifest.is_empty() {
            None
        } else {
            let loader = self.loader.ok_or_else(|| {
                Error::config("edge functions declared but no module loader provided")
            })?;
            Some(Arc::new(EdgePipeline::new(
                &edge_manifest,
                loader,
                &routes_manifest.base_path,
                routes_manifest.locales(),
            )?))
        };

        let options = EngineOptions {
            minimal_mode: config.routing.minimal_mode,
            use_fs_public_routes: config.routing.use_fs_public_routes,
        };

        let engine = RoutingEngine::new(
            &routes_manifest,
            pages_manifest,
            edge,
            Arc::clone(&render),
            statics,
            options,
        )?;

        log::info!(
            "routing table built: {} headers, {} redirects, {} rewrites",
            routes_manifest.headers.len(),
            routes_manifest.redirects.len(),
            routes_manifest.rewrites.before_files().len()
                + routes_manifest.rewrites.after_files().len()
                + routes_manifest.rewrites.fallback().len(),
        );

        Ok(EdgeKit {
            engine,
            error_pages: ErrorPages::new(render),
            config,
        })
    }
}

impl EdgeKit {
    pub fn builder(config: AppConfig) -> EdgeKitBuilder {
        EdgeKitBuilder::new(config)
    }

    pub fn response_cache(&self) -> &Arc<ResponseCache> {
        self.engine.response_cache()
    }

    /// Development-mode invalidation: drop the sandbox module cache and
    /// cached renders after a source change.
    pub fn invalidate(&self, changed_path: &str) {
        if !self.config.routing.dev {
            log::warn!("invalidate() called outside dev mode; ignoring");
            return;
        }
        clear_sandbox_cache(changed_path);
        self.engine.response_cache().clear();
    }

    /// Post-drain teardown, called by the server once connections have
    /// finished: release the process-wide sandbox module cache and any
    /// cached renders.
    pub fn shutdown(&self) {
        let dropped = crate::edge::sandbox::drain_module_cache();
        if dropped > 0 {
            log::debug!("dropped {} sandbox modules", dropped);
        }
        self.engine.response_cache().clear();
        log::info!("edgekit state released");
    }

    pub async fn handle_request(&self, req: hyper::Request<Body>) -> Result<Response> {
        let request = Request::from_hyper(req).await?;
        self.handle(&request).await
    }

    /// Route a request, translating failures per the error policy:
    /// decode failures render 400, development build errors surface
    /// without server logging, anything else is logged once (unless
    /// quiet) and renders 500. In minimal mode internal errors re-throw
    /// so the fronting infrastructure observes them.
    pub async fn handle(&self, request: &Request) -> Result<Response> {
        match self.engine.run(request).await {
            Ok(response) => Ok(response),
            Err(Error::Decode(reason)) => {
                log::debug!("malformed request url {}: {}", request.uri, reason);
                Ok(self.error_pages.render_status(400, &QueryMap::new()).await)
            }
            Err(e) => {
                if self.config.routing.minimal_mode && e.is_server_error() {
                    return Err(e);
                }
                let e = match e {
                    Error::WrappedBuild(inner) => *inner,
                    other => {
                        if other.is_server_error() && !self.config.routing.quiet {
                            log::error!("request to {} failed: {}", request.uri, other);
                        }
                        other
                    }
                };
                let status = e.status_code();
                Ok(self
                    .error_pages
                    .render_status(status, &QueryMap::new())
                    .await)
            }
        }
    }

    pub async fn serve(self, addr: Option<&str>) -> Result<()> {
        let config_addr = self.config.server_address();
        let server_addr = addr.unwrap_or(&config_addr).to_string();
        let server = Server::new(self);
        server.serve(&server_addr).await
    }

    pub async fn start(self) -> Result<()> {
        self.serve(None).await
    }
}
