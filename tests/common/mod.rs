//! Shared fixtures: in-memory render, static-file and module-loader
//! collaborators for driving the full routing engine.

use async_trait::async_trait;
use edgekit::prelude::*;
use edgekit::manifest::EdgeFunctionDef;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Unique module paths per test: the sandbox module cache is
/// process-wide and tests run concurrently.
static MODULE_SEQ: AtomicUsize = AtomicUsize::new(0);

pub fn unique_module_path(hint: &str) -> String {
    format!(
        "/build/edge/{}-{}.mem",
        hint,
        MODULE_SEQ.fetch_add(1, Ordering::SeqCst)
    )
}

/// In-memory page renderer. HTML pages, JSON data pages, and everything
/// else renders as not-found.
#[derive(Default)]
pub struct FakePages {
    html: HashMap<String, String>,
    json: HashMap<String, serde_json::Value>,
    pub render_count: AtomicUsize,
}

impl FakePages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, page: &str, html: &str) -> Self {
        self.html.insert(page.to_string(), html.to_string());
        self
    }

    pub fn with_data(mut self, page: &str, data: serde_json::Value) -> Self {
        self.json.insert(page.to_string(), data);
        self
    }

    /// Pages manifest covering every registered page.
    pub fn manifest(&self) -> PagesManifest {
        let mut pages = IndexMap::new();
        for page in self.html.keys().chain(self.json.keys()) {
            pages.insert(page.clone(), format!("pages{}.js", page));
        }
        PagesManifest::from_pages(pages)
    }
}

#[async_trait]
impl Render for FakePages {
    async fn render(&self, path: &str, query: &QueryMap) -> Result<RenderOutcome> {
        self.render_count.fetch_add(1, Ordering::SeqCst);
        if query.contains_key("__nextDataReq") {
            if let Some(data) = self.json.get(path) {
                return Ok(RenderOutcome::Json(data.clone()));
            }
        }
        if let Some(html) = self.html.get(path) {
            return Ok(RenderOutcome::Html(html.clone()));
        }
        if let Some(data) = self.json.get(path) {
            return Ok(RenderOutcome::Json(data.clone()));
        }
        Ok(RenderOutcome::NotFound)
    }

    async fn has_page(&self, path: &str) -> Result<bool> {
        Ok(self.html.contains_key(path) || self.json.contains_key(path))
    }
}

/// In-memory static file tree keyed by exact request path.
#[derive(Default)]
pub struct FakeStatic {
    files: HashMap<String, (u16, Vec<u8>)>,
}

impl FakeStatic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, body: &str) -> Self {
        self.files
            .insert(path.to_string(), (200, body.as_bytes().to_vec()));
        self
    }

    pub fn with_status(mut self, path: &str, status: u16, body: &str) -> Self {
        self.files
            .insert(path.to_string(), (status, body.as_bytes().to_vec()));
        self
    }
}

#[async_trait]
impl StaticServe for FakeStatic {
    async fn serve_static(&self, path: &str) -> Result<Option<Response>> {
        Ok(self.files.get(path).map(|(status, body)| {
            Response::ok()
                .with_status(*status)
                .with_body(body.clone())
        }))
    }
}

/// Edge function built from a plain closure.
pub struct FnEdge<F>(pub F);

#[async_trait]
impl<F> EdgeFunction for FnEdge<F>
where
    F: Fn(&EdgeRequest, &mut EdgeResponse) -> Result<()> + Send + Sync,
{
    async fn handle(&self, request: &EdgeRequest, response: &mut EdgeResponse) -> Result<()> {
        (self.0)(request, response)
    }
}

/// Module loader over a fixed path-to-function map.
#[derive(Default)]
pub struct FnLoader {
    modules: Mutex<HashMap<String, Arc<dyn EdgeFunction>>>,
}

impl FnLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, path: &str, module: Arc<dyn EdgeFunction>) {
        self.modules
            .lock()
            .unwrap()
            .insert(path.to_string(), module);
    }
}

impl ModuleLoader for FnLoader {
    fn load(&self, module_path: &str) -> Result<Arc<dyn EdgeFunction>> {
        self.modules
            .lock()
            .unwrap()
            .get(module_path)
            .cloned()
            .ok_or_else(|| Error::PageNotFound(module_path.to_string()))
    }
}

/// Assemble an app from a routes manifest, fake collaborators and a set
/// of edge functions registered by page path.
pub fn build_app(
    routes_json: &str,
    pages: Arc<FakePages>,
    statics: FakeStatic,
    edge_fns: Vec<(&str, Arc<dyn EdgeFunction>)>,
    tweak: impl FnOnce(&mut AppConfig),
) -> EdgeKit {
    let mut config = AppConfig::default();
    tweak(&mut config);

    let routes = RoutesManifest::from_json(routes_json).unwrap();
    let pages_manifest = pages.manifest();

    let loader = Arc::new(FnLoader::new());
    let mut defs = Vec::new();
    for (page, module) in edge_fns {
        let file = unique_module_path(page.trim_start_matches('/').replace(['/', '[', ']'], "-").as_str());
        loader.register(&file, module);
        defs.push(EdgeFunctionDef {
            file,
            page: page.to_string(),
            regexp: None,
        });
    }
    let edge_manifest = EdgeManifest::from_functions(defs);

    EdgeKit::builder(config)
        .routes_manifest(routes)
        .pages_manifest(pages_manifest)
        .edge_manifest(edge_manifest)
        .render(pages)
        .static_files(Arc::new(statics))
        .edge_modules(loader)
        .build()
        .unwrap()
}

/// Drain a response body, following streamed bodies to completion.
pub async fn read_body(response: Response) -> (u16, Vec<(String, String)>, Vec<u8>) {
    let status = response.status.as_u16();
    let headers = response.headers.clone();
    let body = hyper::body::to_bytes(response.into_hyper().into_body())
        .await
        .unwrap()
        .to_vec();
    (status, headers, body)
}

/// First value of a header in a header list.
pub fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

pub fn header_all<'a>(headers: &'a [(String, String)], name: &str) -> Vec<&'a str> {
    headers
        .iter()
        .filter(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
        .collect()
}
