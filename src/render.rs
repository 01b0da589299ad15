//! Collaborator contracts: page rendering and static assets
//!
//! Rendering pages to HTML and serving files from disk are external to
//! the routing core. The engine talks to them through these traits and
//! never assumes anything beyond the contracts below.

use crate::error::Result;
use crate::http::Response;
use crate::url::QueryMap;
use async_trait::async_trait;

/// What the page renderer produced for a path.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutcome {
    /// Rendered HTML document.
    Html(String),
    /// Serialized page props for a data request.
    Json(serde_json::Value),
    /// The page itself decided to redirect.
    Redirect { destination: String, status: u16 },
    /// No page exists for the path.
    NotFound,
}

/// The page renderer.
///
/// `has_page` is the page-existence oracle used by the routing engine's
/// filesystem re-check; the engine memoizes it per request.
#[async_trait]
pub trait Render: Send + Sync {
    async fn render(&self, path: &str, query: &QueryMap) -> Result<RenderOutcome>;

    async fn has_page(&self, path: &str) -> Result<bool>;
}

/// The static asset server.
///
/// Returns `None` when nothing matches the path; a returned response is
/// emitted as-is, which is how 412 passthrough from the static layer
/// reaches the client.
#[async_trait]
pub trait StaticServe: Send + Sync {
    async fn serve_static(&self, path: &str) -> Result<Option<Response>>;
}
