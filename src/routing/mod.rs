//! Multi-stage routing
//!
//! Routes are built once at startup from the manifests and never mutated
//! afterwards. Each route is a tagged variant; the engine's per-route
//! behavior is a dispatch on the tag, with the shared knobs (`check`,
//! `require_base_path`, `internal`) as plain fields.

pub mod matcher;
pub mod router;

use crate::manifest::{HeaderRouteDef, RedirectDef, RewriteDef};
use crate::url::QueryMap;
pub use matcher::{HasPredicate, Params, PathMatcher};
pub use router::{RouteContext, RoutingEngine};

use crate::error::Result;

/// Per-kind payload of a route.
#[derive(Debug, Clone)]
pub enum RouteKind {
    /// Attach response headers; never finishes.
    Header { headers: Vec<(String, String)> },
    /// Emit a 3xx and finish.
    Redirect { destination: String, status: u16 },
    /// Substitute the pathname and re-check the filesystem.
    Rewrite { destination: String },
    /// Built-in filesystem group member (`_next/*`, static dirs).
    Filesystem,
    /// Page-existence probe ahead of the late rewrite groups.
    PageChecker,
    /// Edge-function catch-all.
    CatchAllEdge,
    /// Page render catch-all.
    CatchAllPage,
    /// Public directory file.
    PublicFile,
}

/// An immutable routing table entry.
pub struct Route {
    pub kind: RouteKind,
    pub name: String,
    pub matcher: PathMatcher,
    pub has: Vec<HasPredicate>,
    /// Routes that require the request to have carried the configured
    /// base path; opting out matches the bare path instead.
    pub require_base_path: bool,
    pub internal: bool,
    pub status_code: Option<u16>,
    /// Re-enter the filesystem/dynamic-route check after this route
    /// mutates the URL.
    pub check: bool,
}

impl Route {
    pub fn header(def: &HeaderRouteDef) -> Result<Self> {
        Ok(Self {
            kind: RouteKind::Header {
                headers: def
                    .headers
                    .iter()
                    .map(|h| (h.key.clone(), h.value.clone()))
                    .collect(),
            },
            name: format!("header {}", def.source),
            matcher: PathMatcher::compile(&def.source)?,
            has: def.has.clone(),
            require_base_path: def.base_path,
            internal: def.internal,
            status_code: None,
            check: false,
        })
    }

    pub fn redirect(def: &RedirectDef) -> Result<Self> {
        Ok(Self {
            kind: RouteKind::Redirect {
                destination: def.destination.clone(),
                status: def.status(),
            },
            name: format!("redirect {}", def.source),
            matcher: PathMatcher::compile(&def.source)?,
            has: def.has.clone(),
            require_base_path: def.base_path,
            internal: def.internal,
            status_code: Some(def.status()),
            check: false,
        })
    }

    pub fn rewrite(def: &RewriteDef) -> Result<Self> {
        Ok(Self {
            kind: RouteKind::Rewrite {
                destination: def.destination.clone(),
            },
            name: format!("rewrite {}", def.source),
            matcher: PathMatcher::compile(&def.source)?,
            has: def.has.clone(),
            require_base_path: def.base_path,
            internal: false,
            status_code: None,
            check: true,
        })
    }

    /// Built-in filesystem route. A `status_code` makes it a guard that
    /// answers with that status instead of serving.
    pub(crate) fn filesystem(name: &str, pattern: &str, status_code: Option<u16>) -> Result<Self> {
        Ok(Self {
            kind: RouteKind::Filesystem,
            name: name.to_string(),
            matcher: PathMatcher::compile(pattern)?,
            has: Vec::new(),
            require_base_path: true,
            internal: true,
            status_code,
            check: false,
        })
    }

    /// Built-in public-file route: everything not claimed by `_next`.
    pub(crate) fn public_file() -> Result<Self> {
        Ok(Self {
            kind: RouteKind::PublicFile,
            name: "public files".to_string(),
            matcher: PathMatcher::compile("/:path*")?,
            has: Vec::new(),
            require_base_path: true,
            internal: true,
            status_code: None,
            check: false,
        })
    }

    fn builtin_catch_all(kind: RouteKind, name: &str) -> Result<Self> {
        Ok(Self {
            kind,
            name: name.to_string(),
            matcher: PathMatcher::compile("/:path*")?,
            has: Vec::new(),
            require_base_path: true,
            internal: true,
            status_code: None,
            check: false,
        })
    }

    pub(crate) fn catch_all_edge() -> Result<Self> {
        Self::builtin_catch_all(RouteKind::CatchAllEdge, "edge functions catch-all")
    }

    pub(crate) fn page_checker() -> Result<Self> {
        Self::builtin_catch_all(RouteKind::PageChecker, "page checker")
    }

    pub(crate) fn catch_all_page() -> Result<Self> {
        Self::builtin_catch_all(RouteKind::CatchAllPage, "page catch-all")
    }
}

/// What a handler decided.
///
/// `finished` commits whatever the handler wrote; `pathname`/`query`
/// mutate the shared parsed URL for subsequent routes. A handler that
/// returns neither leaves the URL exactly as it found it.
pub struct RouteOutcome {
    pub finished: bool,
    pub response: Option<crate::http::Response>,
    pub pathname: Option<String>,
    pub query: Option<QueryMap>,
}

impl RouteOutcome {
    pub fn finished(response: crate::http::Response) -> Self {
        Self {
            finished: true,
            response: Some(response),
            pathname: None,
            query: None,
        }
    }

    pub fn next() -> Self {
        Self {
            finished: false,
            response: None,
            pathname: None,
            query: None,
        }
    }

    pub fn rewrite(pathname: String, query: Option<QueryMap>) -> Self {
        Self {
            finished: false,
            response: None,
            pathname: Some(pathname),
            query,
        }
    }
}
