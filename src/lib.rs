//! edgekit - request routing and edge-function pipeline for a framework
//! server
//!
//! edgekit serves pre-compiled page bundles, static assets and
//! user-supplied edge functions:
//! - Multi-stage routing over ordered route groups (headers, redirects,
//!   rewrites, filesystem, edge functions, page catch-all)
//! - An edge runtime host with a request/response surface and chained
//!   function composition
//! - A shared URL model with base-path, locale and build-id handling
//!
//! Page rendering and static-file serving are collaborator traits; the
//! crate routes, the collaborators produce content.

// Enforce error handling best practices
#![cfg_attr(
    not(test),
    warn(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
    )
)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used,))]

pub mod app;
pub mod cache;
pub mod config;
pub mod edge;
pub mod error;
pub mod http;
pub mod manifest;
pub mod render;
pub mod routing;
pub mod url;

// Re-export main types for public API
pub use app::{EdgeKit, EdgeKitBuilder};
pub use cache::{CachedRender, ResponseCache};
pub use config::AppConfig;
pub use edge::{
    ambient, clear_sandbox_cache, CookieOptions, EdgeFunction, EdgePipeline, EdgeRequest,
    EdgeResponse, ModuleLoader, Sandbox, SandboxEnv,
};
pub use error::{Error, ErrorPages, Result};
pub use http::{Request, Response};
pub use manifest::{EdgeManifest, PagesManifest, RoutesManifest};
pub use render::{Render, RenderOutcome, StaticServe};
pub use routing::{Route, RouteKind, RouteOutcome, RoutingEngine};
pub use url::{ParsedUrl, QueryMap, QueryValue};

// Re-export commonly used external types
pub use serde::{Deserialize, Serialize};
pub use serde_json::{json, Value};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::app::{EdgeKit, EdgeKitBuilder};
    pub use crate::config::AppConfig;
    pub use crate::edge::{
        ambient, CookieOptions, EdgeFunction, EdgeRequest, EdgeResponse, ModuleLoader,
    };
    pub use crate::error::{Error, Result};
    pub use crate::http::{Request, Response};
    pub use crate::manifest::{EdgeManifest, PagesManifest, RoutesManifest};
    pub use crate::render::{Render, RenderOutcome, StaticServe};
    pub use crate::url::{ParsedUrl, QueryMap, QueryValue};
    pub use serde_json::json;
    pub use std::sync::Arc;
}
