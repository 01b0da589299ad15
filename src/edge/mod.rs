//! Edge-function runtime
//!
//! User-supplied edge functions run before the page layer. The host loads
//! them through the sandbox, hands them a request/response surface, and
//! the pipeline composes chains of functions, translating their effects
//! (headers, cookies, redirect, rewrite, body) into routing directives.

pub mod adapter;
pub mod pipeline;
pub mod request;
pub mod response;
pub mod sandbox;

pub use pipeline::{EdgeOutcome, EdgePipeline};
pub use request::EdgeRequest;
pub use response::{BodyMode, CookieOptions, EdgeResponse};
pub use sandbox::{ambient, clear_sandbox_cache, EdgeFunction, ModuleLoader, Sandbox, SandboxEnv};

/// Effect sentinels: internal headers that encode an edge function's
/// decision. Never forwarded to the client.
pub const NEXT_SENTINEL: &str = "x-nextjs-next";
pub const REWRITE_SENTINEL: &str = "x-nextjs-rewrite";
pub const REDIRECT_SENTINEL: &str = "x-nextjs-redirect";

/// Marks an `OPTIONS` request as a preflight probe.
pub const PREFLIGHT_HEADER: &str = "x-nextjs-preflight";

/// Response diagnostic: total number of edge invocations for a request.
pub const FUNCTIONS_HEADER: &str = "x-nextjs-functions";

/// Maximum edge invocations for one client request, counting nested
/// rewrites.
pub const MAX_EDGE_CALLS: usize = 5;

/// How an edge invocation completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeEvent {
    /// The function started a streamed body.
    Streaming,
    /// The function produced a buffered body.
    Data,
    /// The function yielded to the next stage.
    Next,
}

/// Result of one edge-function invocation.
pub struct EdgeFunctionResult {
    pub event: EdgeEvent,
    pub response: EdgeResponse,
}
