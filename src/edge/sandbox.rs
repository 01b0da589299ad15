//! Edge-function host
//!
//! Modules are resolved by a `ModuleLoader`, evaluated once, and memoized
//! by absolute path in a process-wide cache. The host hands each function
//! the request/response surface; everything else a function may reach for
//! lives on the [`ambient`] capability set: text and base64 codecs, the
//! shared URL model, a random source with UUIDs, a fetch client, timers,
//! a filtered console, and an environment snapshot. The host never
//! invokes module code outside `run`.

use super::request::EdgeRequest;
use super::response::{BodyMode, EdgeResponse};
use super::{EdgeEvent, EdgeFunctionResult};
use crate::error::{Error, Result};
use crate::url::{ParsedUrl, QueryMap};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// An evaluated edge-function module.
///
/// The entry point mirrors the `{request, response}` invocation contract:
/// the function observes the request and drives the response to one of
/// its terminal effects.
#[async_trait]
pub trait EdgeFunction: Send + Sync {
    async fn handle(&self, request: &EdgeRequest, response: &mut EdgeResponse) -> Result<()>;
}

/// Resolves a module path to an evaluated module. Called at most once per
/// path while the cache holds the result.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, module_path: &str) -> Result<Arc<dyn EdgeFunction>>;
}

// Process-wide module cache. Invalidation drains the whole cache rather
// than evicting single entries; the next access rebuilds lazily.
static MODULE_CACHE: Lazy<Mutex<HashMap<String, Arc<dyn EdgeFunction>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Drop every cached module, reporting how many were held.
pub(crate) fn drain_module_cache() -> usize {
    let mut cache = MODULE_CACHE.lock().unwrap_or_else(|e| e.into_inner());
    let dropped = cache.len();
    cache.clear();
    dropped
}

/// Drop every cached module. Used in development when a module file
/// changes on disk; invalidation is a full drain, not per-module.
pub fn clear_sandbox_cache(path: &str) {
    let dropped = drain_module_cache();
    if dropped > 0 {
        log::debug!("cleared {} sandbox modules after change to {}", dropped, path);
    }
}

// One ambient snapshot for every compartment in the process.
static AMBIENT: Lazy<SandboxEnv> = Lazy::new(SandboxEnv::new);

/// The ambient capability set available to edge-function code.
pub fn ambient() -> &'static SandboxEnv {
    &AMBIENT
}

/// Ambient capabilities: codecs, the shared URL model, randomness,
/// fetch, timers, console and environment access.
pub struct SandboxEnv {
    env: HashMap<String, String>,
    http: reqwest::Client,
}

impl Default for SandboxEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxEnv {
    /// Snapshot the environment at construction; later process-level
    /// changes are not visible to functions.
    pub fn new() -> Self {
        Self {
            env: std::env::vars().collect(),
            http: reqwest::Client::new(),
        }
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(|s| s.as_str())
    }

    /// UTF-8 text encoder.
    pub fn encode_text(&self, text: &str) -> Vec<u8> {
        text.as_bytes().to_vec()
    }

    /// UTF-8 text decoder; invalid sequences become replacement
    /// characters.
    pub fn decode_text(&self, bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).into_owned()
    }

    /// Standard-alphabet base64 encoder.
    pub fn base64_encode(&self, data: &[u8]) -> String {
        BASE64.encode(data)
    }

    /// Standard-alphabet base64 decoder.
    pub fn base64_decode(&self, encoded: &str) -> Result<Vec<u8>> {
        BASE64
            .decode(encoded)
            .map_err(|e| Error::decode(format!("invalid base64: {}", e)))
    }

    /// Parse a URL with the same model routing uses.
    pub fn parse_url(&self, raw: &str) -> Result<ParsedUrl> {
        ParsedUrl::parse(raw)
    }

    /// Parse a search string into the ordered query map.
    pub fn parse_search(&self, query: &str) -> Result<QueryMap> {
        crate::url::parse_query(query)
    }

    /// Serialize a query map back into a search string.
    pub fn format_search(&self, query: &QueryMap) -> String {
        crate::url::format_query(query)
    }

    /// Cryptographically strong random bytes.
    pub fn random_bytes(&self, len: usize) -> Vec<u8> {
        use rand::RngCore;
        let mut bytes = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes
    }

    /// UUID v4 generator.
    pub fn uuid(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Outbound fetch capability.
    pub fn fetch(&self) -> &reqwest::Client {
        &self.http
    }

    /// Suspend the calling function for `delay`.
    pub async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }

    /// Run `task` with a deadline; `None` when the deadline passes first.
    pub async fn timeout<F>(&self, limit: Duration, task: F) -> Option<F::Output>
    where
        F: Future,
    {
        tokio::time::timeout(limit, task).await.ok()
    }

    /// Filtered console: only log/warn/error levels are forwarded.
    pub fn console(&self, level: &str, message: &str) {
        match level {
            "warn" => log::warn!("[edge] {}", message),
            "error" => log::error!("[edge] {}", message),
            _ => log::info!("[edge] {}", message),
        }
    }
}

/// The host side of the edge runtime.
pub struct Sandbox {
    loader: Arc<dyn ModuleLoader>,
}

impl Sandbox {
    pub fn new(loader: Arc<dyn ModuleLoader>) -> Self {
        Self { loader }
    }

    /// Ambient capabilities visible to every module this host runs.
    pub fn env(&self) -> &'static SandboxEnv {
        ambient()
    }

    /// Load a module, going to the loader only on a cache miss.
    fn load_module(&self, module_path: &str) -> Result<Arc<dyn EdgeFunction>> {
        {
            let cache = MODULE_CACHE.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(module) = cache.get(module_path) {
                return Ok(Arc::clone(module));
            }
        }

        // Load outside the lock; a racing load of the same path is
        // harmless and last-insert wins.
        let module = self.loader.load(module_path)?;
        let mut cache = MODULE_CACHE.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(module_path.to_string(), Arc::clone(&module));
        Ok(module)
    }

    /// Invoke one edge function and classify its completion.
    ///
    /// A `HeadersSent` failure raised after the response already reached
    /// a terminal state is the function tripping over its own committed
    /// effect; the effect stands and the failure is downgraded to a
    /// warning.
    pub async fn run(
        &self,
        name: &str,
        module_path: &str,
        request: &EdgeRequest,
        mut response: EdgeResponse,
    ) -> Result<EdgeFunctionResult> {
        let module = self.load_module(module_path)?;

        log::debug!("running edge function {} ({})", name, module_path);
        match module.handle(request, &mut response).await {
            Ok(()) => {}
            Err(Error::HeadersSent) if response.is_finished() => {
                log::warn!(
                    "edge function {} kept writing after its response ended",
                    name
                );
            }
            Err(e) => return Err(e),
        }

        let event = match response.body_mode() {
            BodyMode::Streaming => EdgeEvent::Streaming,
            BodyMode::Buffered => EdgeEvent::Data,
            _ => EdgeEvent::Next,
        };

        // A function that returned without deciding anything implicitly
        // yields, so the chain can continue.
        if event == EdgeEvent::Next && !response.is_finished() {
            response.next()?;
        }

        Ok(EdgeFunctionResult { event, response })
    }
}
