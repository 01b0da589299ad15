//! Single-flight response cache
//!
//! Concurrent requests with the same cache key share one render in
//! flight: the first computes, the rest wait on its completion and
//! receive the same payload. Keys include the locale, the resolved
//! pathname and an `.amp` suffix where applicable; preview-mode requests
//! bypass the cache entirely by passing no key.

use crate::error::Result;
use crate::render::RenderOutcome;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

/// A cached render result. Bodies are stored fully serialized so cache
/// hits are byte-identical to the miss path.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedRender {
    Html { body: String },
    Json { body: String },
    Redirect { destination: String, status: u16 },
    NotFound,
}

impl CachedRender {
    pub fn from_outcome(outcome: RenderOutcome) -> Result<Self> {
        Ok(match outcome {
            RenderOutcome::Html(body) => CachedRender::Html { body },
            RenderOutcome::Json(value) => CachedRender::Json {
                body: serde_json::to_string(&value)?,
            },
            RenderOutcome::Redirect {
                destination,
                status,
            } => CachedRender::Redirect {
                destination,
                status,
            },
            RenderOutcome::NotFound => CachedRender::NotFound,
        })
    }
}

type Slot = Arc<OnceCell<Arc<CachedRender>>>;

#[derive(Default)]
pub struct ResponseCache {
    entries: Mutex<HashMap<String, Slot>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the cache key for a resolved request.
    pub fn key(pathname: &str, locale: Option<&str>, amp: bool) -> String {
        let mut key = String::new();
        if let Some(locale) = locale {
            key.push('/');
            key.push_str(locale);
        }
        key.push_str(pathname);
        if amp {
            key.push_str(".amp");
        }
        key
    }

    /// Fetch the payload for `key`, rendering at most once concurrently.
    ///
    /// `key=None` (preview mode) bypasses the cache and always renders.
    /// A failed render leaves the slot empty so a later request retries.
    pub async fn get_or_render<F, Fut>(
        &self,
        key: Option<&str>,
        render: F,
    ) -> Result<Arc<CachedRender>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CachedRender>>,
    {
        let Some(key) = key else {
            return Ok(Arc::new(render().await?));
        };

        let slot: Slot = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(
                entries
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        let payload = slot
            .get_or_try_init(|| async {
                log::debug!("response cache miss for {}", key);
                render().await.map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(payload))
    }

    /// Drop every cached payload (dev-mode rebuilds).
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
