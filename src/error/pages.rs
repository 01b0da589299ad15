//! Error page resolution
//!
//! Error responses prefer a user-provided page: `/404` for not-found,
//! then a `/<status>` static status page, then `/_error`. When none of
//! those renders, a bare body goes out so the client always gets an
//! answer.

use crate::http::Response;
use crate::render::{Render, RenderOutcome};
use crate::url::QueryMap;
use std::sync::Arc;

pub struct ErrorPages {
    render: Arc<dyn Render>,
}

impl ErrorPages {
    pub fn new(render: Arc<dyn Render>) -> Self {
        Self { render }
    }

    /// Render the best available error page for `status`.
    pub async fn render_status(&self, status: u16, query: &QueryMap) -> Response {
        let mut candidates: Vec<String> = Vec::with_capacity(3);
        if status == 404 {
            candidates.push("/404".to_string());
        }
        candidates.push(format!("/{}", status));
        candidates.push("/_error".to_string());

        for page in candidates {
            match self.render.render(&page, query).await {
                Ok(RenderOutcome::Html(body)) => {
                    return Response::html(body).with_status(status);
                }
                Ok(_) => continue,
                Err(e) => {
                    log::debug!("error page {} did not render: {}", page, e);
                    continue;
                }
            }
        }

        Response::new(
            hyper::StatusCode::from_u16(status)
                .unwrap_or(hyper::StatusCode::INTERNAL_SERVER_ERROR),
        )
        .with_header("Content-Type", "text/plain; charset=utf-8")
        .with_body("Internal Server Error".as_bytes().to_vec())
    }
}
