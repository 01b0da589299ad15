//! Wire adapter for edge-function results
//!
//! When an edge function is the whole response, its effect set is
//! translated onto the outgoing socket: headers copied verbatim (decision
//! sentinels stripped), buffered bodies written, streamed bodies pumped
//! until the reader closes, and absolute rewrite targets proxied upstream.

use super::response::EdgeResponse;
use super::{EdgeOutcome, NEXT_SENTINEL, PREFLIGHT_HEADER, REDIRECT_SENTINEL, REWRITE_SENTINEL};
use crate::error::{Error, Result};
use crate::http::{Request, Response};
use futures::TryStreamExt;
use once_cell::sync::Lazy;
use std::time::Duration;

/// Upstream proxy cap for external rewrites.
const PROXY_TIMEOUT: Duration = Duration::from_secs(30);

static PROXY_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .timeout(PROXY_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap_or_default()
});

/// Decision sentinels never reach the client. The invocation-count
/// diagnostic does; it is how operators observe chain depth.
fn is_sentinel(name: &str) -> bool {
    name.eq_ignore_ascii_case(NEXT_SENTINEL)
        || name.eq_ignore_ascii_case(REWRITE_SENTINEL)
        || name.eq_ignore_ascii_case(REDIRECT_SENTINEL)
        || name.eq_ignore_ascii_case(PREFLIGHT_HEADER)
}

/// Copy accumulated headers onto the wire response, dropping sentinels.
pub fn copy_headers(edge: &EdgeResponse, response: &mut Response) {
    for (name, value) in edge.headers() {
        if !is_sentinel(name) {
            response.add_header(name, value);
        }
    }
}

/// The non-sentinel headers of an edge response, for callers that
/// accumulate rather than write directly.
pub fn collect_headers(edge: &EdgeResponse) -> Vec<(String, String)> {
    edge.headers()
        .iter()
        .filter(|(name, _)| !is_sentinel(name))
        .cloned()
        .collect()
}

/// Translate a terminal edge outcome into a wire response.
///
/// `Rewrite` reaches this adapter only with an absolute target; internal
/// rewrites are consumed by the routing engine before this point.
pub async fn to_response(outcome: EdgeOutcome, request: &Request) -> Result<Response> {
    match outcome {
        EdgeOutcome::Redirect {
            location,
            status,
            response: edge,
        } => {
            let mut response = Response::redirect(&location, status);
            copy_headers(&edge, &mut response);
            Ok(response)
        }
        EdgeOutcome::Data(edge) => {
            let mut response =
                Response::new(status_from(edge.status_code())).with_body(edge.buffered_body().to_vec());
            copy_headers(&edge, &mut response);
            Ok(response)
        }
        EdgeOutcome::Streaming(mut edge) => {
            let stream = edge.take_stream().ok_or_else(|| {
                Error::internal("streaming edge response lost its readable side")
            })?;
            let mut response = Response::new(status_from(edge.status_code())).with_stream(stream);
            copy_headers(&edge, &mut response);
            Ok(response)
        }
        EdgeOutcome::Rewrite { target, response: edge } => {
            let mut response = proxy_external(&target, request).await?;
            copy_headers(&edge, &mut response);
            Ok(response)
        }
        EdgeOutcome::Next(edge) => {
            // Preflight probes short-circuit with the accumulated headers
            // and an empty body.
            let mut response = Response::ok();
            copy_headers(&edge, &mut response);
            Ok(response)
        }
    }
}

/// Build the preflight answer: 200, accumulated headers, empty body.
pub fn preflight_response(edge: &EdgeResponse) -> Response {
    let mut response = Response::ok();
    copy_headers(edge, &mut response);
    response
}

/// Reverse-proxy an absolute rewrite target.
///
/// The request method, headers and body are forwarded; the `Host` header
/// is dropped so the upstream sees its own origin. The upstream response
/// streams back verbatim.
pub async fn proxy_external(target: &str, request: &Request) -> Result<Response> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
        .map_err(|e| Error::proxy(format!("invalid method {}: {}", request.method, e)))?;

    let mut upstream = PROXY_CLIENT.request(method, target);
    for (name, value) in request.headers() {
        if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        upstream = upstream.header(name, value);
    }
    if !request.body().is_empty() {
        upstream = upstream.body(request.body().to_vec());
    }

    log::debug!("proxying {} {} upstream", request.method, target);
    let upstream_response = upstream
        .send()
        .await
        .map_err(|e| Error::proxy(format!("upstream request to {} failed: {}", target, e)))?;

    let status = upstream_response.status().as_u16();
    let mut response = Response::new(status_from(status));
    for (name, value) in upstream_response.headers() {
        if name.as_str().eq_ignore_ascii_case("transfer-encoding") {
            continue;
        }
        if let Ok(value_str) = value.to_str() {
            response.add_header(name.as_str(), value_str);
        }
    }

    let body_stream = upstream_response
        .bytes_stream()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
    Ok(response.with_stream(hyper::Body::wrap_stream(body_stream)))
}

fn status_from(code: u16) -> hyper::StatusCode {
    hyper::StatusCode::from_u16(code).unwrap_or(hyper::StatusCode::OK)
}
