//! Response surface exposed to edge-function code
//!
//! The response is a small state machine. Mutators are allowed until the
//! terminal transition; afterwards they fail with `HeadersSent`. The
//! function's decision (yield, rewrite, redirect) is encoded in sentinel
//! headers that the pipeline strips before anything reaches the client.

use super::{NEXT_SENTINEL, REDIRECT_SENTINEL, REWRITE_SENTINEL};
use crate::error::{Error, Result};
use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;

/// Body state of an edge response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyMode {
    #[default]
    None,
    Buffered,
    Streaming,
    Terminal,
}

/// Options accepted by `cookie` / `clear_cookie`.
#[derive(Debug, Clone, Default)]
pub struct CookieOptions {
    /// Defaults to `/` when unset.
    pub path: Option<String>,
    pub domain: Option<String>,
    /// Milliseconds; converted to whole seconds for `Max-Age` and used to
    /// derive `Expires`.
    pub max_age_ms: Option<i64>,
    pub expires: Option<DateTime<Utc>>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<String>,
}

#[derive(Debug)]
pub struct EdgeResponse {
    headers: Vec<(String, String)>,
    status_code: u16,
    body_mode: BodyMode,
    finished: bool,
    headers_sent: bool,
    buffered: Vec<u8>,
    stream_tx: Option<UnboundedSender<Bytes>>,
    stream_body: Option<hyper::Body>,
    /// Method of the request this response answers; HEAD suppresses
    /// bodies on `send`.
    method: String,
    /// `Referer` of the request, resolved by `location("back")`.
    referrer: Option<String>,
}

impl Default for EdgeResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl EdgeResponse {
    pub fn new() -> Self {
        Self {
            headers: Vec::new(),
            status_code: 200,
            body_mode: BodyMode::None,
            finished: false,
            headers_sent: false,
            buffered: Vec::new(),
            stream_tx: None,
            stream_body: None,
            method: "GET".to_string(),
            referrer: None,
        }
    }

    pub fn for_request(method: &str, referrer: Option<&str>) -> Self {
        let mut response = Self::new();
        response.method = method.to_string();
        response.referrer = referrer.map(|r| r.to_string());
        response
    }

    // --- state observation ---

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn body_mode(&self) -> BodyMode {
        self.body_mode
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn header_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn buffered_body(&self) -> &[u8] {
        &self.buffered
    }

    /// Hand the readable side of the stream to the adapter. Single take.
    pub fn take_stream(&mut self) -> Option<hyper::Body> {
        self.stream_body.take()
    }

    fn guard(&self) -> Result<()> {
        if self.finished {
            return Err(Error::HeadersSent);
        }
        Ok(())
    }

    // --- mutators ---

    pub fn status(&mut self, code: u16) -> Result<&mut Self> {
        self.guard()?;
        self.status_code = code;
        Ok(self)
    }

    /// Set a header, replacing previous values. `Set-Cookie` is always
    /// appended, never replaced. A `Content-Type` without a charset gets
    /// the default charset for its media type appended.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<&mut Self> {
        self.guard()?;

        let mut value = value.to_string();
        if name.eq_ignore_ascii_case("content-type") && !value.to_ascii_lowercase().contains("charset=") {
            let media_type = value.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
            if let Some(charset) = default_charset(&media_type) {
                value = format!("{}; charset={}", value, charset);
            }
        }

        if name.eq_ignore_ascii_case("set-cookie") {
            self.headers.push((name.to_string(), value));
        } else {
            self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
            self.headers.push((name.to_string(), value));
        }
        Ok(self)
    }

    /// Append without replacing.
    pub fn append_header(&mut self, name: &str, value: &str) -> Result<&mut Self> {
        self.guard()?;
        self.headers.push((name.to_string(), value.to_string()));
        Ok(self)
    }

    pub fn set_headers(&mut self, entries: &[(&str, &str)]) -> Result<&mut Self> {
        for (name, value) in entries {
            self.set_header(name, value)?;
        }
        Ok(self)
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// Set a cookie. String values are stored raw; any other JSON value
    /// is encoded as `j:<json>`. The path defaults to `/`.
    pub fn cookie(
        &mut self,
        name: &str,
        value: &serde_json::Value,
        opts: &CookieOptions,
    ) -> Result<&mut Self> {
        self.guard()?;
        let encoded = match value {
            serde_json::Value::String(s) => s.clone(),
            other => format!("j:{}", serde_json::to_string(other)?),
        };
        let serialized = serialize_cookie(name, &encoded, opts);
        self.headers.push(("Set-Cookie".to_string(), serialized));
        Ok(self)
    }

    /// Expire a cookie immediately, keeping path/domain so the browser
    /// matches the original.
    pub fn clear_cookie(&mut self, name: &str, opts: &CookieOptions) -> Result<&mut Self> {
        self.guard()?;
        let mut opts = opts.clone();
        opts.max_age_ms = None;
        opts.expires = Some(DateTime::<Utc>::from_timestamp(0, 0).unwrap_or_else(Utc::now));
        let serialized = serialize_cookie(name, "", &opts);
        self.headers.push(("Set-Cookie".to_string(), serialized));
        Ok(self)
    }

    /// Enqueue a chunk into the streaming body. The first call commits
    /// the headers and transitions to streaming.
    pub fn write(&mut self, chunk: impl Into<Bytes>) -> Result<&mut Self> {
        self.guard()?;
        match self.body_mode {
            BodyMode::None => {
                let (tx, rx) = unbounded::<Bytes>();
                self.stream_body = Some(hyper::Body::wrap_stream(
                    rx.map(Ok::<Bytes, std::convert::Infallible>),
                ));
                self.stream_tx = Some(tx);
                self.body_mode = BodyMode::Streaming;
                self.headers_sent = true;
            }
            BodyMode::Streaming => {}
            BodyMode::Buffered | BodyMode::Terminal => {
                return Err(Error::HeadersSent);
            }
        }
        if let Some(tx) = &self.stream_tx {
            // Receiver dropped means the client went away; writing after
            // that is not an error for the function.
            let _ = tx.unbounded_send(chunk.into());
        }
        Ok(self)
    }

    /// Buffer a complete body and end the response.
    ///
    /// Objects are JSON-encoded with `application/json`; strings and raw
    /// bytes default to `text/plain`. `Content-Length` is set, and the
    /// body is suppressed for 204/205/304 and for HEAD requests.
    pub fn send(&mut self, data: &serde_json::Value) -> Result<()> {
        self.guard()?;
        if self.body_mode == BodyMode::Streaming {
            return Err(Error::HeadersSent);
        }

        let (bytes, content_type) = match data {
            serde_json::Value::String(s) => {
                (s.clone().into_bytes(), "text/plain; charset=utf-8")
            }
            other => (serde_json::to_vec(other)?, "application/json"),
        };
        self.send_bytes(bytes, content_type)
    }

    /// `send` for pre-encoded text.
    pub fn send_text(&mut self, data: &str) -> Result<()> {
        self.guard()?;
        if self.body_mode == BodyMode::Streaming {
            return Err(Error::HeadersSent);
        }
        self.send_bytes(data.as_bytes().to_vec(), "text/plain; charset=utf-8")
    }

    fn send_bytes(&mut self, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        if self.header("content-type").is_none() {
            self.set_header("Content-Type", content_type)?;
        }

        let suppress_body =
            matches!(self.status_code, 204 | 205 | 304) || self.method.eq_ignore_ascii_case("HEAD");
        if suppress_body {
            self.remove_header("Content-Length");
        } else {
            self.set_header("Content-Length", &bytes.len().to_string())?;
            self.buffered = bytes;
        }

        self.body_mode = BodyMode::Buffered;
        self.end()
    }

    /// Resolve a redirect target. The literal `"back"` resolves to the
    /// `Referer` header, falling back to `/`.
    pub fn location(&self, url: &str) -> String {
        if url == "back" {
            return self.referrer.clone().unwrap_or_else(|| "/".to_string());
        }
        url.to_string()
    }

    /// Redirect with the default 302.
    pub fn redirect(&mut self, url: &str) -> Result<()> {
        self.redirect_with_status(302, url)
    }

    /// Redirect with an explicit status. After `send`/`write` the
    /// sentinel no-ops: the first writer won.
    pub fn redirect_with_status(&mut self, status: u16, url: &str) -> Result<()> {
        self.guard()?;
        if self.body_mode != BodyMode::None {
            log::debug!("redirect({}) ignored: body already {:?}", url, self.body_mode);
            return Ok(());
        }
        let target = self.location(url);
        self.status_code = status;
        self.set_header(REDIRECT_SENTINEL, &target)?;
        self.terminate()
    }

    /// Rewrite to another path or URL. Same first-writer-wins rule as
    /// `redirect`.
    pub fn rewrite(&mut self, url: &str) -> Result<()> {
        self.guard()?;
        if self.body_mode != BodyMode::None {
            log::debug!("rewrite({}) ignored: body already {:?}", url, self.body_mode);
            return Ok(());
        }
        self.set_header(REWRITE_SENTINEL, url)?;
        self.terminate()
    }

    /// Yield to the next matching function / routing stage.
    pub fn next(&mut self) -> Result<()> {
        self.guard()?;
        self.set_header(NEXT_SENTINEL, "1")?;
        self.terminate()
    }

    fn terminate(&mut self) -> Result<()> {
        self.body_mode = BodyMode::Terminal;
        self.end()
    }

    /// Terminal transition. A second call fails with `HeadersSent`.
    pub fn end(&mut self) -> Result<()> {
        if self.finished {
            return Err(Error::HeadersSent);
        }
        self.finished = true;
        if !self.headers_sent {
            self.headers_sent = true;
            log::trace!("edge response headers sent, body mode {:?}", self.body_mode);
        }
        self.stream_tx = None;
        Ok(())
    }

    /// End an in-progress stream with a final chunk.
    pub fn end_with(&mut self, chunk: impl Into<Bytes>) -> Result<()> {
        self.write(chunk)?;
        self.end()
    }

    /// Host-side diagnostic header write. Bypasses the finished guard:
    /// the host annotates responses after user code is done with them.
    pub(crate) fn set_diagnostic_header(&mut self, name: &str, value: &str) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
    }

    /// Merge headers accumulated by a previous invocation into this one,
    /// skipping decision sentinels so each function decides afresh.
    pub fn inherit_headers(&mut self, previous: &EdgeResponse) {
        for (name, value) in &previous.headers {
            if name.eq_ignore_ascii_case(NEXT_SENTINEL)
                || name.eq_ignore_ascii_case(REWRITE_SENTINEL)
                || name.eq_ignore_ascii_case(REDIRECT_SENTINEL)
            {
                continue;
            }
            self.headers.push((name.clone(), value.clone()));
        }
    }
}

/// Default charset for a media type when `Content-Type` omits one.
fn default_charset(media_type: &str) -> Option<&'static str> {
    if media_type.starts_with("text/") {
        return Some("utf-8");
    }
    match media_type {
        "application/json" | "application/javascript" | "application/xml" => Some("utf-8"),
        _ => None,
    }
}

/// Serialize a `Set-Cookie` value. `max_age_ms` is converted to whole
/// seconds, and an `Expires` is derived from it when none is given.
fn serialize_cookie(name: &str, value: &str, opts: &CookieOptions) -> String {
    let mut out = format!("{}={}", name, crate::url::percent::encode(value));

    out.push_str("; Path=");
    out.push_str(opts.path.as_deref().unwrap_or("/"));

    if let Some(domain) = &opts.domain {
        out.push_str("; Domain=");
        out.push_str(domain);
    }

    let mut expires = opts.expires;
    if let Some(max_age_ms) = opts.max_age_ms {
        let seconds = max_age_ms / 1000;
        out.push_str(&format!("; Max-Age={}", seconds));
        if expires.is_none() {
            expires = Some(Utc::now() + ChronoDuration::seconds(seconds));
        }
    }
    if let Some(expires) = expires {
        out.push_str("; Expires=");
        out.push_str(&expires.format("%a, %d %b %Y %H:%M:%S GMT").to_string());
    }

    if opts.http_only {
        out.push_str("; HttpOnly");
    }
    if opts.secure {
        out.push_str("; Secure");
    }
    if let Some(same_site) = &opts.same_site {
        out.push_str("; SameSite=");
        out.push_str(same_site);
    }
    out
}
