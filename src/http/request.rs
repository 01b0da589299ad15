use crate::error::Result;
use hyper::{Body, Request as HyperRequest};
use indexmap::IndexMap;
use once_cell::sync::OnceCell;

/// Incoming request as seen by the routing engine.
///
/// Headers are kept raw (original casing, original order) and looked up
/// case-insensitively on demand. Cookies are parsed from the `Cookie`
/// header on first access and memoized.
pub struct Request {
    pub method: String,
    pub uri: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    cookies: OnceCell<IndexMap<String, String>>,
}

impl Request {
    pub fn new(method: &str, uri: &str) -> Self {
        Self {
            method: method.to_string(),
            uri: uri.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
            cookies: OnceCell::new(),
        }
    }

    pub async fn from_hyper(req: HyperRequest<Body>) -> Result<Self> {
        let method = req.method().to_string();
        let uri = req.uri().to_string();

        let mut headers = Vec::with_capacity(req.headers().len());
        for (name, value) in req.headers() {
            if let Ok(value_str) = value.to_str() {
                headers.push((name.to_string(), value_str.to_string()));
            }
        }

        let body = hyper::body::to_bytes(req.into_body()).await?.to_vec();

        Ok(Self {
            method,
            uri,
            headers,
            body,
            cookies: OnceCell::new(),
        })
    }

    /// Attach a header (used by tests and by nested pipeline requests).
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// First value of a header, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values of a header in arrival order.
    pub fn header_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    /// Raw header list in arrival order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn host(&self) -> Option<&str> {
        self.header("host")
    }

    pub fn referrer(&self) -> Option<&str> {
        self.header("referer")
    }

    /// Parsed cookies, memoized on first access.
    pub fn cookies(&self) -> &IndexMap<String, String> {
        self.cookies.get_or_init(|| {
            self.header("cookie")
                .map(parse_cookie_header)
                .unwrap_or_default()
        })
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies().get(name).map(|s| s.as_str())
    }

    /// Request path without the query string.
    pub fn path(&self) -> &str {
        let uri = &self.uri;
        let without_scheme = match uri.find("://") {
            Some(idx) => {
                let after = &uri[idx + 3..];
                match after.find('/') {
                    Some(slash) => &after[slash..],
                    None => "/",
                }
            }
            None => uri,
        };
        match without_scheme.find('?') {
            Some(q) => &without_scheme[..q],
            None => without_scheme,
        }
    }

    /// An `OPTIONS` probe carrying the preflight sentinel header.
    pub fn is_preflight(&self) -> bool {
        self.method.eq_ignore_ascii_case("OPTIONS") && self.has_header("x-nextjs-preflight")
    }
}

/// Parse a `Cookie` header into name/value pairs, preserving order.
fn parse_cookie_header(header: &str) -> IndexMap<String, String> {
    let mut cookies = IndexMap::new();
    for pair in header.split(';') {
        let pair = pair.trim();
        if let Some((name, value)) = pair.split_once('=') {
            cookies.insert(name.trim().to_string(), value.trim().to_string());
        }
    }
    cookies
}
