use crate::url::ParsedUrl;
use indexmap::IndexMap;
use once_cell::sync::OnceCell;

/// Request surface exposed to edge-function code.
///
/// The URL carries the matched page and captured params; cookies are
/// parsed lazily from the `Cookie` header and memoized.
pub struct EdgeRequest {
    pub method: String,
    pub url: ParsedUrl,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    cookies: OnceCell<IndexMap<String, String>>,
}

impl EdgeRequest {
    pub fn new(method: &str, url: ParsedUrl) -> Self {
        Self {
            method: method.to_string(),
            url,
            headers: Vec::new(),
            body: Vec::new(),
            cookies: OnceCell::new(),
        }
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn cookies(&self) -> &IndexMap<String, String> {
        self.cookies.get_or_init(|| {
            let mut cookies = IndexMap::new();
            if let Some(header) = self.header("cookie") {
                for pair in header.split(';') {
                    if let Some((name, value)) = pair.trim().split_once('=') {
                        cookies.insert(name.trim().to_string(), value.trim().to_string());
                    }
                }
            }
            cookies
        })
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies().get(name).map(|s| s.as_str())
    }

    pub fn referrer(&self) -> Option<&str> {
        self.header("referer")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_fields_visible_to_edge_code() {
        let mut url = ParsedUrl::parse("/dynamic/abc123").unwrap();
        url.page = Some("/dynamic/[id]".to_string());
        url.params
            .insert("id".to_string(), crate::url::QueryValue::Single("abc123".into()));

        let req = EdgeRequest::new("GET", url);
        assert_eq!(req.url.pathname, "/dynamic/abc123");
        assert_eq!(req.url.page.as_deref(), Some("/dynamic/[id]"));
        assert_eq!(req.url.params.get("id").map(|v| v.as_str()), Some("abc123"));
    }

    #[test]
    fn test_lazy_cookie_access() {
        let req = EdgeRequest::new("GET", ParsedUrl::parse("/").unwrap())
            .with_headers(vec![("Cookie".to_string(), "bucket=a; id=7".to_string())]);
        assert_eq!(req.cookie("bucket"), Some("a"));
        assert_eq!(req.cookie("id"), Some("7"));
        assert_eq!(req.cookie("none"), None);
    }
}
