//! Shared URL model for routing and edge code
//!
//! A parsed URL carries the framework-specific fields (base path, locale,
//! build id, matched page) alongside the usual components. Routing owns one
//! `ParsedUrl` per request; handlers receive it by reference and may mutate
//! `pathname`/`query`, with the engine restoring it when a handler does not
//! finish.

pub mod base_path;
pub mod locale;
pub mod percent;

use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub use base_path::{add_path_prefix, path_has_prefix, strip_base_path};
pub use locale::{detect_locale, normalize_locale_path};

/// A query-string value: a single string or an ordered list of strings
/// for repeated keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryValue {
    Single(String),
    Many(Vec<String>),
}

impl QueryValue {
    /// First value (the whole value for `Single`).
    pub fn as_str(&self) -> &str {
        match self {
            QueryValue::Single(s) => s,
            QueryValue::Many(v) => v.first().map(|s| s.as_str()).unwrap_or(""),
        }
    }

    pub fn as_list(&self) -> Vec<&str> {
        match self {
            QueryValue::Single(s) => vec![s.as_str()],
            QueryValue::Many(v) => v.iter().map(|s| s.as_str()).collect(),
        }
    }

    fn push(&mut self, value: String) {
        match self {
            QueryValue::Single(existing) => {
                *self = QueryValue::Many(vec![std::mem::take(existing), value]);
            }
            QueryValue::Many(list) => list.push(value),
        }
    }
}

impl From<&str> for QueryValue {
    fn from(s: &str) -> Self {
        QueryValue::Single(s.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(s: String) -> Self {
        QueryValue::Single(s)
    }
}

/// Insertion-ordered query map. Order is observable through `format`.
pub type QueryMap = IndexMap<String, QueryValue>;

/// Parsed URL with framework fields.
///
/// Invariants: `pathname` always starts with `/` and never contains the
/// query or hash; `base_path` is stored separately and never duplicated in
/// `pathname`; `params` values are already percent-decoded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedUrl {
    pub protocol: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub pathname: String,
    pub query: QueryMap,
    pub hash: Option<String>,
    pub base_path: Option<String>,
    pub locale: Option<String>,
    pub default_locale: Option<String>,
    pub build_id: Option<String>,
    pub page: Option<String>,
    pub params: IndexMap<String, QueryValue>,
    pub preflight: bool,
}

impl ParsedUrl {
    /// Parse a request target or absolute URL.
    ///
    /// Loopback hosts (IPv4 loopback range, `[::1]`, the literal
    /// `localhost`) are canonicalized to `localhost` before parsing so
    /// that downstream comparisons see one spelling.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::decode("empty url"));
        }

        if raw.starts_with('/') {
            return Self::parse_relative(raw);
        }

        let canonical = canonicalize_localhost(raw);
        let parsed = url::Url::parse(&canonical)
            .map_err(|e| Error::decode(format!("invalid url {}: {}", raw, e)))?;

        let mut out = Self::parse_relative(&match parsed.query() {
            Some(q) => format!("{}?{}", parsed.path(), q),
            None => parsed.path().to_string(),
        })?;
        out.protocol = Some(parsed.scheme().to_string());
        out.host = parsed.host_str().map(|h| h.to_string());
        out.port = parsed.port();
        out.hash = parsed.fragment().map(|f| f.to_string());
        Ok(out)
    }

    /// Parse a path-relative target (`/path?query#hash`).
    fn parse_relative(raw: &str) -> Result<Self> {
        let (without_hash, hash) = match raw.split_once('#') {
            Some((p, h)) => (p, Some(h.to_string())),
            None => (raw, None),
        };
        let (pathname, query_str) = match without_hash.split_once('?') {
            Some((p, q)) => (p, q),
            None => (without_hash, ""),
        };

        // Reject raw paths that cannot be percent-decoded up front so a
        // malformed request fails with 400 instead of surprising a handler.
        percent::decode(pathname)?;

        Ok(Self {
            pathname: pathname.to_string(),
            query: parse_query(query_str)?,
            hash,
            ..Default::default()
        })
    }

    /// Pathname with the base path re-attached, when one was stripped.
    pub fn pathname_with_base_path(&self) -> String {
        match &self.base_path {
            Some(bp) if !bp.is_empty() => add_path_prefix(&self.pathname, bp),
            _ => self.pathname.clone(),
        }
    }

    /// Decompose a `/_next/data/<buildId>/<path>.json` data request into
    /// its build id and cleaned pathname. Returns false when the pathname
    /// is not a data request.
    pub fn extract_data_request(&mut self) -> bool {
        let Some(rest) = self.pathname.strip_prefix("/_next/data/") else {
            return false;
        };
        let Some((build_id, page_path)) = rest.split_once('/') else {
            return false;
        };
        let Some(trimmed) = page_path.strip_suffix(".json") else {
            return false;
        };

        self.build_id = Some(build_id.to_string());
        self.pathname = if trimmed == "index" {
            "/".to_string()
        } else {
            format!("/{}", trimmed)
        };
        true
    }

    /// Rebuild the canonical URL string.
    ///
    /// Data requests are reassembled under `/_next/data/<buildId>/`; the
    /// locale is prefixed when it differs from the default; the base path
    /// is prepended last.
    pub fn format(&self) -> String {
        let mut pathname = self.pathname.clone();

        if let Some(build_id) = &self.build_id {
            let page = if pathname == "/" {
                "/index".to_string()
            } else {
                pathname
            };
            pathname = format!("/_next/data/{}{}.json", build_id, page);
        } else if let Some(loc) = &self.locale {
            if Some(loc) != self.default_locale.as_ref() {
                pathname = add_path_prefix(&pathname, &format!("/{}", loc));
            }
        }

        if let Some(bp) = &self.base_path {
            if !bp.is_empty() {
                pathname = add_path_prefix(&pathname, bp);
            }
        }

        let mut out = String::new();
        if let (Some(protocol), Some(host)) = (&self.protocol, &self.host) {
            out.push_str(protocol);
            out.push_str("://");
            out.push_str(host);
            if let Some(port) = self.port {
                out.push_str(&format!(":{}", port));
            }
        }
        out.push_str(&pathname);

        let query = format_query(&self.query);
        if !query.is_empty() {
            out.push('?');
            out.push_str(&query);
        }
        if let Some(hash) = &self.hash {
            out.push('#');
            out.push_str(hash);
        }
        out
    }

    /// Convenience accessor for a single-valued query entry.
    pub fn query_str(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(|v| v.as_str())
    }
}

/// Canonicalize loopback hosts to `localhost` in an absolute URL string.
fn canonicalize_localhost(raw: &str) -> String {
    let Some(scheme_end) = raw.find("://") else {
        return raw.to_string();
    };
    let authority_start = scheme_end + 3;
    let authority_end = raw[authority_start..]
        .find(['/', '?', '#'])
        .map(|i| authority_start + i)
        .unwrap_or(raw.len());
    let authority = &raw[authority_start..authority_end];

    let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
        // Bracketed IPv6 literal
        match rest.split_once(']') {
            Some((h, p)) => (format!("[{}]", h), p.to_string()),
            None => (authority.to_string(), String::new()),
        }
    } else {
        match authority.rsplit_once(':') {
            Some((h, p)) => (h.to_string(), format!(":{}", p)),
            None => (authority.to_string(), String::new()),
        }
    };

    let is_loopback = host.eq_ignore_ascii_case("localhost")
        || host == "[::1]"
        || host
            .parse::<std::net::Ipv4Addr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false);

    if is_loopback {
        format!(
            "{}localhost{}{}",
            &raw[..authority_start],
            port,
            &raw[authority_end..]
        )
    } else {
        raw.to_string()
    }
}

/// Parse a query string into an ordered map, accumulating repeated keys.
pub fn parse_query(query: &str) -> Result<QueryMap> {
    let mut out = QueryMap::new();
    if query.is_empty() {
        return Ok(out);
    }

    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = percent::decode_query_component(key)?.into_owned();
        let value = percent::decode_query_component(value)?.into_owned();
        match out.get_mut(&key) {
            Some(existing) => existing.push(value),
            None => {
                out.insert(key, QueryValue::Single(value));
            }
        }
    }
    Ok(out)
}

/// Serialize a query map, percent-encoding keys and values.
pub fn format_query(query: &QueryMap) -> String {
    let mut parts = Vec::new();
    for (key, value) in query {
        match value {
            QueryValue::Single(v) => {
                parts.push(format!("{}={}", percent::encode(key), percent::encode(v)));
            }
            QueryValue::Many(list) => {
                for v in list {
                    parts.push(format!("{}={}", percent::encode(key), percent::encode(v)));
                }
            }
        }
    }
    parts.join("&")
}
