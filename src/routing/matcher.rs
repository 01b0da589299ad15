//! Path pattern matching
//!
//! Patterns support literal segments, `:name` single-segment parameters,
//! `:name*` multi-segment wildcards and `:name?` optional parameters.
//! Matching is case-sensitive on the path. Edge manifests may also supply
//! a pre-built regular expression, which compiles into the same matcher
//! surface.

use crate::error::{Error, Result};
use crate::url::{percent, QueryMap, QueryValue};
use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use std::cmp::Ordering;

/// Captured route parameters. Wildcard captures are ordered lists.
pub type Params = IndexMap<String, QueryValue>;

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Param { name: String, optional: bool },
    Wildcard { name: String },
}

#[derive(Debug, Clone)]
enum MatcherKind {
    Segments(Vec<Segment>),
    Pattern(Regex),
}

/// A compiled path pattern.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    source: String,
    kind: MatcherKind,
}

impl PathMatcher {
    /// Compile a `:name`-style pattern.
    pub fn compile(pattern: &str) -> Result<Self> {
        let mut segments = Vec::new();
        for raw in pattern.trim_start_matches('/').split('/') {
            if raw.is_empty() {
                continue;
            }
            if let Some(param) = raw.strip_prefix(':') {
                if let Some(name) = param.strip_suffix('*') {
                    validate_param_name(name, pattern)?;
                    segments.push(Segment::Wildcard {
                        name: name.to_string(),
                    });
                } else if let Some(name) = param.strip_suffix('?') {
                    validate_param_name(name, pattern)?;
                    segments.push(Segment::Param {
                        name: name.to_string(),
                        optional: true,
                    });
                } else {
                    validate_param_name(param, pattern)?;
                    segments.push(Segment::Param {
                        name: param.to_string(),
                        optional: false,
                    });
                }
            } else {
                segments.push(Segment::Literal(raw.to_string()));
            }
        }
        Ok(Self {
            source: pattern.to_string(),
            kind: MatcherKind::Segments(segments),
        })
    }

    /// Compile a manifest-supplied regular expression. Named capture
    /// groups become params.
    pub fn from_regexp(regexp: &str) -> Result<Self> {
        let re = Regex::new(regexp)
            .map_err(|e| Error::manifest(format!("invalid route regexp {:?}: {}", regexp, e)))?;
        Ok(Self {
            source: regexp.to_string(),
            kind: MatcherKind::Pattern(re),
        })
    }

    /// Compile a page path with bracketed dynamic segments
    /// (`/blog/[slug]`, `/docs/[...path]`, `/all/[[...rest]]`).
    pub fn from_page(page: &str) -> Result<Self> {
        let mut pattern = String::new();
        for raw in page.trim_start_matches('/').split('/') {
            pattern.push('/');
            if let Some(inner) = raw.strip_prefix("[[...").and_then(|s| s.strip_suffix("]]")) {
                pattern.push(':');
                pattern.push_str(inner);
                pattern.push('*');
            } else if let Some(inner) = raw.strip_prefix("[...").and_then(|s| s.strip_suffix("]")) {
                pattern.push(':');
                pattern.push_str(inner);
                pattern.push('*');
            } else if let Some(inner) = raw.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                pattern.push(':');
                pattern.push_str(inner);
            } else {
                pattern.push_str(raw);
            }
        }
        if pattern.is_empty() {
            pattern.push('/');
        }
        Self::compile(&pattern)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Match a path, returning captured params on success.
    ///
    /// Captured values are percent-decoded; malformed escapes surface as
    /// `Error::Decode`.
    pub fn matches(&self, path: &str) -> Result<Option<Params>> {
        match &self.kind {
            MatcherKind::Pattern(re) => Ok(Self::match_regex(re, path)),
            MatcherKind::Segments(segments) => Self::match_segments(segments, path),
        }
    }

    fn match_regex(re: &Regex, path: &str) -> Option<Params> {
        let caps = re.captures(path)?;
        let mut params = Params::new();
        for name in re.capture_names().flatten() {
            if let Some(m) = caps.name(name) {
                params.insert(name.to_string(), QueryValue::Single(m.as_str().to_string()));
            }
        }
        Some(params)
    }

    fn match_segments(segments: &[Segment], path: &str) -> Result<Option<Params>> {
        let parts: Vec<&str> = path
            .trim_start_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        let mut params = Params::new();
        let mut i = 0;

        for (seg_idx, segment) in segments.iter().enumerate() {
            match segment {
                Segment::Literal(lit) => {
                    if parts.get(i) != Some(&lit.as_str()) {
                        return Ok(None);
                    }
                    i += 1;
                }
                Segment::Param { name, optional } => {
                    match parts.get(i) {
                        Some(part) => {
                            params.insert(
                                name.clone(),
                                QueryValue::Single(percent::decode(part)?.into_owned()),
                            );
                            i += 1;
                        }
                        None if *optional => {}
                        None => return Ok(None),
                    }
                }
                Segment::Wildcard { name } => {
                    // A wildcard must be the trailing segment; it swallows
                    // the rest of the path, including nothing.
                    if seg_idx + 1 != segments.len() {
                        return Ok(None);
                    }
                    let mut rest = Vec::new();
                    while i < parts.len() {
                        rest.push(percent::decode(parts[i])?.into_owned());
                        i += 1;
                    }
                    params.insert(name.clone(), QueryValue::Many(rest));
                    return Ok(Some(params));
                }
            }
        }

        if i == parts.len() {
            Ok(Some(params))
        } else {
            Ok(None)
        }
    }

    fn dynamic_count(&self) -> usize {
        match &self.kind {
            MatcherKind::Segments(segments) => segments
                .iter()
                .filter(|s| !matches!(s, Segment::Literal(_)))
                .count(),
            MatcherKind::Pattern(_) => 0,
        }
    }

    fn catch_all_depth(&self) -> usize {
        match &self.kind {
            MatcherKind::Segments(segments) => segments
                .iter()
                .position(|s| matches!(s, Segment::Wildcard { .. }))
                .map(|pos| segments.len() - pos)
                .unwrap_or(0),
            MatcherKind::Pattern(_) => 0,
        }
    }
}

/// Total order over candidate dynamic routes: fewer dynamic segments
/// first, then shallower catch-all, then lexicographic on the source.
pub fn cmp_route_specificity(a: &PathMatcher, b: &PathMatcher) -> Ordering {
    a.dynamic_count()
        .cmp(&b.dynamic_count())
        .then(a.catch_all_depth().cmp(&b.catch_all_depth()))
        .then_with(|| a.source().cmp(b.source()))
}

fn validate_param_name(name: &str, pattern: &str) -> Result<()> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(Error::manifest(format!(
            "invalid parameter name {:?} in pattern {:?}",
            name, pattern
        )));
    }
    Ok(())
}

/// A `has` predicate over request metadata, with optional value capture.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HasPredicate {
    Header { key: String, value: Option<String> },
    Cookie { key: String, value: Option<String> },
    Query { key: String, value: Option<String> },
    Host { value: String },
}

/// The request metadata a `has` predicate can observe.
pub struct HasContext<'a> {
    pub headers: &'a [(String, String)],
    pub cookies: &'a IndexMap<String, String>,
    pub query: &'a QueryMap,
    pub host: Option<&'a str>,
}

impl HasPredicate {
    /// Evaluate against a request, returning captured params on success.
    ///
    /// Without a `value`, the predicate is an existence check and the
    /// observed value is captured under `key`. With a `value`, the whole
    /// observed value must match and named groups are captured.
    pub fn matches(&self, ctx: &HasContext<'_>) -> Result<Option<Params>> {
        let (key, value, observed) = match self {
            HasPredicate::Header { key, value } => {
                let found = ctx
                    .headers
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(key))
                    .map(|(_, v)| v.clone());
                (key.as_str(), value.as_deref(), found)
            }
            HasPredicate::Cookie { key, value } => (
                key.as_str(),
                value.as_deref(),
                ctx.cookies.get(key).cloned(),
            ),
            HasPredicate::Query { key, value } => (
                key.as_str(),
                value.as_deref(),
                ctx.query.get(key).map(|v| v.as_str().to_string()),
            ),
            HasPredicate::Host { value } => {
                ("host", Some(value.as_str()), ctx.host.map(|h| {
                    // Ports never participate in host matching
                    h.split(':').next().unwrap_or(h).to_string()
                }))
            }
        };

        let Some(observed) = observed else {
            return Ok(None);
        };

        match value {
            None => {
                let mut params = Params::new();
                params.insert(key.to_string(), QueryValue::Single(observed));
                Ok(Some(params))
            }
            Some(pattern) => {
                let re = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
                    Error::manifest(format!("invalid has value {:?}: {}", pattern, e))
                })?;
                let Some(caps) = re.captures(&observed) else {
                    return Ok(None);
                };
                let mut params = Params::new();
                for name in re.capture_names().flatten() {
                    if let Some(m) = caps.name(name) {
                        params.insert(
                            name.to_string(),
                            QueryValue::Single(m.as_str().to_string()),
                        );
                    }
                }
                Ok(Some(params))
            }
        }
    }
}

/// Interpolate captured params into a redirect/rewrite destination.
///
/// `:name` takes the captured value (path delimiters re-escaped so the
/// serialized path keeps its segment boundaries); `:name*` joins the list
/// with `/`. Params not consumed by the destination path or its query are
/// appended to the query.
pub fn compile_destination(destination: &str, params: &Params) -> Result<(String, QueryMap)> {
    // Split an absolute destination into its origin and the rest so the
    // origin never receives interpolation.
    let (origin, rest) = match destination.find("://") {
        Some(idx) => {
            let path_start = destination[idx + 3..]
                .find('/')
                .map(|i| idx + 3 + i)
                .unwrap_or(destination.len());
            destination.split_at(path_start)
        }
        None => ("", destination),
    };

    let (path_part, query_part) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };

    let mut used = Vec::new();
    let path = interpolate(path_part, params, &mut used, true)?;

    let mut query = QueryMap::new();
    if let Some(raw_query) = query_part {
        for pair in raw_query.split('&').filter(|p| !p.is_empty()) {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            let value = interpolate(v, params, &mut used, false)?;
            query.insert(k.to_string(), QueryValue::Single(value));
        }
    }

    // Unused captures ride along in the query.
    for (name, value) in params {
        if !used.contains(name) {
            query.insert(name.clone(), value.clone());
        }
    }

    Ok((format!("{}{}", origin, path), query))
}

/// Interpolate `:name` captures into a non-path template (header values,
/// query values). No delimiter escaping.
pub fn interpolate_params(template: &str, params: &Params) -> Result<String> {
    let mut used = Vec::new();
    interpolate(template, params, &mut used, false)
}

fn interpolate(
    template: &str,
    params: &Params,
    used: &mut Vec<String>,
    escape: bool,
) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        if ch != ':' {
            out.push(ch);
            continue;
        }

        let name_start = idx + 1;
        let mut name_end = name_start;
        while let Some(&(j, c)) = chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                name_end = j + c.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let mut wildcard = false;
        if let Some(&(_, '*')) = chars.peek() {
            wildcard = true;
            chars.next();
        }

        let name = &template[name_start..name_end];
        if name.is_empty() {
            out.push(':');
            continue;
        }

        let Some(value) = params.get(name) else {
            return Err(Error::manifest(format!(
                "missing parameter :{} for destination {:?}",
                name, template
            )));
        };
        used.push(name.to_string());

        match value {
            QueryValue::Many(list) => out.push_str(&list.join("/")),
            QueryValue::Single(s) if wildcard => out.push_str(s),
            QueryValue::Single(s) => {
                if escape {
                    out.push_str(&percent::escape_path_delimiters(s));
                } else {
                    out.push_str(s);
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(s: &str) -> QueryValue {
        QueryValue::Single(s.to_string())
    }

    #[test]
    fn test_literal_match() {
        let m = PathMatcher::compile("/about/team").unwrap();
        assert!(m.matches("/about/team").unwrap().is_some());
        assert!(m.matches("/about").unwrap().is_none());
        assert!(m.matches("/about/team/x").unwrap().is_none());
        // Case-sensitive on the path
        assert!(m.matches("/About/team").unwrap().is_none());
    }

    #[test]
    fn test_param_match() {
        let m = PathMatcher::compile("/blog/:slug").unwrap();
        let params = m.matches("/blog/hello-world").unwrap().unwrap();
        assert_eq!(params.get("slug"), Some(&single("hello-world")));
        assert!(m.matches("/blog").unwrap().is_none());
        assert!(m.matches("/blog/a/b").unwrap().is_none());
    }

    #[test]
    fn test_param_decodes_captures() {
        let m = PathMatcher::compile("/blog/:slug").unwrap();
        let params = m.matches("/blog/hello%20world").unwrap().unwrap();
        assert_eq!(params.get("slug"), Some(&single("hello world")));
        assert!(m.matches("/blog/%zz").is_err());
    }

    #[test]
    fn test_optional_param() {
        let m = PathMatcher::compile("/docs/:version?").unwrap();
        assert!(m.matches("/docs").unwrap().is_some());
        let params = m.matches("/docs/v2").unwrap().unwrap();
        assert_eq!(params.get("version"), Some(&single("v2")));
    }

    #[test]
    fn test_wildcard_match() {
        let m = PathMatcher::compile("/files/:path*").unwrap();
        let params = m.matches("/files/a/b/c").unwrap().unwrap();
        assert_eq!(
            params.get("path"),
            Some(&QueryValue::Many(vec![
                "a".to_string(),
                "b".to_string(),
                "c".to_string()
            ]))
        );
        // Zero segments also match
        let params = m.matches("/files").unwrap().unwrap();
        assert_eq!(params.get("path"), Some(&QueryValue::Many(vec![])));
    }

    #[test]
    fn test_page_pattern_compilation() {
        let m = PathMatcher::from_page("/dynamic/[id]").unwrap();
        let params = m.matches("/dynamic/abc123").unwrap().unwrap();
        assert_eq!(params.get("id"), Some(&single("abc123")));

        let m = PathMatcher::from_page("/blog/[...slug]").unwrap();
        assert!(m.matches("/blog/a/b").unwrap().is_some());

        let m = PathMatcher::from_page("/all/[[...rest]]").unwrap();
        assert!(m.matches("/all").unwrap().is_some());
    }

    #[test]
    fn test_regexp_matcher() {
        let m = PathMatcher::from_regexp("^/dynamic/(?P<id>[^/]+)$").unwrap();
        let params = m.matches("/dynamic/xyz").unwrap().unwrap();
        assert_eq!(params.get("id"), Some(&single("xyz")));
        assert!(m.matches("/other").unwrap().is_none());
    }

    #[test]
    fn test_route_specificity_order() {
        let a = PathMatcher::from_page("/blog/about").unwrap();
        let b = PathMatcher::from_page("/blog/[slug]").unwrap();
        let c = PathMatcher::from_page("/blog/[...rest]").unwrap();
        let mut routes = vec![&c, &b, &a];
        routes.sort_by(|x, y| cmp_route_specificity(x, y));
        assert_eq!(routes[0].source(), a.source());
        assert_eq!(routes[1].source(), b.source());
        assert_eq!(routes[2].source(), c.source());
    }

    #[test]
    fn test_has_header_predicate() {
        let headers = vec![("x-bucket".to_string(), "a".to_string())];
        let cookies = IndexMap::new();
        let query = QueryMap::new();
        let ctx = HasContext {
            headers: &headers,
            cookies: &cookies,
            query: &query,
            host: Some("example.com"),
        };

        let exists = HasPredicate::Header {
            key: "X-Bucket".to_string(),
            value: None,
        };
        let params = exists.matches(&ctx).unwrap().unwrap();
        assert_eq!(params.get("X-Bucket"), Some(&single("a")));

        let capture = HasPredicate::Header {
            key: "x-bucket".to_string(),
            value: Some("(?P<bucket>a|b)".to_string()),
        };
        let params = capture.matches(&ctx).unwrap().unwrap();
        assert_eq!(params.get("bucket"), Some(&single("a")));

        let missing = HasPredicate::Header {
            key: "x-other".to_string(),
            value: None,
        };
        assert!(missing.matches(&ctx).unwrap().is_none());
    }

    #[test]
    fn test_has_host_ignores_port() {
        let headers = vec![];
        let cookies = IndexMap::new();
        let query = QueryMap::new();
        let ctx = HasContext {
            headers: &headers,
            cookies: &cookies,
            query: &query,
            host: Some("example.com:3000"),
        };
        let host = HasPredicate::Host {
            value: "example\\.com".to_string(),
        };
        assert!(host.matches(&ctx).unwrap().is_some());
    }

    #[test]
    fn test_compile_destination() {
        let mut params = Params::new();
        params.insert("slug".to_string(), single("hello"));
        let (path, query) = compile_destination("/posts/:slug", &params).unwrap();
        assert_eq!(path, "/posts/hello");
        assert!(query.is_empty());
    }

    #[test]
    fn test_compile_destination_unused_params_go_to_query() {
        let mut params = Params::new();
        params.insert("slug".to_string(), single("hello"));
        params.insert("extra".to_string(), single("1"));
        let (path, query) = compile_destination("/posts/:slug", &params).unwrap();
        assert_eq!(path, "/posts/hello");
        assert_eq!(query.get("extra"), Some(&single("1")));
    }

    #[test]
    fn test_compile_destination_wildcard_and_escaping() {
        let mut params = Params::new();
        params.insert(
            "path".to_string(),
            QueryValue::Many(vec!["a".to_string(), "b".to_string()]),
        );
        let (path, _) = compile_destination("/files/:path*", &params).unwrap();
        assert_eq!(path, "/files/a/b");

        // A captured single segment containing a slash is re-escaped
        let mut params = Params::new();
        params.insert("slug".to_string(), single("a/b"));
        let (path, _) = compile_destination("/posts/:slug", &params).unwrap();
        assert_eq!(path, "/posts/a%2Fb");
    }

    #[test]
    fn test_compile_destination_absolute_origin_untouched() {
        let mut params = Params::new();
        params.insert("id".to_string(), single("7"));
        let (path, _) = compile_destination("https://example.com/items/:id", &params).unwrap();
        assert_eq!(path, "https://example.com/items/7");
    }

    #[test]
    fn test_compile_destination_missing_param_fails() {
        let params = Params::new();
        assert!(compile_destination("/posts/:slug", &params).is_err());
    }
}
