//! Base-path handling
//!
//! The base path is a fixed prefix under which the whole application is
//! mounted. It is stripped before filesystem and page matching and kept
//! for custom-route matching, so both spellings of a pathname exist during
//! routing.

/// Prepend `prefix` to `path`.
///
/// Inputs missing the leading `/` are passed through unchanged; they are
/// not paths this server owns.
pub fn add_path_prefix(path: &str, prefix: &str) -> String {
    if prefix.is_empty() || !path.starts_with('/') {
        return path.to_string();
    }
    if path == "/" {
        return prefix.to_string();
    }
    format!("{}{}", prefix, path)
}

/// Whether `path` carries `prefix` as a whole-segment prefix.
pub fn path_has_prefix(path: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    path == prefix || path.starts_with(&format!("{}/", prefix))
}

/// Strip `base_path` from `path`.
///
/// Returns the stripped path and whether the prefix was present. The
/// remainder of an exact match is `/`.
pub fn strip_base_path(path: &str, base_path: &str) -> (String, bool) {
    if base_path.is_empty() {
        return (path.to_string(), true);
    }
    if path == base_path {
        return ("/".to_string(), true);
    }
    if let Some(rest) = path.strip_prefix(base_path) {
        if rest.starts_with('/') {
            return (rest.to_string(), true);
        }
    }
    (path.to_string(), false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_path_prefix() {
        assert_eq!(add_path_prefix("/about", "/docs"), "/docs/about");
        assert_eq!(add_path_prefix("/", "/docs"), "/docs");
        assert_eq!(add_path_prefix("/about", ""), "/about");
        // Not a rooted path: unchanged
        assert_eq!(add_path_prefix("about", "/docs"), "about");
        assert_eq!(add_path_prefix("mailto:x@y.z", "/docs"), "mailto:x@y.z");
    }

    #[test]
    fn test_strip_base_path() {
        assert_eq!(
            strip_base_path("/docs/about", "/docs"),
            ("/about".to_string(), true)
        );
        assert_eq!(strip_base_path("/docs", "/docs"), ("/".to_string(), true));
        assert_eq!(
            strip_base_path("/other/about", "/docs"),
            ("/other/about".to_string(), false)
        );
        // Prefix must match on a segment boundary
        assert_eq!(
            strip_base_path("/docsify", "/docs"),
            ("/docsify".to_string(), false)
        );
    }

    #[test]
    fn test_strip_then_restore_is_identity() {
        for path in ["/docs", "/docs/about", "/docs/a/b"] {
            let (stripped, had) = strip_base_path(path, "/docs");
            assert!(had);
            assert_eq!(add_path_prefix(&stripped, "/docs"), path);
        }
    }

    #[test]
    fn test_path_has_prefix() {
        assert!(path_has_prefix("/docs/about", "/docs"));
        assert!(path_has_prefix("/docs", "/docs"));
        assert!(!path_has_prefix("/docsify", "/docs"));
        assert!(path_has_prefix("/anything", ""));
    }
}
