//! URL model round-trips and boundary behaviors.

use edgekit::url::{
    add_path_prefix, detect_locale, parse_query, strip_base_path, ParsedUrl, QueryValue,
};

#[test]
fn test_root_with_base_path_formats_to_base_path() {
    let mut parsed = ParsedUrl::parse("/").unwrap();
    parsed.base_path = Some("/docs".to_string());
    assert_eq!(parsed.format(), "/docs");
}

#[test]
fn test_root_data_url_decomposes_to_root() {
    let mut parsed = ParsedUrl::parse("/_next/data/build-42/index.json").unwrap();
    assert!(parsed.extract_data_request());
    assert_eq!(parsed.pathname, "/");
    assert_eq!(parsed.build_id.as_deref(), Some("build-42"));
    // ...and reassembles byte-identically
    assert_eq!(parsed.format(), "/_next/data/build-42/index.json");
}

#[test]
fn test_strip_then_restore_base_path_identity() {
    for path in ["/docs", "/docs/deep/nest", "/docs/a?ignored"] {
        let path = path.split('?').next().unwrap();
        let (stripped, had) = strip_base_path(path, "/docs");
        assert!(had, "{} should carry the base path", path);
        assert_eq!(add_path_prefix(&stripped, "/docs"), path);
    }
}

#[test]
fn test_locale_detect_then_prefix_identity() {
    let locales = vec!["en".to_string(), "fr".to_string()];
    for path in ["/fr/about", "/fr", "/en/a/b"] {
        let (stripped, locale) = detect_locale(path, &locales);
        let locale = locale.expect("locale expected");
        let restored = add_path_prefix(&stripped, &format!("/{}", locale));
        assert_eq!(restored, path);
    }
}

#[test]
fn test_format_is_idempotent_under_reparse() {
    for raw in [
        "/a/b?x=1&y=2",
        "/",
        "/path#section",
        "/q?a=1&a=2&b=",
        "/%E2%9C%93",
    ] {
        let once = ParsedUrl::parse(raw).unwrap();
        let twice = ParsedUrl::parse(&once.format()).unwrap();
        assert_eq!(once, twice, "for {}", raw);
        assert_eq!(once.format(), twice.format(), "for {}", raw);
    }
}

#[test]
fn test_loopback_spellings_canonicalize_to_localhost() {
    for raw in [
        "http://127.0.0.1/x",
        "http://127.255.255.254/x",
        "http://[::1]/x",
        "http://LOCALHOST/x",
    ] {
        let parsed = ParsedUrl::parse(raw).unwrap();
        assert_eq!(parsed.host.as_deref(), Some("localhost"), "for {}", raw);
    }
}

#[test]
fn test_repeated_query_keys_stay_ordered() {
    let query = parse_query("tag=a&tag=b&tag=c&single=x").unwrap();
    assert_eq!(
        query.get("tag"),
        Some(&QueryValue::Many(vec![
            "a".to_string(),
            "b".to_string(),
            "c".to_string()
        ]))
    );
    let keys: Vec<&String> = query.keys().collect();
    assert_eq!(keys, ["tag", "single"]);
}

#[test]
fn test_unparseable_input_is_rejected() {
    assert!(ParsedUrl::parse("").is_err());
    assert!(ParsedUrl::parse("/%gg").is_err());
    assert!(ParsedUrl::parse("http://exa mple.com/").is_err());
}
