//! Locale detection and path normalization
//!
//! A locale is a path-segment-encoded language identifier. Detection runs
//! against the first segment (case-insensitively, reporting the configured
//! spelling), against the `NEXT_LOCALE` cookie, and against the first
//! `Accept-Language` entry. Domain-level overrides come from the i18n
//! section of the routes manifest.

use serde::Deserialize;

/// Domain-locale override from the i18n manifest section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainLocale {
    pub domain: String,
    pub default_locale: String,
    #[serde(default)]
    pub locales: Vec<String>,
    #[serde(default)]
    pub http: bool,
}

/// Detect a locale as the first path segment.
///
/// Comparison is case-insensitive; the returned locale is the configured
/// spelling, and the returned pathname has the segment stripped.
pub fn detect_locale(pathname: &str, locales: &[String]) -> (String, Option<String>) {
    let trimmed = pathname.trim_start_matches('/');
    let first = trimmed.split('/').next().unwrap_or("");
    if first.is_empty() {
        return (pathname.to_string(), None);
    }

    for locale in locales {
        if locale.eq_ignore_ascii_case(first) {
            let rest = &trimmed[first.len()..];
            let stripped = if rest.is_empty() {
                "/".to_string()
            } else {
                rest.to_string()
            };
            return (stripped, Some(locale.clone()));
        }
    }
    (pathname.to_string(), None)
}

/// Strip a locale prefix if present, reporting which one was removed.
pub fn normalize_locale_path(pathname: &str, locales: &[String]) -> (String, Option<String>) {
    detect_locale(pathname, locales)
}

/// Re-attach a locale prefix unless it is the default locale or the path
/// is an API route (locale is absent on `/api`).
pub fn add_locale(
    pathname: &str,
    locale: &str,
    default_locale: Option<&str>,
) -> String {
    if Some(locale) == default_locale {
        return pathname.to_string();
    }
    if pathname == "/api" || pathname.starts_with("/api/") {
        return pathname.to_string();
    }
    super::add_path_prefix(pathname, &format!("/{}", locale))
}

/// Locale preference from the `NEXT_LOCALE` cookie.
pub fn locale_from_cookie<'a>(
    cookie_value: Option<&str>,
    locales: &'a [String],
) -> Option<&'a str> {
    let wanted = cookie_value?;
    locales
        .iter()
        .find(|l| l.eq_ignore_ascii_case(wanted))
        .map(|l| l.as_str())
}

/// First configured locale matching the `Accept-Language` header.
///
/// Entries are considered in header order; q-values are ignored beyond
/// the ordering the client already provided.
pub fn locale_from_accept_language<'a>(
    header: Option<&str>,
    locales: &'a [String],
) -> Option<&'a str> {
    let header = header?;
    for entry in header.split(',') {
        let tag = entry.split(';').next().unwrap_or("").trim();
        if tag.is_empty() {
            continue;
        }
        // Exact tag first, then the primary subtag ("en-US" -> "en")
        if let Some(found) = locales.iter().find(|l| l.eq_ignore_ascii_case(tag)) {
            return Some(found.as_str());
        }
        let primary = tag.split('-').next().unwrap_or(tag);
        if let Some(found) = locales.iter().find(|l| l.eq_ignore_ascii_case(primary)) {
            return Some(found.as_str());
        }
    }
    None
}

/// Domain-level locale override for a request host.
pub fn detect_domain_locale<'a>(
    domains: &'a [DomainLocale],
    host: Option<&str>,
) -> Option<&'a DomainLocale> {
    let host = host?.split(':').next()?;
    domains
        .iter()
        .find(|d| d.domain.eq_ignore_ascii_case(host))
}
