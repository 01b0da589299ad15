//! Percent-encoding helpers
//!
//! Decoding validates hex digits and UTF-8 and fails with `Error::Decode`,
//! which the routing engine surfaces as a 400. Encoding targets query
//! components and captured path segments.

use crate::error::{Error, Result};
use std::borrow::Cow;

/// Decode percent-escapes in a path or path segment. `+` is left as-is.
pub fn decode(input: &str) -> Result<Cow<'_, str>> {
    if !input.contains('%') {
        return Ok(Cow::Borrowed(input));
    }

    fn hex_value(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'a'..=b'f' => Some(b - b'a' + 10),
            b'A'..=b'F' => Some(b - b'A' + 10),
            _ => None,
        }
    }

    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 3 > bytes.len() {
                return Err(Error::decode(format!("truncated escape in {:?}", input)));
            }
            let (high, low) = match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                (Some(h), Some(l)) => (h, l),
                _ => {
                    return Err(Error::decode(format!("invalid escape in {:?}", input)));
                }
            };
            out.push((high << 4) | low);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(out)
        .map(Cow::Owned)
        .map_err(|_| Error::decode(format!("invalid utf-8 after decoding {:?}", input)))
}

/// Decode a query-string component (`+` means space).
pub fn decode_query_component(input: &str) -> Result<Cow<'_, str>> {
    if input.contains('+') {
        let replaced = input.replace('+', " ");
        return Ok(Cow::Owned(decode(&replaced)?.into_owned()));
    }
    decode(input)
}

/// Percent-encode a query component. Unreserved characters pass through.
pub fn encode(input: &str) -> Cow<'_, str> {
    fn is_unreserved(b: u8) -> bool {
        b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
    }

    if input.bytes().all(is_unreserved) {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len() * 3);
    for b in input.bytes() {
        if is_unreserved(b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    Cow::Owned(out)
}

/// Re-escape path delimiters inside a captured segment so a serialized
/// path round-trips to the same segment boundaries it was captured with.
pub fn escape_path_delimiters(segment: &str) -> Cow<'_, str> {
    if !segment.contains(['/', '?', '#']) {
        return Cow::Borrowed(segment);
    }
    let mut out = String::with_capacity(segment.len() + 4);
    for ch in segment.chars() {
        match ch {
            '/' => out.push_str("%2F"),
            '?' => out.push_str("%3F"),
            '#' => out.push_str("%23"),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_basic() {
        assert_eq!(decode("hello%20world").unwrap(), "hello world");
        assert_eq!(decode("plain").unwrap(), "plain");
        assert_eq!(decode("%E2%9C%93").unwrap(), "\u{2713}");
    }

    #[test]
    fn test_decode_leaves_plus_in_paths() {
        assert_eq!(decode("a+b").unwrap(), "a+b");
        assert_eq!(decode_query_component("a+b").unwrap(), "a b");
    }

    #[test]
    fn test_decode_rejects_invalid() {
        assert!(decode("%zz").is_err());
        assert!(decode("%2").is_err());
        assert!(decode("%").is_err());
        // Overlong / invalid UTF-8 sequences
        assert!(decode("%c0%ae").is_err());
    }

    #[test]
    fn test_encode_round_trip() {
        let original = "a b/c?d";
        let encoded = encode(original);
        assert_eq!(encoded, "a%20b%2Fc%3Fd");
        assert_eq!(decode(&encoded).unwrap(), original);
    }

    #[test]
    fn test_escape_path_delimiters() {
        assert_eq!(escape_path_delimiters("plain"), "plain");
        assert_eq!(escape_path_delimiters("a/b"), "a%2Fb");
        assert_eq!(escape_path_delimiters("q?x#y"), "q%3Fx%23y");
    }
}
