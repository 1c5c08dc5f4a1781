//! Body and header decoding helpers
//!
//! Everything here is best effort. Decompression and JSON failures are
//! swallowed and show up only as a missing or degraded field.

use std::collections::BTreeMap;
use std::io::Read;

use flate2::read::MultiGzDecoder;

use crate::core::event::{header, HeaderValue, Headers, HttpBody};
use super::types::RawHeaders;

/// Build the event header map.
///
/// Repeated headers are joined with `", "`; names compare case-insensitively
/// and keep the spelling of their first occurrence. `Cookie` values are
/// expanded into name/value pairs.
pub fn build_headers(raw: &RawHeaders) -> Headers {
    let mut joined: Vec<(String, String)> = Vec::with_capacity(raw.len());
    for (name, value) in raw {
        match joined.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            Some((_, existing)) => {
                let sep = if name.eq_ignore_ascii_case("cookie") { "; " } else { ", " };
                existing.push_str(sep);
                existing.push_str(value);
            }
            None => joined.push((name.clone(), value.clone())),
        }
    }

    joined
        .into_iter()
        .map(|(name, value)| {
            let value = if name.eq_ignore_ascii_case("cookie") {
                HeaderValue::Cookies(parse_cookies(&value))
            } else {
                HeaderValue::Text(value)
            };
            (name, value)
        })
        .collect()
}

/// Parse a `Cookie` header into pairs; entries without `=` are skipped
pub fn parse_cookies(value: &str) -> BTreeMap<String, String> {
    value
        .split(';')
        .filter_map(|pair| {
            let (name, val) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            let val = val.trim();
            let val = val
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(val);
            Some((name.to_string(), val.to_string()))
        })
        .collect()
}

/// `Content-Encoding`, or `Accept-Encoding` when the former is absent,
/// mentions gzip
pub fn is_gzipped(headers: &Headers) -> bool {
    header(headers, "content-encoding")
        .or_else(|| header(headers, "accept-encoding"))
        .is_some_and(|enc| enc.to_ascii_lowercase().contains("gzip"))
}

/// Decompress a gzip stream; `None` if the data is not valid gzip
pub fn gunzip(data: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    MultiGzDecoder::new(data).read_to_end(&mut out).ok()?;
    Some(out)
}

/// Body text, decompressed when the headers say gzip and the data allows it
pub fn decode_text(data: &[u8], gzipped: bool) -> String {
    if gzipped {
        if let Some(plain) = gunzip(data) {
            return String::from_utf8_lossy(&plain).into_owned();
        }
    }
    String::from_utf8_lossy(data).into_owned()
}

pub fn parse_json(text: &str) -> Option<serde_json::Value> {
    serde_json::from_str(text).ok()
}

/// Decode a completed message body for an event.
///
/// An empty buffer yields an empty [`HttpBody`].
pub fn decode_body(buffer: Vec<u8>, headers: &Headers) -> HttpBody {
    if buffer.is_empty() {
        return HttpBody::default();
    }

    let text = decode_text(&buffer, is_gzipped(headers));
    let json = parse_json(&text);
    HttpBody {
        buffer: Some(buffer),
        parse_body: Some(text),
        json,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn raw(pairs: &[(&str, &str)]) -> RawHeaders {
        pairs.iter().map(|(n, v)| (n.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_gzip_body_round_trip() {
        let headers = build_headers(&raw(&[("Content-Encoding", "gzip")]));
        let body = decode_body(gzip(b"{\"ok\":true}"), &headers);
        assert_eq!(body.parse_body.as_deref(), Some("{\"ok\":true}"));
        assert_eq!(body.json, Some(serde_json::json!({"ok": true})));
    }

    #[test]
    fn test_bad_gzip_falls_back_to_raw_text() {
        let headers = build_headers(&raw(&[("Content-Encoding", "GZIP")]));
        let body = decode_body(b"not really gzip".to_vec(), &headers);
        assert_eq!(body.buffer.as_deref(), Some(&b"not really gzip"[..]));
        assert_eq!(body.parse_body.as_deref(), Some("not really gzip"));
        assert_eq!(body.json, None);
    }

    #[test]
    fn test_accept_encoding_only_used_without_content_encoding() {
        let accept = build_headers(&raw(&[("Accept-Encoding", "gzip, deflate")]));
        assert!(is_gzipped(&accept));

        let identity = build_headers(&raw(&[
            ("Accept-Encoding", "gzip"),
            ("Content-Encoding", "identity"),
        ]));
        assert!(!is_gzipped(&identity));
    }

    #[test]
    fn test_empty_body_has_no_fields() {
        assert_eq!(decode_body(Vec::new(), &Headers::new()), HttpBody::default());
    }

    #[test]
    fn test_cookie_expansion_and_duplicate_headers() {
        let headers = build_headers(&raw(&[
            ("Cookie", "session=abc123; theme=\"dark\""),
            ("Accept", "text/html"),
            ("accept", "application/json"),
            ("cookie", "lang=en"),
        ]));

        match &headers["Cookie"] {
            HeaderValue::Cookies(c) => {
                assert_eq!(c["session"], "abc123");
                assert_eq!(c["theme"], "dark");
                assert_eq!(c["lang"], "en");
            }
            other => panic!("cookie not expanded: {:?}", other),
        }
        assert_eq!(header(&headers, "accept"), Some("text/html, application/json"));
    }

    #[test]
    fn test_parse_cookies_skips_garbage() {
        let cookies = parse_cookies("a=1; novalue; =x; b = 2 ");
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies["b"], "2");
    }
}
