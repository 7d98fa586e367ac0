//! HTTP request head parser
//!
//! Line-oriented parsing of the request line and header block. The caller
//! accumulates bytes from the connection and retries until the blank line
//! arrives; body bytes are never touched here. Multipart bodies stream
//! through `squall_multipart`, urlencoded bodies decode via
//! [`parse_urlencoded`].

use crate::request::{urldecode, Method, Request};
use crate::{Error, Result};
use std::collections::HashMap;

/// Upper bound on the request head, matching common server defaults.
pub const MAX_HEAD_LEN: usize = 16 * 1024;

/// Parse an HTTP/1.1 request head out of an accumulating buffer.
///
/// Returns `Ok(None)` while the terminating blank line has not arrived yet,
/// and `Ok(Some((request, body_offset)))` once the head is complete, where
/// `body_offset` is the index of the first body byte in `buf`. Query-string
/// arguments are decoded into `request.args`.
pub fn parse_head(buf: &[u8]) -> Result<Option<(Request, usize)>> {
    let Some(head_end) = find_blank_line(buf) else {
        return Ok(None);
    };
    let head = std::str::from_utf8(&buf[..head_end])
        .map_err(|_| Error::InvalidHeader("request head is not valid UTF-8".to_string()))?;

    let mut lines = head.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| Error::InvalidRequestLine("empty request head".to_string()))?;
    let mut request = parse_request_line(request_line)?;

    for line in lines {
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(Error::InvalidHeader(line.to_string()));
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidHeader(line.to_string()));
        }
        request
            .headers
            .push((name.to_string(), value.trim().to_string()));
    }

    Ok(Some((request, head_end + 4)))
}

fn parse_request_line(line: &str) -> Result<Request> {
    let mut tokens = line.split_ascii_whitespace();
    let (Some(method), Some(target), Some(version)) =
        (tokens.next(), tokens.next(), tokens.next())
    else {
        return Err(Error::InvalidRequestLine(line.to_string()));
    };
    if tokens.next().is_some() || !version.starts_with("HTTP/") {
        return Err(Error::InvalidRequestLine(line.to_string()));
    }

    let method = Method::parse(method)?;
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    };

    let mut request = Request::new(method, path);
    if let Some(query) = query {
        request.query = Some(query.to_string());
        parse_urlencoded(query.as_bytes(), &mut request.args);
    }
    Ok(request)
}

/// Decode `key=value&key=value` pairs into `args`, percent-decoding both
/// sides. Pairs without `=` are ignored.
pub fn parse_urlencoded(data: &[u8], args: &mut HashMap<String, String>) {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    for pair in text.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            args.insert(urldecode(key), urldecode(value));
        }
    }
}

fn find_blank_line(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_get_with_query() {
        let buf = b"GET /clock/set?tz=UTC%2B2&fmt=24h HTTP/1.1\r\nHost: device.local\r\n\r\n";
        let (req, body_offset) = parse_head(buf).unwrap().expect("complete head");

        assert_eq!(req.method, Method::Get);
        assert_eq!(req.path, "/clock/set");
        assert_eq!(req.arg("tz"), Some("UTC+2"));
        assert_eq!(req.arg("fmt"), Some("24h"));
        assert_eq!(req.header("host"), Some("device.local"));
        assert_eq!(body_offset, buf.len());
    }

    #[test]
    fn test_parse_post_head_with_body_offset() {
        let buf = b"POST /upload HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let (req, body_offset) = parse_head(buf).unwrap().expect("complete head");

        assert_eq!(req.method, Method::Post);
        assert_eq!(req.content_length(), Some(5));
        assert_eq!(&buf[body_offset..], b"hello");
    }

    #[test]
    fn test_incomplete_head_returns_none() {
        assert!(parse_head(b"GET / HTTP/1.1\r\nHost: x").unwrap().is_none());
        assert!(parse_head(b"").unwrap().is_none());
    }

    #[test]
    fn test_unknown_method_is_error() {
        let buf = b"BREW /pot HTTP/1.1\r\n\r\n";
        assert!(matches!(parse_head(buf), Err(Error::InvalidMethod(_))));
    }

    #[test]
    fn test_header_without_colon_is_error() {
        let buf = b"GET / HTTP/1.1\r\nBroken header line\r\n\r\n";
        assert!(matches!(parse_head(buf), Err(Error::InvalidHeader(_))));
    }

    #[test]
    fn test_bad_request_line_is_error() {
        assert!(matches!(
            parse_head(b"GET /\r\n\r\n"),
            Err(Error::InvalidRequestLine(_))
        ));
        assert!(matches!(
            parse_head(b"GET / NOTHTTP\r\n\r\n"),
            Err(Error::InvalidRequestLine(_))
        ));
    }

    #[test]
    fn test_parse_urlencoded_body() {
        let mut args = HashMap::new();
        parse_urlencoded(b"name=brightness&value=42%25", &mut args);
        assert_eq!(args.get("name").map(String::as_str), Some("brightness"));
        assert_eq!(args.get("value").map(String::as_str), Some("42%"));
    }
}
