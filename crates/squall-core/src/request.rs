//! HTTP Request types

use crate::{Error, Result};
use smallvec::SmallVec;
use std::collections::HashMap;

/// HTTP Methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl Method {
    /// Parse from a request-line token
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "PATCH" => Ok(Method::Patch),
            "HEAD" => Ok(Method::Head),
            "OPTIONS" => Ok(Method::Options),
            _ => Err(Error::InvalidMethod(s.to_string())),
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Default for Method {
    fn default() -> Self {
        Method::Get
    }
}

/// Upload progress for the file part of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadStatus {
    /// No file part seen
    #[default]
    Idle,
    /// File part headers parsed, no data yet
    Started,
    /// File data arriving
    Writing,
    /// File part complete
    Done,
    /// Upload abandoned after a parse failure or limit breach
    Aborted,
}

/// Metadata and a bounded capture of the request's file upload.
///
/// Tracks the most recent file part of a multipart body. `total_len` counts
/// every body byte of the part; only the first `buffer` capacity's worth are
/// retained, the rest are counted and dropped.
#[derive(Debug, Clone, Default)]
pub struct Upload {
    /// Where the upload currently stands
    pub status: UploadStatus,
    /// Filename from Content-Disposition
    pub filename: Option<String>,
    /// The part's Content-Type
    pub mimetype: Option<String>,
    /// Total file bytes seen
    pub total_len: usize,
    /// Bytes actually retained in `buffer`
    pub buffered_len: usize,
    /// Bounded in-memory capture of the file data
    pub buffer: Vec<u8>,
}

impl Upload {
    /// True when a file part was seen and fully received.
    pub fn is_complete(&self) -> bool {
        self.status == UploadStatus::Done
    }
}

/// HTTP Request
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// HTTP method
    pub method: Method,
    /// Request path (without query string)
    pub path: String,
    /// Query string (without leading ?)
    pub query: Option<String>,
    /// Request headers (stack-allocated for small header counts)
    pub headers: SmallVec<[(String, String); 16]>,
    /// Query-string and form arguments
    pub args: HashMap<String, String>,
    /// File upload state for multipart bodies
    pub upload: Upload,
    /// Raw request body (empty for multipart bodies, which stream through
    /// the parser instead)
    pub body: bytes::Bytes,
}

impl Request {
    /// Create a new request
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            ..Default::default()
        }
    }

    /// Get a header value (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get content-type header
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Get content-length header
    pub fn content_length(&self) -> Option<usize> {
        self.header("content-length").and_then(|v| v.parse().ok())
    }

    /// True when the body is `multipart/form-data`
    pub fn is_multipart(&self) -> bool {
        self.content_type()
            .map(|ct| {
                ct.split(';')
                    .next()
                    .unwrap_or("")
                    .trim()
                    .eq_ignore_ascii_case("multipart/form-data")
            })
            .unwrap_or(false)
    }

    /// The multipart boundary from Content-Type, if present and valid
    pub fn multipart_boundary(&self) -> Option<String> {
        self.content_type()
            .and_then(|ct| squall_multipart::parse_boundary(ct).ok())
    }

    /// Get a query or form argument
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args.get(name).map(|s| s.as_str())
    }
}

/// Builder for constructing requests
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    /// Create a new builder
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            request: Request::new(method, path),
        }
    }

    /// Set query string
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.request.query = Some(query.into());
        self
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.headers.push((name.into(), value.into()));
        self
    }

    /// Set body
    pub fn body(mut self, body: impl Into<bytes::Bytes>) -> Self {
        self.request.body = body.into();
        self
    }

    /// Build the request
    pub fn build(self) -> Request {
        self.request
    }
}

/// Simple percent decoding; `+` decodes to a space
pub(crate) fn urldecode(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '%' {
            let hex: String = chars.by_ref().take(2).collect();
            if hex.len() == 2 {
                if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                    result.push(byte as char);
                    continue;
                }
            }
            result.push('%');
            result.push_str(&hex);
        } else if c == '+' {
            result.push(' ');
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parse() {
        assert_eq!(Method::parse("GET").unwrap(), Method::Get);
        assert_eq!(Method::parse("post").unwrap(), Method::Post);
        assert!(Method::parse("BREW").is_err());
    }

    #[test]
    fn test_request_header_case_insensitive() {
        let req = RequestBuilder::new(Method::Get, "/")
            .header("Content-Type", "text/plain")
            .build();

        assert_eq!(req.header("content-type"), Some("text/plain"));
        assert_eq!(req.header("CONTENT-TYPE"), Some("text/plain"));
        assert_eq!(req.header("x-missing"), None);
    }

    #[test]
    fn test_multipart_boundary_extraction() {
        let req = RequestBuilder::new(Method::Post, "/upload")
            .header("Content-Type", "multipart/form-data; boundary=frontier")
            .build();

        assert!(req.is_multipart());
        assert_eq!(req.multipart_boundary().as_deref(), Some("frontier"));
    }

    #[test]
    fn test_non_multipart_has_no_boundary() {
        let req = RequestBuilder::new(Method::Post, "/submit")
            .header("Content-Type", "application/x-www-form-urlencoded")
            .build();

        assert!(!req.is_multipart());
        assert_eq!(req.multipart_boundary(), None);
    }

    #[test]
    fn test_urldecode() {
        assert_eq!(urldecode("a%20b"), "a b");
        assert_eq!(urldecode("a+b"), "a b");
        assert_eq!(urldecode("plain"), "plain");
        assert_eq!(urldecode("bad%2"), "bad%2");
    }

    #[test]
    fn test_upload_defaults() {
        let upload = Upload::default();
        assert_eq!(upload.status, UploadStatus::Idle);
        assert!(!upload.is_complete());
        assert_eq!(upload.total_len, 0);
    }
}
