//! squall-multipart: Incremental multipart/form-data streaming parser
//!
//! Single Source of Truth (SSOT) parser core used by squall-core's HTTP
//! layer and by anything else that feeds raw body bytes.
//!
//! ## Features
//! - Push-based `feed` with arbitrary chunk boundaries - identical callback
//!   sequences no matter how the input is split
//! - Zero-copy spans into the caller's buffer
//! - Boyer-Moore-style skip over part data that cannot contain a delimiter
//! - Blocking one-byte-at-a-time reader for sources without buffering
//!
//! ## Example
//! ```
//! use squall_multipart::{MultipartParser, PartsCollector};
//!
//! let body = b"--B\r\nContent-Disposition: form-data; name=\"f\"\r\n\r\nhello\r\n--B--\r\n";
//! let mut parser = MultipartParser::new("B");
//! let mut collector = PartsCollector::new();
//!
//! assert_eq!(parser.feed(body, &mut collector), body.len());
//! assert!(parser.succeeded());
//! assert_eq!(collector.parts()[0].name.as_deref(), Some("f"));
//! assert_eq!(collector.parts()[0].text(), Some("hello"));
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod handler;
pub mod parser;
pub mod reader;

// Re-exports
pub use handler::{parse_content_disposition, Handler, Part, PartsCollector};
pub use parser::{parse_boundary, MultipartParser, ParseError, Result};
pub use reader::BlockingReader;
