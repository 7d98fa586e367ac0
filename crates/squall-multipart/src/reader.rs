//! Blocking one-byte-at-a-time upload reader
//!
//! The file-upload variant for callers without zero-copy buffering: pulls
//! single bytes from a [`std::io::Read`] source and runs them through the
//! same state machine as the push-based parser, so boundary detection and
//! callback ordering are identical.

use std::io::{ErrorKind, Read};

use crate::handler::Handler;
use crate::parser::{MultipartParser, ParseError, Result};

/// Blocking multipart reader over a byte source.
///
/// There are no timeout semantics: a stalled source blocks its thread until
/// the read returns. The caller owns connection-level deadlines.
#[derive(Debug)]
pub struct BlockingReader<R> {
    source: R,
    parser: MultipartParser,
}

impl<R: Read> BlockingReader<R> {
    /// Wrap a byte source with a parser for the given boundary.
    pub fn new(source: R, boundary: &str) -> Self {
        Self {
            source,
            parser: MultipartParser::new(boundary),
        }
    }

    /// Drive the source to a terminal parser state, one byte per read.
    ///
    /// Read failures and end-of-stream before the closing delimiter map to
    /// [`ParseError::Io`] and [`ParseError::UnexpectedEof`].
    pub fn run<H: Handler>(&mut self, handler: &mut H) -> Result<()> {
        let mut byte = [0u8; 1];
        while !self.parser.stopped() {
            let n = match self.source.read(&mut byte) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(ParseError::Io(err.to_string())),
            };
            if n == 0 {
                return Err(ParseError::UnexpectedEof);
            }
            self.parser.feed(&byte, handler);
        }
        if let Some(err) = self.parser.error() {
            return Err(err.clone());
        }
        Ok(())
    }

    /// The underlying parser, for state queries.
    pub fn parser(&self) -> &MultipartParser {
        &self.parser
    }

    /// Unwrap the byte source.
    pub fn into_inner(self) -> R {
        self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::PartsCollector;
    use std::io::Cursor;

    const BODY: &[u8] = b"--wall\r\n\
        Content-Disposition: form-data; name=\"greeting\"\r\n\
        \r\n\
        hi there\r\n\
        --wall\r\n\
        Content-Disposition: form-data; name=\"file\"; filename=\"a.bin\"\r\n\
        Content-Type: application/octet-stream\r\n\
        \r\n\
        \x00\x01\x02\r\n\
        --wall--\r\n";

    #[test]
    fn test_reads_full_stream_one_byte_at_a_time() {
        let mut reader = BlockingReader::new(Cursor::new(BODY), "wall");
        let mut collector = PartsCollector::new();
        reader.run(&mut collector).expect("stream should parse");

        assert!(reader.parser().succeeded());
        assert!(collector.is_finished());
        let parts = collector.parts();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].name.as_deref(), Some("greeting"));
        assert_eq!(parts[0].text(), Some("hi there"));
        assert_eq!(parts[1].filename.as_deref(), Some("a.bin"));
        assert_eq!(parts[1].data, vec![0x00, 0x01, 0x02]);
    }

    #[test]
    fn test_truncated_stream_is_unexpected_eof() {
        let truncated = &BODY[..BODY.len() - 10];
        let mut reader = BlockingReader::new(Cursor::new(truncated), "wall");
        let mut collector = PartsCollector::new();
        let err = reader.run(&mut collector).expect_err("should not finish");
        assert_eq!(err, ParseError::UnexpectedEof);
    }

    #[test]
    fn test_read_failure_surfaces_as_io_error() {
        struct FailingSource;
        impl Read for FailingSource {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(ErrorKind::ConnectionReset, "peer gone"))
            }
        }

        let mut reader = BlockingReader::new(FailingSource, "wall");
        let mut collector = PartsCollector::new();
        let err = reader.run(&mut collector).expect_err("read should fail");
        assert!(matches!(err, ParseError::Io(_)));
    }

    #[test]
    fn test_malformed_stream_reports_parser_error() {
        let bad = b"--wall\r\nBroken Header\r\n\r\nx\r\n--wall--\r\n";
        let mut reader = BlockingReader::new(Cursor::new(&bad[..]), "wall");
        let mut collector = PartsCollector::new();
        let err = reader.run(&mut collector).expect_err("should reject");
        assert_eq!(err, ParseError::BadHeaderFieldChar(b' '));
    }
}
