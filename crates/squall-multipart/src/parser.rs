//! Incremental multipart/form-data parser
//!
//! Push-based state machine: call [`MultipartParser::feed`] with body chunks
//! as they arrive and receive zero-copy span callbacks through a [`Handler`].
//! Chunk boundaries are arbitrary - a delimiter or header may be split at any
//! byte and the callback sequence is unchanged.

use crate::handler::Handler;
use thiserror::Error;

const CR: u8 = b'\r';
const LF: u8 = b'\n';
const HYPHEN: u8 = b'-';
const COLON: u8 = b':';
const SPACE: u8 = b' ';

/// Slack past the prefixed delimiter in the lookbehind buffer.
const LOOKBEHIND_SLACK: usize = 8;

/// RFC 2046 recommends multipart boundary length <= 70 characters.
const MAX_BOUNDARY_LEN: usize = 70;

/// Result type alias for multipart operations
pub type Result<T> = std::result::Result<T, ParseError>;

/// Errors raised while parsing a multipart stream or boundary parameter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The opening or closing delimiter line did not match the boundary
    #[error("malformed boundary line")]
    BadBoundaryLine,

    /// A header line started with the colon separator
    #[error("empty header field name")]
    EmptyHeaderField,

    /// A header name byte outside ASCII letters and `-`
    #[error("invalid header field character 0x{0:02x}")]
    BadHeaderFieldChar(u8),

    /// CR inside a header block was not followed by LF
    #[error("malformed header termination")]
    BadHeaderTermination,

    /// No `boundary=` parameter in a `multipart/form-data` Content-Type
    #[error("missing multipart boundary parameter")]
    MissingBoundary,

    /// Content-Type is not multipart, or the boundary value is empty/too long
    #[error("invalid multipart boundary")]
    InvalidBoundary,

    /// The byte source failed mid-stream (blocking reader only)
    #[error("read failed mid-multipart: {0}")]
    Io(String),

    /// The byte source ended before the closing delimiter (blocking reader only)
    #[error("unexpected end of multipart stream")]
    UnexpectedEof,
}

/// Parse the boundary parameter out of a Content-Type header value.
///
/// Accepts `multipart/form-data; boundary=...` with a case-insensitive
/// parameter name and an optionally quoted value.
pub fn parse_boundary(content_type: &str) -> Result<String> {
    let content_type = content_type.trim();
    let media_type = content_type.split(';').next().unwrap_or("").trim();
    if !media_type.eq_ignore_ascii_case("multipart/form-data") {
        return Err(ParseError::InvalidBoundary);
    }

    for param in content_type.split(';').skip(1) {
        let Some((key, value)) = param.trim().split_once('=') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case("boundary") {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            if value.is_empty() || value.len() > MAX_BOUNDARY_LEN {
                return Err(ParseError::InvalidBoundary);
            }
            return Ok(value.to_string());
        }
    }

    Err(ParseError::MissingBoundary)
}

/// Parser states. Forward-only, except that `PartData` wraps back to
/// `HeaderFieldStart` on a mid-stream delimiter. `End` and `Error` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    StartBoundary,
    HeaderFieldStart,
    HeaderField,
    HeaderValueStart,
    HeaderValue,
    HeaderValueAlmostDone,
    HeadersAlmostDone,
    PartDataStart,
    PartData,
    End,
    Error,
}

/// Which span is currently open. At most one at any time; the offset into
/// the live input chunk is tracked locally inside `feed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    HeaderField,
    HeaderValue,
    PartData,
}

/// Incremental multipart/form-data parser.
///
/// One instance per body stream. Construct with the boundary (or supply it
/// later with [`set_boundary`](MultipartParser::set_boundary)), then `feed`
/// chunks until [`stopped`](MultipartParser::stopped). After an error the
/// parser stays in its error state and consumes nothing until
/// [`reset`](MultipartParser::reset).
#[derive(Debug)]
pub struct MultipartParser {
    /// `\r\n--` followed by the user boundary, so a delimiter can never
    /// match mid-line.
    boundary: Vec<u8>,
    /// Which byte values occur anywhere in the prefixed boundary.
    boundary_chars: [bool; 256],
    /// Bytes tentatively matched against the boundary, replayed as part
    /// data if the match breaks.
    lookbehind: Vec<u8>,
    /// Match progress into `boundary`; runs up to two past its end for the
    /// CR/LF or `--` disambiguation bytes.
    index: usize,
    state: State,
    part_boundary: bool,
    last_boundary: bool,
    mark: Option<Mark>,
    error: Option<ParseError>,
}

impl MultipartParser {
    /// Create a parser for the given boundary (without the leading `--`).
    pub fn new(boundary: &str) -> Self {
        let mut parser = Self {
            boundary: Vec::new(),
            boundary_chars: [false; 256],
            lookbehind: Vec::new(),
            index: 0,
            state: State::Start,
            part_boundary: false,
            last_boundary: false,
            mark: None,
            error: None,
        };
        parser.set_boundary(boundary);
        parser
    }

    /// Replace the boundary and reset all parse state.
    pub fn set_boundary(&mut self, boundary: &str) {
        self.boundary.clear();
        self.boundary.extend_from_slice(b"\r\n--");
        self.boundary.extend_from_slice(boundary.as_bytes());
        self.boundary_chars = [false; 256];
        for &byte in &self.boundary {
            self.boundary_chars[byte as usize] = true;
        }
        self.lookbehind = vec![0; self.boundary.len() + LOOKBEHIND_SLACK];
        self.reset();
    }

    /// Return to the initial state, keeping the configured boundary.
    pub fn reset(&mut self) {
        self.state = State::Start;
        self.index = 0;
        self.part_boundary = false;
        self.last_boundary = false;
        self.mark = None;
        self.error = None;
    }

    /// True once the closing delimiter has been fully parsed.
    pub fn succeeded(&self) -> bool {
        self.state == State::End
    }

    /// True once the parser has rejected its input.
    pub fn has_error(&self) -> bool {
        self.state == State::Error
    }

    /// True in either terminal state; no further input will be consumed.
    pub fn stopped(&self) -> bool {
        self.succeeded() || self.has_error()
    }

    /// The error that stopped the parser, if any.
    pub fn error(&self) -> Option<&ParseError> {
        self.error.as_ref()
    }

    /// Human-readable reason the parser stopped, if it stopped on an error.
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ParseError::to_string)
    }

    /// Feed one chunk of body bytes, emitting events through `handler`.
    ///
    /// Returns `data.len()` when the whole chunk was consumed, the offset of
    /// the offending byte when the chunk was rejected (the parser is then in
    /// its error state), and 0 on any call after an error.
    pub fn feed<H: Handler>(&mut self, data: &[u8], handler: &mut H) -> usize {
        if self.state == State::Error {
            return 0;
        }

        let len = data.len();
        let boundary_len = self.boundary.len();
        let boundary_end = boundary_len - 1;

        // A span left open by the previous chunk continues at offset zero.
        let mut mark = 0usize;
        let mut i = 0usize;

        while i < len {
            let mut c = data[i];
            match self.state {
                State::Start => {
                    self.index = 0;
                    self.state = State::StartBoundary;
                    // Same byte, next state.
                    continue;
                }
                State::StartBoundary => {
                    if self.index == boundary_len - 2 {
                        if c != CR {
                            return self.fail(i, ParseError::BadBoundaryLine);
                        }
                        self.index += 1;
                    } else if self.index == boundary_len - 1 {
                        if c != LF {
                            return self.fail(i, ParseError::BadBoundaryLine);
                        }
                        self.index = 0;
                        handler.on_part_begin();
                        self.state = State::HeaderFieldStart;
                    } else {
                        // The stream opens with `--boundary`, so matching
                        // starts past the `\r\n` prefix.
                        if c != self.boundary[self.index + 2] {
                            return self.fail(i, ParseError::BadBoundaryLine);
                        }
                        self.index += 1;
                    }
                    i += 1;
                }
                State::HeaderFieldStart => {
                    self.state = State::HeaderField;
                    self.mark = Some(Mark::HeaderField);
                    mark = i;
                    self.index = 0;
                    continue;
                }
                State::HeaderField => {
                    if c == CR {
                        // Blank line: this part's header block is over.
                        self.mark = None;
                        self.state = State::HeadersAlmostDone;
                    } else if c == COLON {
                        if self.index == 0 {
                            return self.fail(i, ParseError::EmptyHeaderField);
                        }
                        if i > mark {
                            handler.on_header_field(&data[mark..i]);
                        }
                        self.mark = None;
                        self.state = State::HeaderValueStart;
                    } else if c == HYPHEN || c.is_ascii_alphabetic() {
                        self.index += 1;
                    } else {
                        return self.fail(i, ParseError::BadHeaderFieldChar(c));
                    }
                    i += 1;
                }
                State::HeaderValueStart => {
                    if c == SPACE {
                        i += 1;
                    } else {
                        self.mark = Some(Mark::HeaderValue);
                        mark = i;
                        self.state = State::HeaderValue;
                        continue;
                    }
                }
                State::HeaderValue => {
                    if c == CR {
                        // Empty spans are allowed here: the header is
                        // present but has no value.
                        handler.on_header_value(&data[mark..i]);
                        handler.on_header_end();
                        self.mark = None;
                        self.state = State::HeaderValueAlmostDone;
                    }
                    i += 1;
                }
                State::HeaderValueAlmostDone => {
                    if c != LF {
                        return self.fail(i, ParseError::BadHeaderTermination);
                    }
                    self.state = State::HeaderFieldStart;
                    i += 1;
                }
                State::HeadersAlmostDone => {
                    if c != LF {
                        return self.fail(i, ParseError::BadHeaderTermination);
                    }
                    self.state = State::PartDataStart;
                    i += 1;
                }
                State::PartDataStart => {
                    handler.on_headers_end();
                    self.mark = Some(Mark::PartData);
                    mark = i;
                    self.state = State::PartData;
                    continue;
                }
                State::PartData => {
                    let prev_index = self.index;

                    if self.index == 0 {
                        // Boyer-Moore-style skip: while the byte at the
                        // lookahead offset occurs nowhere in the boundary,
                        // no delimiter can start in between.
                        i += boundary_end;
                        while i < len && !self.boundary_chars[data[i] as usize] {
                            i += boundary_len;
                        }
                        i -= boundary_end;
                        if i >= len {
                            break;
                        }
                        c = data[i];
                    }

                    if self.index < boundary_len {
                        if self.boundary[self.index] == c {
                            if self.index == 0 {
                                if self.mark.is_some() && i > mark {
                                    handler.on_part_data(&data[mark..i]);
                                }
                                self.mark = None;
                            }
                            self.index += 1;
                        } else {
                            self.index = 0;
                        }
                    } else if self.index == boundary_len {
                        // The byte after the boundary body decides between
                        // "another part follows" and "final delimiter".
                        self.index += 1;
                        if c == CR {
                            self.part_boundary = true;
                        } else if c == HYPHEN {
                            self.last_boundary = true;
                        } else {
                            self.index = 0;
                        }
                    } else if self.part_boundary {
                        self.index = 0;
                        if c == LF {
                            self.part_boundary = false;
                            handler.on_part_end();
                            handler.on_part_begin();
                            self.state = State::HeaderFieldStart;
                            i += 1;
                            continue;
                        }
                    } else if self.last_boundary {
                        if c == HYPHEN {
                            self.index = 0;
                            self.last_boundary = false;
                            handler.on_part_end();
                            handler.on_end();
                            self.state = State::End;
                            i += 1;
                            continue;
                        }
                        self.index = 0;
                    } else {
                        self.index = 0;
                    }

                    if self.index > 0 {
                        // Withhold tentatively matched bytes until the match
                        // is confirmed or broken. An index past capacity is
                        // a parser bug, not bad input; the slice index
                        // panics on it.
                        self.lookbehind[self.index - 1] = c;
                    } else if prev_index > 0 {
                        // False alarm: the withheld bytes were ordinary part
                        // data. Flush them, then re-examine the interrupting
                        // byte - it may begin a real delimiter.
                        handler.on_part_data(&self.lookbehind[..prev_index]);
                        self.mark = Some(Mark::PartData);
                        mark = i;
                        self.part_boundary = false;
                        self.last_boundary = false;
                        continue;
                    }
                    i += 1;
                }
                State::End => {
                    // Epilogue bytes after the closing delimiter are
                    // consumed and ignored.
                    i = len;
                }
                State::Error => return 0,
            }
        }

        // Flush whatever span is still open; it continues in the next chunk.
        match self.mark {
            Some(Mark::HeaderField) if len > mark => handler.on_header_field(&data[mark..len]),
            Some(Mark::HeaderValue) if len > mark => handler.on_header_value(&data[mark..len]),
            Some(Mark::PartData) if len > mark => handler.on_part_data(&data[mark..len]),
            _ => {}
        }

        len
    }

    fn fail(&mut self, offset: usize, error: ParseError) -> usize {
        self.state = State::Error;
        self.error = Some(error);
        offset
    }
}
