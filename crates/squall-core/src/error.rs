//! Error types for squall-core

use thiserror::Error;

/// Result type alias for squall operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the squall HTTP layer
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid HTTP method
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    /// Invalid request line
    #[error("Invalid request line: {0}")]
    InvalidRequestLine(String),

    /// Invalid header
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Body too large
    #[error("Body too large: {size} bytes exceeds limit of {limit} bytes")]
    BodyTooLarge { size: usize, limit: usize },

    /// Too many form fields
    #[error("Too many form fields: {count} exceeds limit of {max}")]
    TooManyFields { count: usize, max: usize },

    /// Multipart body rejected by the streaming parser
    #[error("Multipart parse error: {0}")]
    Multipart(#[from] squall_multipart::ParseError),

    /// IO error (native only)
    #[cfg(feature = "native")]
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
