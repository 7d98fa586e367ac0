//! squall-core: HTTP request and upload handling core
//!
//! The outer HTTP layer around `squall-multipart`: request head parsing,
//! the request/response model, streaming form assembly with size limits,
//! and a generic table-driven state machine for sequencing.
//!
//! ## Features
//! - `native` - TCP server with tokio

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod error;
pub mod form;
pub mod fsm;
pub mod parser;
pub mod request;
pub mod response;

#[cfg(feature = "native")]
pub mod server;

// Re-exports
pub use error::{Error, Result};
pub use form::{FormCollector, UploadConfig};
pub use fsm::StateMachine;
pub use parser::{parse_head, parse_urlencoded, MAX_HEAD_LEN};
pub use request::{Method, Request, RequestBuilder, Upload, UploadStatus};
pub use response::{Response, ResponseBuilder, StatusCode};

#[cfg(feature = "native")]
pub use server::{ServerConfig, ServerState, RouteHandler};
