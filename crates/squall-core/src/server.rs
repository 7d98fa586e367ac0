//! Native TCP upload server
//!
//! Tokio listener with one task per connection. Each connection accumulates
//! bytes until the request head parses, then streams the body: multipart
//! bodies run chunk-by-chunk through `squall_multipart` without buffering,
//! urlencoded bodies decode into `Request::args`. Parse failures answer 400
//! and close. There are no read deadlines: a stalled peer parks its task.

use crate::form::{FormCollector, UploadConfig};
use crate::fsm::StateMachine;
use crate::parser::{parse_head, parse_urlencoded, MAX_HEAD_LEN};
use crate::request::{Method, Request};
use crate::response::Response;
use crate::{Error, Result};
use parking_lot::RwLock;
use socket2::{Domain, Protocol, Socket, Type};
use squall_multipart::{MultipartParser, ParseError};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;

/// Read chunk size for connection streaming.
const CHUNK_SIZE: usize = 8 * 1024;

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub hostname: String,
    pub workers: usize,
    pub upload: UploadConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            hostname: "0.0.0.0".to_string(),
            workers: num_cpus::get(),
            upload: UploadConfig::default(),
        }
    }
}

/// Route handler type
pub type RouteHandler = Arc<dyn Fn(&Request) -> Response + Send + Sync>;

/// Server state shared across all connections
pub struct ServerState {
    /// Handlers keyed by method and exact path
    routes: RwLock<HashMap<(Method, String), RouteHandler>>,
    /// Limits applied to request bodies
    upload: UploadConfig,
}

impl ServerState {
    /// Create state with the given body limits.
    pub fn new(upload: UploadConfig) -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            upload,
        }
    }

    /// Register a handler for `method` on `path`.
    pub fn route(
        &self,
        method: Method,
        path: &str,
        handler: impl Fn(&Request) -> Response + Send + Sync + 'static,
    ) {
        self.routes
            .write()
            .insert((method, path.to_string()), Arc::new(handler));
    }

    /// Dispatch a fully-parsed request.
    pub fn handle(&self, request: &Request) -> Response {
        let handler = self
            .routes
            .read()
            .get(&(request.method, request.path.clone()))
            .cloned();
        match handler {
            Some(handler) => handler(request),
            None => Response::not_found(),
        }
    }

    /// The configured body limits.
    pub fn upload_config(&self) -> &UploadConfig {
        &self.upload
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new(UploadConfig::default())
    }
}

/// Connection phases, sequenced by the generic state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ConnPhase {
    ReadingHead,
    ReadingBody,
    Responding,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ConnEvent {
    HeadParsed,
    BodyDone,
    BodyFailed,
    ResponseSent,
}

fn connection_lifecycle(peer: SocketAddr) -> StateMachine<ConnPhase, ConnEvent> {
    StateMachine::new(ConnPhase::ReadingHead)
        .transition(ConnPhase::ReadingHead, ConnEvent::HeadParsed, ConnPhase::ReadingBody)
        .transition(ConnPhase::ReadingBody, ConnEvent::BodyDone, ConnPhase::Responding)
        .transition(ConnPhase::ReadingBody, ConnEvent::BodyFailed, ConnPhase::Responding)
        .transition(ConnPhase::Responding, ConnEvent::ResponseSent, ConnPhase::Closed)
        .on_enter(ConnPhase::Closed, move || {
            log::debug!("{peer}: connection done");
            None
        })
}

/// Build a tuned listening socket for `config`.
pub fn create_listener(config: &ServerConfig) -> Result<std::net::TcpListener> {
    let addr: SocketAddr = format!("{}:{}", config.hostname, config.port)
        .parse()
        .map_err(|err| Error::Internal(format!("bad listen address: {err}")))?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Accept connections forever, one task per connection.
pub async fn run(config: ServerConfig, state: Arc<ServerState>) -> Result<()> {
    let listener = TcpListener::from_std(create_listener(&config)?)?;
    log::info!("listening on {}:{}", config.hostname, config.port);

    loop {
        let (stream, peer) = listener.accept().await?;
        if let Err(err) = stream.set_nodelay(true) {
            log::debug!("{peer}: set_nodelay failed: {err}");
        }
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            handle_connection(state, stream, peer).await;
        });
    }
}

/// Blocking entry point: build a multi-threaded runtime per the config and
/// run the accept loop on it.
pub fn serve(config: ServerConfig, state: Arc<ServerState>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers.max(1))
        .enable_all()
        .build()?;
    runtime.block_on(run(config, state))
}

async fn handle_connection<S>(state: Arc<ServerState>, mut stream: S, peer: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut lifecycle = connection_lifecycle(peer);
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut buf: Vec<u8> = Vec::with_capacity(4 * 1024);

    // Accumulate until the head parses.
    let (mut request, body_offset) = loop {
        match parse_head(&buf) {
            Ok(Some(parsed)) => break parsed,
            Ok(None) => {
                if buf.len() > MAX_HEAD_LEN {
                    respond(&mut stream, Response::bad_request("request head too large")).await;
                    return;
                }
                match stream.read(&mut chunk).await {
                    Ok(0) => {
                        if !buf.is_empty() {
                            log::debug!("{peer}: closed mid-head");
                        }
                        return;
                    }
                    Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    Err(err) => {
                        log::debug!("{peer}: read failed: {err}");
                        return;
                    }
                }
            }
            Err(err) => {
                log::debug!("{peer}: bad request head: {err}");
                respond(&mut stream, Response::bad_request("malformed request")).await;
                return;
            }
        }
    };
    lifecycle.send_input(ConnEvent::HeadParsed);

    let leftover = buf.split_off(body_offset.min(buf.len()));
    let response = match read_body(&state, &mut stream, &mut request, leftover, &mut chunk).await {
        Ok(()) => {
            lifecycle.send_input(ConnEvent::BodyDone);
            log::debug!("{peer}: {} {}", request.method, request.path);
            state.handle(&request)
        }
        Err(err) => {
            lifecycle.send_input(ConnEvent::BodyFailed);
            log::debug!("{peer}: body rejected: {err}");
            error_response(&err)
        }
    };

    respond(&mut stream, response).await;
    lifecycle.send_input(ConnEvent::ResponseSent);
}

async fn read_body<S>(
    state: &ServerState,
    stream: &mut S,
    request: &mut Request,
    mut pending: Vec<u8>,
    chunk: &mut [u8],
) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    if !matches!(request.method, Method::Post | Method::Put) {
        return Ok(());
    }

    let content_length = request.content_length();

    if let Some(boundary) = request.multipart_boundary() {
        let mut parser = MultipartParser::new(&boundary);
        let mut collector = FormCollector::new(request, state.upload_config().clone());
        // The Content-Length, when present, bounds how much we read; the
        // closing delimiter alone ends the body otherwise.
        let mut remaining = content_length;

        parser.feed(&pending, &mut collector);
        consume_budget(&mut remaining, pending.len());
        while !parser.stopped() && !collector.exceeded() && remaining != Some(0) {
            let want = remaining.map_or(chunk.len(), |r| chunk.len().min(r));
            let n = stream.read(&mut chunk[..want]).await?;
            if n == 0 {
                break;
            }
            parser.feed(&chunk[..n], &mut collector);
            consume_budget(&mut remaining, n);
        }

        if let Some(err) = collector.take_error() {
            return Err(err);
        }
        if let Some(err) = parser.error() {
            return Err(err.clone().into());
        }
        if !parser.succeeded() {
            return Err(ParseError::UnexpectedEof.into());
        }
        return Ok(());
    }

    let limit = state.upload_config().get_max_total_size();
    let target = content_length.unwrap_or(pending.len());
    if target > limit {
        return Err(Error::BodyTooLarge { size: target, limit });
    }
    while pending.len() < target {
        let want = chunk.len().min(target - pending.len());
        let n = stream.read(&mut chunk[..want]).await?;
        if n == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        pending.extend_from_slice(&chunk[..n]);
    }
    pending.truncate(target);

    let is_urlencoded = request
        .content_type()
        .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false);
    if is_urlencoded {
        parse_urlencoded(&pending, &mut request.args);
    }
    request.body = bytes::Bytes::from(pending);
    Ok(())
}

fn consume_budget(remaining: &mut Option<usize>, n: usize) {
    if let Some(r) = remaining.as_mut() {
        *r = r.saturating_sub(n);
    }
}

fn error_response(error: &Error) -> Response {
    match error {
        Error::BodyTooLarge { .. } | Error::TooManyFields { .. } => {
            Response::payload_too_large(&error.to_string())
        }
        _ => Response::bad_request(&error.to_string()),
    }
}

async fn respond<S: AsyncWrite + Unpin>(stream: &mut S, response: Response) {
    let bytes = response.to_http1_bytes();
    if let Err(err) = stream.write_all(&bytes).await {
        log::debug!("response write failed: {err}");
        return;
    }
    if let Err(err) = stream.shutdown().await {
        log::trace!("shutdown failed: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestBuilder;
    use crate::response::StatusCode;
    use tokio::io::duplex;

    fn peer() -> SocketAddr {
        "127.0.0.1:9".parse().unwrap()
    }

    fn test_state() -> Arc<ServerState> {
        let state = Arc::new(ServerState::default());
        state.route(Method::Get, "/", |_req| Response::html("<form></form>"));
        state.route(Method::Post, "/upload", |req| {
            let who = req.arg("name").unwrap_or("nobody");
            Response::text(format!("hi {who}, {} bytes", req.upload.total_len))
        });
        state
    }

    async fn roundtrip(state: Arc<ServerState>, wire: Vec<u8>) -> String {
        let (mut client, server) = duplex(64 * 1024);
        let task = tokio::spawn(async move {
            handle_connection(state, server, peer()).await;
        });

        client.write_all(&wire).await.unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        task.await.unwrap();
        String::from_utf8(out).unwrap()
    }

    fn multipart_wire(body: &[u8], boundary: &str) -> Vec<u8> {
        let head = format!(
            "POST /upload HTTP/1.1\r\n\
             Content-Type: multipart/form-data; boundary={boundary}\r\n\
             Content-Length: {}\r\n\r\n",
            body.len()
        );
        let mut wire = head.into_bytes();
        wire.extend_from_slice(body);
        wire
    }

    #[test]
    fn test_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.hostname, "0.0.0.0");
        assert!(config.workers >= 1);
    }

    #[test]
    fn test_route_dispatch() {
        let state = test_state();
        let req = RequestBuilder::new(Method::Get, "/").build();
        assert_eq!(state.handle(&req).status, StatusCode::OK);

        let req = RequestBuilder::new(Method::Get, "/missing").build();
        assert_eq!(state.handle(&req).status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_create_listener_binds() {
        let config = ServerConfig {
            port: 0,
            hostname: "127.0.0.1".to_string(),
            ..Default::default()
        };
        let listener = create_listener(&config).expect("bind ephemeral port");
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_get_roundtrip() {
        let out = roundtrip(test_state(), b"GET / HTTP/1.1\r\nHost: x\r\n\r\n".to_vec()).await;
        assert!(out.starts_with("HTTP/1.1 200 OK"));
        assert!(out.contains("<form></form>"));
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let out = roundtrip(test_state(), b"GET /nope HTTP/1.1\r\n\r\n".to_vec()).await;
        assert!(out.starts_with("HTTP/1.1 404"));
    }

    #[tokio::test]
    async fn test_multipart_upload_roundtrip() {
        let body: &[u8] = b"--sq\r\n\
            Content-Disposition: form-data; name=\"name\"\r\n\
            \r\n\
            esp\r\n\
            --sq\r\n\
            Content-Disposition: form-data; name=\"file\"; filename=\"fw.bin\"\r\n\
            Content-Type: application/octet-stream\r\n\
            \r\n\
            0123456789\r\n\
            --sq--\r\n";

        let out = roundtrip(test_state(), multipart_wire(body, "sq")).await;
        assert!(out.starts_with("HTTP/1.1 200 OK"), "got: {out}");
        assert!(out.contains("hi esp, 10 bytes"), "got: {out}");
    }

    #[tokio::test]
    async fn test_malformed_multipart_is_400() {
        let body: &[u8] = b"--sq\r\n\
            Broken Header Line\r\n\
            \r\n\
            x\r\n\
            --sq--\r\n";

        let out = roundtrip(test_state(), multipart_wire(body, "sq")).await;
        assert!(out.starts_with("HTTP/1.1 400"), "got: {out}");
    }

    #[tokio::test]
    async fn test_oversized_upload_is_413() {
        let state = Arc::new(ServerState::new(UploadConfig::default().max_file_size(4)));
        state.route(Method::Post, "/upload", |_req| Response::ok());

        let body: &[u8] = b"--sq\r\n\
            Content-Disposition: form-data; name=\"file\"; filename=\"big.bin\"\r\n\
            \r\n\
            way more than four bytes\r\n\
            --sq--\r\n";

        let out = roundtrip(state, multipart_wire(body, "sq")).await;
        assert!(out.starts_with("HTTP/1.1 413"), "got: {out}");
    }

    #[tokio::test]
    async fn test_urlencoded_form_roundtrip() {
        let state = test_state();
        let body = b"name=deskclock&mode=night";
        let head = format!(
            "POST /upload HTTP/1.1\r\n\
             Content-Type: application/x-www-form-urlencoded\r\n\
             Content-Length: {}\r\n\r\n",
            body.len()
        );
        let mut wire = head.into_bytes();
        wire.extend_from_slice(body);

        let out = roundtrip(state, wire).await;
        assert!(out.contains("hi deskclock, 0 bytes"), "got: {out}");
    }

    #[tokio::test]
    async fn test_bad_request_head_is_400() {
        let out = roundtrip(test_state(), b"GET /\r\n\r\n".to_vec()).await;
        assert!(out.starts_with("HTTP/1.1 400"), "got: {out}");
    }
}
