//! HTTP/1.x server engine
//!
//! This module implements the server side of an HTTP/1.0 and HTTP/1.1
//! connection for a WebDAV/CalDAV-style collection server.
//!
//! # Architecture
//!
//! The HTTP layer uses a session operations abstraction pattern that allows
//! seamless switching between plain TCP and TLS connections, including an
//! in-place upgrade of a plaintext connection:
//!
//! - `SessionOps` trait defines transport operations (poll, read, write, close)
//! - `HttpSession` adds buffered line/byte input, buffered output, the idle
//!   timeout and the telemetry tap on top of a boxed `SessionOps`
//! - `Connection` runs the transaction loop: one `Transaction` per request,
//!   reset between pipelined requests
//!
//! Request processing is layered bottom-up:
//!
//! - [`headers`], [`accept`] and [`range`] are pure parsers
//! - [`body`] and [`chunked`] frame message payloads in both directions
//! - [`precond`] evaluates conditional request headers against a resource
//! - [`auth`] negotiates HTTP authentication schemes with a pluggable
//!   mechanism provider
//! - [`connection`] and [`response`] drive the request/response cycle and
//!   dispatch to [`namespace`] handlers
//!
//! # Examples
//!
//! ```no_run
//! use davhttpd::http::{HttpServer, ServerContext};
//! use davhttpd::http::auth::PasswordTable;
//! use davhttpd::ServerConfig;
//! use std::sync::Arc;
//!
//! let config = ServerConfig::builder()
//!     .server_name("dav.example.com")
//!     .allow_plaintext(true)
//!     .build();
//! let mut passwords = PasswordTable::new();
//! passwords.insert("alice", "secret");
//!
//! let context = ServerContext::new(config, Arc::new(passwords));
//! let server = HttpServer::bind("127.0.0.1:8080".parse().unwrap(), context).unwrap();
//! server.serve().unwrap();
//! ```

pub mod accept;
pub mod auth;
pub mod body;
pub mod chunked;
pub mod connection;
pub mod handlers;
pub mod headers;
pub mod message;
pub mod namespace;
pub mod parser;
pub mod precond;
pub mod range;
pub mod response;
pub mod server;
pub mod session;
pub mod telemetry;
pub mod tls;
pub mod transaction;

pub use connection::{Connection, ServerContext};
pub use headers::Headers;
pub use message::{Method, Status, Version};
pub use namespace::{Handled, MethodEntry, Namespace, Registry};
pub use server::HttpServer;
pub use session::{HttpSession, SessionOps};
pub use transaction::Transaction;

use std::borrow::Cow;

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP operation errors
///
/// These are connection-level failures. Failures scoped to a single request
/// are reported as an [`HttpError`] carrying the status to answer with.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] tls::TlsError),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid HTTP version: {0}")]
    InvalidVersion(String),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("Line exceeds {0} octets")]
    LineTooLong(usize),

    #[error("Timeout")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// Whether the underlying transport reported an idle timeout
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout => true,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

/// A request-scoped failure: the status to answer with and a human-readable
/// description for the error page
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{status}: {desc}")]
pub struct HttpError {
    pub status: Status,
    pub desc: Cow<'static, str>,
}

impl HttpError {
    pub fn new(status: Status, desc: impl Into<Cow<'static, str>>) -> Self {
        HttpError {
            status,
            desc: desc.into(),
        }
    }

    /// Map a transport failure while reading a request to 408 or 400
    pub fn from_read(err: &Error, desc: impl Into<Cow<'static, str>>) -> Self {
        if err.is_timeout() {
            HttpError::new(Status::REQUEST_TIMEOUT, desc)
        } else {
            HttpError::new(Status::BAD_REQUEST, desc)
        }
    }
}

/// Protocol version emitted on every status line
pub const HTTP_VERSION: &str = "HTTP/1.1";

/// Token accepted in an `Upgrade` header to switch to TLS
pub const TLS_VERSION: &str = "TLS/1.0";

/// Transport read/write buffer size
pub const PROT_BUFSIZE: usize = 4096;

/// Maximum decoded size of a base64 authentication token
pub const BASE64_BUF_SIZE: usize = 21848;

/// Responses shorter than this are never compressed
pub const GZIP_MIN_LEN: usize = 300;

/// CRLF line ending
pub const CRLF: &str = "\r\n";
