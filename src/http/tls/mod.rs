//! TLS support for HTTP connections
//!
//! This module implements the server side of TLS, used both for implicit
//! TLS (https) and for an in-place `Upgrade: TLS/1.0` of a plaintext
//! connection.
//!
//! # Architecture
//!
//! The TLS implementation uses the session operations abstraction pattern:
//!
//! 1. `TlsConfig` defines TLS settings (versions, ciphers, certificates)
//! 2. `TlsSessionOps` implements the `SessionOps` trait for encrypted I/O,
//!    layered on top of the raw transport's `SessionOps`
//! 3. All HTTP code remains unchanged - it transparently uses TLS operations
//!
//! The connection only sees the [`TlsUpgrade`] trait, so tests and embedders
//! can substitute their own implementation.
//!
//! # Examples
//!
//! ```no_run
//! use davhttpd::http::tls::{ClientVerify, TlsConfig, TlsVersion};
//!
//! let tls_config = TlsConfig::server()
//!     .cert_file("server.pem")
//!     .version_range(TlsVersion::Tls12, TlsVersion::Tls13)
//!     .client_verify(ClientVerify::Optional)
//!     .build()
//!     .unwrap();
//! ```

pub mod cert;
pub mod config;
pub mod session;

pub use config::{ClientVerify, TlsConfig, TlsError, TlsServerBuilder, TlsVersion};
pub use session::TlsSessionOps;

use super::session::SessionOps;

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;

/// Properties of a negotiated TLS session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsInfo {
    /// Security strength factor (cipher bits)
    pub ssf: u32,
    /// Identity hint from the client certificate
    pub peer_id: Option<String>,
    /// Protocol version, e.g. `TLSv1.3`
    pub version: String,
    /// Negotiated cipher name
    pub cipher: String,
}

/// Upgrades a raw transport to an encrypted one
pub trait TlsUpgrade: Send + Sync {
    /// Run the server handshake over `raw`
    fn upgrade(&self, raw: Box<dyn SessionOps>) -> Result<(Box<dyn SessionOps>, TlsInfo)>;
}
