//! TLS session operations
//!
//! This module implements the SessionOps trait for TLS connections,
//! enabling transparent switching between plain TCP and TLS I/O. The TLS
//! stream runs on top of another `SessionOps` (normally a plain TCP one),
//! which is what lets a connection upgrade in place.

use super::cert::{cipher_strength, peer_identity};
use super::config::{TlsConfig, TlsError};
use super::{TlsInfo, TlsUpgrade};
use crate::http::session::{PollEvents, SessionOps};
use crate::http::{Error, Result as HttpResult};
use log::debug;
use openssl::ssl::{Ssl, SslStream};
use std::fmt;
use std::io::{self, Read, Write};
use std::time::Duration;

/// Blocking `io::Read`/`io::Write` adapter over a `SessionOps`
pub struct OpsStream {
    inner: Box<dyn SessionOps>,
}

impl OpsStream {
    pub fn new(inner: Box<dyn SessionOps>) -> Self {
        OpsStream { inner }
    }
}

impl Read for OpsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).map_err(to_io)
    }
}

impl Write for OpsStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf).map_err(to_io)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().map_err(to_io)
    }
}

impl fmt::Debug for OpsStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OpsStream")
    }
}

fn to_io(err: Error) -> io::Error {
    match err {
        Error::Io(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other.to_string()),
    }
}

/// TLS session operations
///
/// Implements SessionOps trait for TLS-encrypted connections.
/// Wraps an OpenSSL SslStream and provides poll/read/write/close operations.
pub struct TlsSessionOps {
    stream: SslStream<OpsStream>,
    failed: bool,
}

impl TlsSessionOps {
    /// Accept a client connection with TLS (perform handshake)
    pub fn accept(raw: Box<dyn SessionOps>, config: &TlsConfig) -> std::result::Result<Self, TlsError> {
        let ssl = Ssl::new(&config.ctx)?;

        // The handshake runs in blocking mode on the inner transport
        let stream = ssl
            .accept(OpsStream::new(raw))
            .map_err(|e| TlsError::HandshakeFailed(format!("Accept failed: {}", e)))?;

        Ok(TlsSessionOps {
            stream,
            failed: false,
        })
    }

    /// Describe the negotiated session
    pub fn info(&self) -> TlsInfo {
        let ssl = self.stream.ssl();
        TlsInfo {
            ssf: cipher_strength(ssl),
            peer_id: peer_identity(ssl),
            version: ssl.version_str().to_string(),
            cipher: ssl
                .current_cipher()
                .map(|c| c.name().to_string())
                .unwrap_or_default(),
        }
    }
}

impl SessionOps for TlsSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> HttpResult<bool> {
        // Check if SSL has pending data
        if events != PollEvents::Write && self.stream.ssl().pending() > 0 {
            return Ok(true);
        }

        self.stream.get_ref().inner.poll(events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> HttpResult<usize> {
        match self.stream.read(buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.failed = true;
                Err(Error::Io(e))
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> HttpResult<usize> {
        match self.stream.write(buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.failed = true;
                Err(Error::Io(e))
            }
        }
    }

    fn flush(&mut self) -> HttpResult<()> {
        self.stream.flush().map_err(|e| {
            self.failed = true;
            Error::Io(e)
        })
    }

    fn close(&mut self) -> HttpResult<()> {
        // Perform SSL shutdown if not failed
        if !self.failed {
            if let Err(e) = self.stream.shutdown() {
                debug!("TLS shutdown failed: {}", e);
            }
        }

        self.stream.get_mut().inner.close()
    }
}

impl TlsUpgrade for TlsConfig {
    fn upgrade(&self, raw: Box<dyn SessionOps>) -> std::result::Result<(Box<dyn SessionOps>, TlsInfo), TlsError> {
        let session = TlsSessionOps::accept(raw, self)?;
        let info = session.info();
        Ok((Box::new(session), info))
    }
}
