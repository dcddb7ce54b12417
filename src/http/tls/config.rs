//! TLS configuration
//!
//! This module provides the server-side TLS configuration builder. Settings
//! are collected first and applied to an OpenSSL context in `build()`.

use super::cert::self_signed;
use openssl::pkey::PKey;
use openssl::ssl::{SslContext, SslContextBuilder, SslMethod, SslVerifyMode};
use openssl::x509::X509;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// TLS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.0
    Tls10,
    /// TLS 1.1
    Tls11,
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Parse TLS version from string (case-insensitive)
    pub fn from_str(s: &str) -> Result<Self, TlsError> {
        match s.to_uppercase().as_str() {
            "TLSV1.0" | "TLS1.0" | "TLSV1" | "TLS1" => Ok(TlsVersion::Tls10),
            "TLSV1.1" | "TLS1.1" => Ok(TlsVersion::Tls11),
            "TLSV1.2" | "TLS1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" => Ok(TlsVersion::Tls13),
            _ => Err(TlsError::InvalidVersion(s.to_string())),
        }
    }

    /// Get OpenSSL protocol version constant
    pub fn to_openssl_version(&self) -> openssl::ssl::SslVersion {
        use openssl::ssl::SslVersion;
        match self {
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    /// Get version as string
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls10 => "TLSv1.0",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

/// Client certificate verification mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientVerify {
    /// Don't request client certificates
    None,
    /// Request client certificate but don't require it
    Optional,
    /// Require client certificate
    Required,
}

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TLS version: {0}")]
    InvalidVersion(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
}

/// TLS configuration (immutable after building)
#[derive(Clone)]
pub struct TlsConfig {
    pub(crate) ctx: SslContext,
}

impl TlsConfig {
    /// Create a new server configuration builder
    pub fn server() -> TlsServerBuilder {
        TlsServerBuilder::default()
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig").finish_non_exhaustive()
    }
}

/// Server configuration builder
#[derive(Debug, Default)]
pub struct TlsServerBuilder {
    min_version: Option<TlsVersion>,
    max_version: Option<TlsVersion>,
    cipher_list: Option<String>,
    ciphersuites: Option<String>,
    cert_file: Option<PathBuf>,
    key_file: Option<PathBuf>,
    client_verify: Option<ClientVerify>,
    client_ca: Option<PathBuf>,
    fallback_cn: Option<String>,
}

impl TlsServerBuilder {
    /// Set TLS version (both min and max)
    pub fn version(self, version: TlsVersion) -> Self {
        self.version_range(version, version)
    }

    /// Set TLS version range
    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Self {
        self.min_version = Some(min);
        self.max_version = Some(max);
        self
    }

    /// Set cipher list (for TLS <= 1.2)
    pub fn cipher_list(mut self, ciphers: impl Into<String>) -> Self {
        self.cipher_list = Some(ciphers.into());
        self
    }

    /// Set cipher suites (for TLS 1.3)
    pub fn ciphersuites(mut self, ciphers: impl Into<String>) -> Self {
        self.ciphersuites = Some(ciphers.into());
        self
    }

    /// Load the server certificate (and, unless `key_file` is set, the
    /// private key) from a PEM file
    pub fn cert_file(mut self, path: impl AsRef<Path>) -> Self {
        self.cert_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Load the private key from a separate PEM file
    pub fn key_file(mut self, path: impl AsRef<Path>) -> Self {
        self.key_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set client certificate verification mode
    pub fn client_verify(mut self, mode: ClientVerify) -> Self {
        self.client_verify = Some(mode);
        self
    }

    /// Set CA file for client certificate verification
    pub fn client_verify_ca(mut self, path: impl AsRef<Path>) -> Self {
        self.client_ca = Some(path.as_ref().to_path_buf());
        self
    }

    /// Common name of the self-signed certificate generated when no
    /// certificate file is configured
    pub fn fallback_cn(mut self, cn: impl Into<String>) -> Self {
        self.fallback_cn = Some(cn.into());
        self
    }

    /// Build the TLS configuration
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        let mut ctx = SslContextBuilder::new(SslMethod::tls_server())?;

        if let Some(min) = self.min_version {
            ctx.set_min_proto_version(Some(min.to_openssl_version()))?;
        }
        if let Some(max) = self.max_version {
            ctx.set_max_proto_version(Some(max.to_openssl_version()))?;
        }
        if let Some(ciphers) = &self.cipher_list {
            ctx.set_cipher_list(ciphers)?;
        }
        if let Some(suites) = &self.ciphersuites {
            ctx.set_ciphersuites(suites)?;
        }

        match &self.cert_file {
            Some(cert_file) => {
                let cert_pem = read_pem(cert_file)?;
                let cert = X509::from_pem(&cert_pem)
                    .map_err(|e| TlsError::Certificate(format!("Failed to load certificate: {}", e)))?;
                ctx.set_certificate(&cert)?;

                let key_pem = match &self.key_file {
                    Some(key_file) => read_pem(key_file)?,
                    None => cert_pem,
                };
                let key = PKey::private_key_from_pem(&key_pem)
                    .map_err(|e| TlsError::Certificate(format!("Failed to load private key: {}", e)))?;
                ctx.set_private_key(&key)?;
            }
            None => {
                let cn = self.fallback_cn.as_deref().unwrap_or("localhost");
                let (cert, key) = self_signed(cn)?;
                ctx.set_certificate(&cert)?;
                ctx.set_private_key(&key)?;
            }
        }
        ctx.check_private_key()?;

        if let Some(mode) = self.client_verify {
            ctx.set_verify(match mode {
                ClientVerify::None => SslVerifyMode::NONE,
                ClientVerify::Optional => SslVerifyMode::PEER,
                ClientVerify::Required => SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT,
            });
        }
        if let Some(ca) = &self.client_ca {
            ctx.set_ca_file(ca)?;
        }

        Ok(TlsConfig { ctx: ctx.build() })
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, TlsError> {
    let mut pem = Vec::new();
    File::open(path)?.read_to_end(&mut pem)?;
    Ok(pem)
}
