//! Server configuration
//!
//! Process-wide, read-only settings shared by every connection. Built once
//! with [`ServerConfig::builder`] and handed to the server wrapped in an `Arc`.

use std::path::PathBuf;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host name used in realms, redirects and error pages
    pub server_name: String,
    /// Product token for the `Server` header and error page footers
    pub server_info: Option<String>,
    /// Idle timeout between requests; `None` disables persistent connections
    pub idle_timeout: Option<Duration>,
    /// Interval for `102 Processing` interim responses during long handlers
    pub keepalive: Option<Duration>,
    /// Maximum request body size in bytes, 0 for unlimited
    pub max_message_size: u64,
    /// Maximum request-line and header-line length in bytes
    pub max_request_line: usize,
    /// Whether responses may be compressed
    pub allow_compress: bool,
    /// Whether `Basic` may be offered over an unprotected connection
    pub allow_plaintext: bool,
    /// Whether `TRACE` is enabled on every namespace
    pub allow_trace: bool,
    /// Root directory served by the default namespace
    pub doc_root: Option<PathBuf>,
    /// Security strength already provided outside this process
    pub external_ssf: u32,
    /// Whether connections start with a TLS handshake (https)
    pub implicit_tls: bool,
}

impl ServerConfig {
    /// Create a builder populated with defaults
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            server_name: "localhost".to_string(),
            server_info: Some(format!("davhttpd/{}", env!("CARGO_PKG_VERSION"))),
            idle_timeout: Some(Duration::from_secs(300)),
            keepalive: None,
            max_message_size: 0,
            max_request_line: 4096,
            allow_compress: false,
            allow_plaintext: false,
            allow_trace: false,
            doc_root: None,
            external_ssf: 0,
            implicit_tls: false,
        }
    }
}

/// Builder for [`ServerConfig`]
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Set the server host name
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.config.server_name = name.into();
        self
    }

    /// Set (or suppress) the `Server` product token
    pub fn server_info(mut self, info: Option<String>) -> Self {
        self.config.server_info = info;
        self
    }

    /// Set the idle timeout; `None` closes the connection after each response
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Set the interim `102 Processing` interval
    pub fn keepalive(mut self, interval: Option<Duration>) -> Self {
        self.config.keepalive = interval;
        self
    }

    /// Set the maximum request body size (0 = unlimited)
    pub fn max_message_size(mut self, size: u64) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Set the maximum request-line length
    pub fn max_request_line(mut self, len: usize) -> Self {
        self.config.max_request_line = len;
        self
    }

    pub fn allow_compress(mut self, allow: bool) -> Self {
        self.config.allow_compress = allow;
        self
    }

    pub fn allow_plaintext(mut self, allow: bool) -> Self {
        self.config.allow_plaintext = allow;
        self
    }

    pub fn allow_trace(mut self, allow: bool) -> Self {
        self.config.allow_trace = allow;
        self
    }

    /// Set the document root served by the default namespace
    pub fn doc_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.doc_root = Some(path.into());
        self
    }

    /// Set the externally provided security strength factor
    pub fn external_ssf(mut self, ssf: u32) -> Self {
        self.config.external_ssf = ssf;
        self
    }

    /// Start every connection with a TLS handshake
    pub fn implicit_tls(mut self, enabled: bool) -> Self {
        self.config.implicit_tls = enabled;
        self
    }

    /// Build the configuration
    pub fn build(self) -> ServerConfig {
        self.config
    }
}
