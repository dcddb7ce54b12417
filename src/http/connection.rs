//! Per-connection transaction loop
//!
//! A [`Connection`] owns everything that lives as long as one client
//! connection: the session, the authenticated identity, the mechanism
//! context and the TLS state. [`Connection::run`] reads requests one at a
//! time, reusing a single [`Transaction`], and dispatches each one to the
//! handler of the matching namespace.
//!
//! Request-scoped failures are answered with an error page and the
//! connection is kept open. Failures that leave the input stream in an
//! unknown state (timeouts, malformed request-lines or headers) mark the
//! transaction to close after the response.

use super::accept::{accepts, parse_accept};
use super::auth::{AuthProvider, AuthState, AuthStatus, SecurityProps};
use super::body::{read_body, BodyFlags, Coding};
use super::namespace::{Handled, Lookup, Namespace, Registry};
use super::parser::{parse_expect, parse_request_line, parse_uri, read_header_block};
use super::response::{HtmlEscaped, HTML_DOCTYPE};
use super::session::HttpSession;
use super::telemetry::TelemetrySink;
use super::tls::{TlsInfo, TlsUpgrade};
use super::transaction::{Transaction, VARY_AE};
use super::{Error, Headers, HttpError, Method, Result, Status, Version, TLS_VERSION};
use crate::ServerConfig;
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::Arc;

/// Process-wide state shared by every connection
pub struct ServerContext {
    pub config: Arc<ServerConfig>,
    pub registry: Registry,
    pub auth: Arc<dyn AuthProvider>,
    pub tls: Option<Arc<dyn TlsUpgrade>>,
    pub telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl ServerContext {
    /// Create a context serving only the default namespace
    pub fn new(config: ServerConfig, auth: Arc<dyn AuthProvider>) -> Self {
        let registry = Registry::new(Vec::new(), &config);
        ServerContext {
            config: Arc::new(config),
            registry,
            auth,
            tls: None,
            telemetry: None,
        }
    }

    /// Register namespaces, matched in order before the default namespace
    pub fn with_namespaces(mut self, namespaces: Vec<Namespace>) -> Self {
        self.registry = Registry::new(namespaces, &self.config);
        self
    }

    /// Enable TLS (implicit or via `Upgrade: TLS/1.0`)
    pub fn with_tls(mut self, tls: Arc<dyn TlsUpgrade>) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Record raw client input to telemetry logs
    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }
}

impl fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerContext")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("tls", &self.tls.is_some())
            .field("telemetry", &self.telemetry.is_some())
            .finish_non_exhaustive()
    }
}

/// State of one client connection
pub struct Connection {
    pub(crate) session: HttpSession,
    pub(crate) ctx: Arc<ServerContext>,
    pub(crate) clienthost: String,
    pub(crate) local_port: Option<u16>,
    pub(crate) userid: Option<String>,
    pub(crate) auth: AuthState,
    pub(crate) tls: Option<TlsInfo>,
    gzip_enabled: bool,
    /// Telemetry offset where the current request starts
    pub(crate) req_mark: Option<u64>,
}

impl Connection {
    /// Set up a connection for `clienthost` (e.g. `[192.0.2.1]`)
    pub fn new(mut session: HttpSession, ctx: Arc<ServerContext>, clienthost: String) -> Self {
        session.set_timeout(ctx.config.idle_timeout);
        if let Some(sink) = &ctx.telemetry {
            session.set_tap(sink.open(&clienthost));
        }

        let props = SecurityProps {
            ssf: ctx.config.external_ssf,
            auth_external: None,
        };
        let gzip_enabled = ctx.config.allow_compress;

        let mut conn = Connection {
            session,
            ctx,
            clienthost,
            local_port: None,
            userid: None,
            auth: AuthState::new(props),
            tls: None,
            gzip_enabled,
            req_mark: None,
        };
        conn.compute_available_schemes();
        conn
    }

    /// Port the client connected to, shown on error pages
    pub fn set_local_port(&mut self, port: u16) {
        self.local_port = Some(port);
    }

    /// Authenticated identity, if any
    pub fn userid(&self) -> Option<&str> {
        self.userid.as_deref()
    }

    pub fn clienthost(&self) -> &str {
        &self.clienthost
    }

    pub fn config(&self) -> &ServerConfig {
        &self.ctx.config
    }

    pub fn registry(&self) -> &Registry {
        &self.ctx.registry
    }

    /// Negotiated TLS parameters, once the connection is encrypted
    pub fn tls_info(&self) -> Option<&TlsInfo> {
        self.tls.as_ref()
    }

    pub fn session_mut(&mut self) -> &mut HttpSession {
        &mut self.session
    }

    /// Serve requests until the connection closes
    ///
    /// The connection is shut down on return, whatever the outcome.
    pub fn run(&mut self) -> Result<()> {
        let result = if self.ctx.config.implicit_tls {
            match self.starttls() {
                Ok(()) => self.cmdloop(),
                Err(e) => {
                    error!("https failed: {}: {}", self.clienthost, e);
                    Err(e)
                }
            }
        } else {
            self.cmdloop()
        };

        self.shutdown();
        result
    }

    fn cmdloop(&mut self) -> Result<()> {
        let mut txn = Transaction::new();

        loop {
            let close = self.ctx.config.idle_timeout.is_none();
            let vary = if self.gzip_enabled { VARY_AE } else { 0 };
            txn.reset(close, vary);

            if let Some(code) = self.process_request(&mut txn)? {
                self.error_response(code, &mut txn)?;
            }
            // Not every handler writes a response header
            self.session.disarm_alarm();
            self.session.flush_output()?;

            if txn.flags.close {
                debug!("closing connection to {}", self.clienthost);
                return Ok(());
            }
        }
    }

    /// Read and answer one request
    ///
    /// `Some(code)` asks the loop to answer with an error page; `None` means
    /// the response has been written (or there is nobody to answer).
    fn process_request(&mut self, txn: &mut Transaction) -> Result<Option<Status>> {
        let config = Arc::clone(&self.ctx.config);

        debug!("read & parse request-line");
        let mut skipped_empty = false;
        let line = loop {
            self.req_mark = self.session.tap_mark();
            match self.session.read_line(config.max_request_line) {
                // One empty line ahead of the request-line is tolerated
                Ok(Some(line)) if line.is_empty() && !skipped_empty => skipped_empty = true,
                Ok(Some(line)) => break line,
                Ok(None) => {
                    debug!("{} closed connection", self.clienthost);
                    txn.flags.close = true;
                    return Ok(None);
                }
                Err(Error::LineTooLong(max)) => {
                    txn.flags.close = true;
                    txn.set_error(format!(
                        "Length of request-line MUST be less than {} octets",
                        max
                    ));
                    return Ok(Some(Status::URI_TOO_LONG));
                }
                Err(e) if e.is_timeout() => {
                    warn!("{}: client timed out, closing connection", self.clienthost);
                    txn.flags.close = true;
                    return Ok(Some(Status::REQUEST_TIMEOUT));
                }
                Err(e) => {
                    debug!("{}: {}", self.clienthost, e);
                    txn.flags.close = true;
                    return Ok(None);
                }
            }
        };

        txn.req_line = match parse_request_line(&line) {
            Ok(req_line) => req_line,
            Err(err) => {
                // Keep what we can for the access log
                let mut tokens = line.split(' ').filter(|t| !t.is_empty());
                txn.req_line.meth = tokens.next().unwrap_or("").to_string();
                txn.req_line.uri = tokens.next().unwrap_or("").to_string();
                return Ok(Some(fatal(txn, err)));
            }
        };
        if txn.req_line.version == Version::Http10 {
            txn.flags.ver1_0 = true;
            txn.flags.close = true;
        }

        debug!("read & parse headers");
        if let Err(e) = read_header_block(&mut self.session, &mut txn.req_hdrs, config.max_request_line) {
            if e.is_timeout() {
                warn!("{}: client timed out, closing connection", self.clienthost);
            }
            return Ok(Some(fatal(txn, HttpError::from_read(&e, e.to_string()))));
        }

        self.parse_connection(txn)?;

        let meth = match Method::from_str(&txn.req_line.meth) {
            Ok(meth) => meth,
            Err(_) => return Ok(Some(Status::NOT_IMPLEMENTED)),
        };
        txn.meth = Some(meth);

        if !txn.flags.ver1_0 {
            match parse_expect(&txn.req_hdrs) {
                Ok(cont) => {
                    if cont {
                        debug!("client expects 100-continue");
                    }
                    txn.flags.cont = cont;
                }
                Err(err) => return Ok(Some(request_error(txn, err))),
            }
        }

        txn.req_uri = match parse_uri(meth, &txn.req_line.uri) {
            Ok(uri) => uri,
            Err(err) => return Ok(Some(request_error(txn, err))),
        };

        match txn.req_hdrs.count("Host") {
            0 if txn.flags.ver1_0 => {
                let host = txn
                    .req_uri
                    .authority
                    .clone()
                    .unwrap_or_else(|| config.server_name.clone());
                txn.req_hdrs.insert("Host", host);
            }
            0 => {
                txn.set_error("Missing Host header");
                return Ok(Some(Status::BAD_REQUEST));
            }
            1 => {}
            _ => {
                txn.set_error("Too many Host headers");
                return Ok(Some(Status::BAD_REQUEST));
            }
        }

        let ctx = Arc::clone(&self.ctx);
        let idx = match ctx.registry.lookup(&txn.req_uri.path, txn.req_uri.query.as_deref()) {
            Some(Lookup::Redirect(location)) => {
                txn.location = Some(location);
                return Ok(Some(Status::MOVED_PERMANENTLY));
            }
            Some(Lookup::Found(idx)) => idx,
            None => return Ok(Some(Status::INTERNAL_SERVER_ERROR)),
        };
        let ns = match ctx.registry.get(idx) {
            Some(ns) => ns,
            None => return Ok(Some(Status::INTERNAL_SERVER_ERROR)),
        };

        txn.req_tgt.namespace = Some(idx);
        txn.req_tgt.allow = ns.allow;
        txn.req_tgt.path = relative_path(&txn.req_uri.path, &ns.prefix);

        let entry = match ns.handler(meth) {
            Some(entry) => entry,
            None => return Ok(Some(Status::METHOD_NOT_ALLOWED)),
        };
        if meth.no_body() && txn.req_hdrs.contains("Content-Type") {
            return Ok(Some(Status::UNSUPPORTED_MEDIA_TYPE));
        }

        let mut attempt = None;
        if self.userid.is_none() {
            if let Some(creds) = txn.req_hdrs.get("Authorization").map(str::to_string) {
                let status = self.authenticate(txn, &creds);
                if status.is_failure() || txn.auth_chal.scheme.is_none() {
                    debug!("auth failed - reinit");
                    self.reset_auth_context();
                    txn.auth_chal.scheme = None;
                    attempt = Some(AuthStatus::Fail);
                } else {
                    attempt = Some(status);
                }
            } else if txn.auth_chal.scheme.is_some() {
                debug!("client didn't complete auth - reinit");
                self.reset_auth_context();
                txn.auth_chal.scheme = None;
            }
        }
        if self.userid.is_none() && (attempt.is_some() || ns.need_auth) {
            return self.need_auth(txn, attempt);
        }

        if self.gzip_enabled {
            let te = txn.req_hdrs.get_all("TE");
            if !txn.flags.ver1_0 && !te.is_empty() {
                if accepts_gzip(&te) {
                    txn.flags.te = Coding::Gzip;
                }
            } else if accepts_gzip(&txn.req_hdrs.get_all("Accept-Encoding")) {
                txn.flags.ce = Coding::Gzip;
            }
        }

        // HTTP/1.0 clients can't be sent interim responses
        if !txn.flags.ver1_0 {
            self.session.arm_alarm(config.keepalive);
        }

        match (entry.proc)(self, txn, entry.params)? {
            Handled::Done => Ok(None),
            Handled::Respond(code) if code == Status::UNAUTHORIZED => self.need_auth(txn, attempt),
            Handled::Respond(code) => Ok(Some(code)),
        }
    }

    /// Tell the client how to authenticate
    ///
    /// When no scheme can be offered in the clear the client is sent to
    /// TLS instead: `426` for a client that proposed the upgrade itself,
    /// otherwise a redirect to the https URL.
    fn need_auth(&mut self, txn: &mut Transaction, attempt: Option<AuthStatus>) -> Result<Option<Status>> {
        if !self.auth.tls_required {
            txn.set_error(match attempt {
                Some(AuthStatus::Continue) => "Continue authentication exchange",
                Some(AuthStatus::Ok) | None => "Must authenticate to access the specified target",
                Some(_) => "Authentication failed",
            });
            return Ok(Some(Status::UNAUTHORIZED));
        }

        if upgrade_requests_tls(&txn.req_hdrs) {
            self.response_header(Status::UPGRADE_REQUIRED, txn)?;
            return Ok(None);
        }

        let mut url = format!("https://{}", txn.req_hdrs.get("Host").unwrap_or(""));
        if txn.req_uri.path != "*" {
            url.push_str(&txn.req_uri.path);
            if let Some(query) = &txn.req_uri.query {
                url.push('?');
                url.push_str(query);
            }
        }

        let page = format!(
            "{}<html>\n<head>\n<title>TLS Required</title>\n</head>\n\
             <body>\n<h2>TLS is required to use Basic authentication</h2>\n\
             Use <a href=\"{url}\">{url}</a> instead.\n\
             </body>\n</html>\n",
            HTML_DOCTYPE,
            url = HtmlEscaped(&url)
        );
        txn.location = Some(url);
        txn.resp_body.content_type = Some("text/html; charset=utf-8".to_string());
        self.write_body(Some(Status::MOVED_PERMANENTLY), txn, page.as_bytes())?;
        Ok(None)
    }

    /// Apply the `Connection` header and run a requested TLS upgrade
    fn parse_connection(&mut self, txn: &mut Transaction) -> Result<()> {
        let keepalive = self.ctx.config.idle_timeout.is_some();
        let can_upgrade = self.tls.is_none() && self.ctx.tls.is_some();
        let mut tls_upgrade = false;

        for token in txn.req_hdrs.tokens("Connection") {
            if can_upgrade && token.eq_ignore_ascii_case("upgrade") && upgrade_requests_tls(&txn.req_hdrs) {
                debug!("client requested TLS");
                tls_upgrade = true;
            }

            if token.eq_ignore_ascii_case("close") {
                txn.flags.close = true;
            } else if txn.flags.ver1_0 && keepalive && token.eq_ignore_ascii_case("keep-alive") {
                txn.flags.close = false;
            }
        }
        debug!(
            "{} connection",
            if txn.flags.close { "non-persistent" } else { "persistent" }
        );

        if tls_upgrade {
            self.response_header(Status::SWITCHING_PROTOCOLS, txn)?;
            self.starttls()?;
        }
        Ok(())
    }

    /// Encrypt the connection
    ///
    /// Used for implicit TLS at connect time and for an in-band upgrade.
    /// A failed handshake is fatal to the connection.
    fn starttls(&mut self) -> Result<()> {
        let tls = match &self.ctx.tls {
            Some(tls) => Arc::clone(tls),
            None => return Err(Error::Protocol("TLS is not configured".to_string())),
        };

        let info = self
            .session
            .upgrade(|raw| tls.upgrade(raw).map_err(Error::from))?;

        info!(
            "starttls: {} with {} cipher {} ({}-bit){}",
            self.clienthost,
            info.version,
            info.cipher,
            info.ssf,
            info.peer_id
                .as_deref()
                .map(|id| format!(" authenticated as {}", id))
                .unwrap_or_default()
        );

        self.auth.props.ssf = info.ssf;
        self.auth.props.auth_external = info.peer_id.clone();
        self.tls = Some(info);

        // The mechanism context was created for the old security layer
        self.reset_auth_context();
        self.compute_available_schemes();
        Ok(())
    }

    /// Read the request body into `txn.req_body`, once per request
    ///
    /// A client waiting for `100 Continue` is sent one first. A failure
    /// closes the connection after the response.
    pub fn read_request_body(&mut self, txn: &mut Transaction) -> std::result::Result<(), HttpError> {
        if txn.flags.havebody {
            return Ok(());
        }
        txn.flags.havebody = true;

        let flags = BodyFlags {
            cont: txn.flags.cont,
            decode: true,
            ..BodyFlags::default()
        };
        let result = read_body(
            &mut self.session,
            &mut txn.req_hdrs,
            Some(&mut txn.req_body),
            flags,
            self.ctx.config.max_message_size,
            self.ctx.config.max_request_line,
        );
        if result.is_err() {
            txn.flags.close = true;
        }
        result
    }

    /// Release everything tied to the connection
    fn shutdown(&mut self) {
        self.ctx.registry.reset();
        self.reset_auth_context();
        self.tls = None;
        self.session.set_tap(None);
        self.userid = None;

        if let Err(e) = self.session.close() {
            debug!("error closing connection to {}: {}", self.clienthost, e);
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("clienthost", &self.clienthost)
            .field("userid", &self.userid)
            .field("auth", &self.auth)
            .field("tls", &self.tls)
            .finish_non_exhaustive()
    }
}

/// Answer a malformed request and close the connection
fn fatal(txn: &mut Transaction, err: HttpError) -> Status {
    txn.flags.close = true;
    request_error(txn, err)
}

fn request_error(txn: &mut Transaction, err: HttpError) -> Status {
    txn.set_error(err.desc);
    err.status
}

/// Whether the first `Upgrade` protocol is TLS
fn upgrade_requests_tls(hdrs: &Headers) -> bool {
    hdrs.get("Upgrade")
        .and_then(|up| up.split(|c| c == ' ' || c == ',').next())
        .map_or(false, |proto| proto == TLS_VERSION)
}

fn accepts_gzip(values: &[&str]) -> bool {
    if values.is_empty() {
        return false;
    }
    let entries = parse_accept(values);
    accepts(&entries, "gzip") || accepts(&entries, "x-gzip")
}

/// Request path with the namespace prefix removed
fn relative_path(path: &str, prefix: &str) -> String {
    if path == "*" {
        return path.to_string();
    }
    match path.strip_prefix(prefix) {
        Some("") => "/".to_string(),
        Some(rest) => rest.to_string(),
        None => path.to_string(),
    }
}
