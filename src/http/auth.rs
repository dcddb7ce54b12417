//! HTTP authentication negotiation
//!
//! The server offers a fixed, ordered table of authentication schemes.
//! Basic is verified directly against the [`AuthProvider`]; the other
//! schemes run a challenge/response exchange through a mechanism context
//! created by the provider. A context is only good for one exchange: it is
//! disposed once the exchange completes or fails, when the client switches
//! scheme, and when the connection ends.
//!
//! # Examples
//!
//! ```
//! use davhttpd::http::auth::{AuthProvider, PasswordTable};
//!
//! let mut table = PasswordTable::new();
//! table.insert("alice", "secret");
//! assert_eq!(table.verify_password("alice", "secret").unwrap(), "alice");
//! assert!(table.verify_password("alice", "wrong").is_err());
//! ```

use super::body::{read_body, BodyFlags};
use super::connection::Connection;
use super::telemetry::redacted_request;
use super::transaction::Transaction;
use super::BASE64_BUF_SIZE;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::fmt;

/// Client response is base64 encoded on the wire
pub const AUTH_BASE64: u8 = 1 << 0;
/// Server sends the first challenge
pub const AUTH_SERVER_FIRST: u8 = 1 << 1;
/// Scheme only works over a persistent connection
pub const AUTH_NEED_PERSIST: u8 = 1 << 2;
/// Scheme needs the request body to verify the response
pub const AUTH_NEED_BODY: u8 = 1 << 3;

/// Identifies an entry of [`AUTH_SCHEMES`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemeId {
    Basic,
    Digest,
    Negotiate,
    Ntlm,
}

impl SchemeId {
    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// An HTTP authentication scheme
#[derive(Debug, PartialEq, Eq)]
pub struct AuthScheme {
    pub id: SchemeId,
    /// Name as used in `Authorization` and `WWW-Authenticate`
    pub name: &'static str,
    /// Mechanism run by the provider, `None` for Basic
    pub mech: Option<&'static str>,
    pub flags: u8,
    /// Header carrying success data; `WWW-Authenticate` when `None`
    pub success_header: Option<&'static str>,
}

impl AuthScheme {
    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// Supported schemes, in the order they are advertised
pub static AUTH_SCHEMES: [AuthScheme; 4] = [
    AuthScheme {
        id: SchemeId::Basic,
        name: "Basic",
        mech: None,
        flags: AUTH_SERVER_FIRST | AUTH_BASE64,
        success_header: None,
    },
    AuthScheme {
        id: SchemeId::Digest,
        name: "Digest",
        mech: Some("DIGEST-MD5"),
        flags: AUTH_NEED_BODY | AUTH_SERVER_FIRST,
        success_header: Some("Authentication-Info"),
    },
    AuthScheme {
        id: SchemeId::Negotiate,
        name: "Negotiate",
        mech: Some("GSS-SPNEGO"),
        flags: AUTH_BASE64,
        success_header: None,
    },
    AuthScheme {
        id: SchemeId::Ntlm,
        name: "NTLM",
        mech: Some("NTLM"),
        flags: AUTH_NEED_PERSIST | AUTH_BASE64,
        success_header: None,
    },
];

/// Set of available schemes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchemeSet(u8);

impl SchemeSet {
    pub fn insert(&mut self, id: SchemeId) {
        self.0 |= id.bit();
    }

    pub fn contains(&self, id: SchemeId) -> bool {
        self.0 & id.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// Outcome of an authentication step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    /// Authenticated (or, for a first Basic round, challenge issued)
    Ok,
    /// Another round trip is needed
    Continue,
    /// Unknown or unavailable mechanism
    NoMech,
    /// No such user
    NoUser,
    /// Authentication failed
    BadAuth,
    /// Malformed client response
    BadParam,
    /// Encoding or protocol error in the exchange
    BadProt,
    /// Not authorized to act as the requested identity
    NoAuthz,
    /// Generic failure
    Fail,
}

impl AuthStatus {
    /// Whether the exchange failed
    pub fn is_failure(&self) -> bool {
        !matches!(self, AuthStatus::Ok | AuthStatus::Continue)
    }
}

impl fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AuthStatus::Ok => "successful result",
            AuthStatus::Continue => "another step is needed in authentication",
            AuthStatus::NoMech => "no mechanism available",
            AuthStatus::NoUser => "user not found",
            AuthStatus::BadAuth => "authentication failure",
            AuthStatus::BadParam => "invalid parameter supplied",
            AuthStatus::BadProt => "bad protocol / cancel",
            AuthStatus::NoAuthz => "authorization failure",
            AuthStatus::Fail => "generic failure",
        };
        f.write_str(text)
    }
}

/// Result of one mechanism round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MechStep {
    /// Send this challenge and wait for the next client response
    Continue(Vec<u8>),
    /// Exchange complete; optional success data for the client
    Success(Vec<u8>),
}

/// Request details for mechanisms that bind the response to the request
#[derive(Debug, Clone, Copy)]
pub struct HttpRequestInfo<'a> {
    pub method: &'a str,
    pub uri: &'a str,
    pub entity: &'a [u8],
    pub non_persist: bool,
}

/// Security properties of the connection handed to mechanism contexts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityProps {
    /// Strength of the protection below HTTP (TLS cipher bits or external)
    pub ssf: u32,
    /// Identity established below HTTP, e.g. by a client certificate
    pub auth_external: Option<String>,
}

/// State of one challenge/response exchange
pub trait MechContext {
    /// Start an exchange for `mech` with the optional initial response
    fn start(&mut self, mech: &str, client_in: Option<&[u8]>) -> Result<MechStep, AuthStatus>;

    /// Continue the exchange with the next client response
    fn step(&mut self, client_in: &[u8]) -> Result<MechStep, AuthStatus>;

    /// Canonical identity once the exchange has succeeded
    fn username(&self) -> Option<String>;

    /// Supply the request a response must be bound to
    fn set_http_request(&mut self, _req: &HttpRequestInfo<'_>) {}
}

/// Authentication back-end
pub trait AuthProvider: Send + Sync {
    /// Mechanism names offered on a connection with these properties
    fn mechanisms(&self, _props: &SecurityProps) -> Vec<String> {
        Vec::new()
    }

    /// Create a fresh mechanism context
    fn new_context(&self, props: &SecurityProps) -> Result<Box<dyn MechContext>, AuthStatus>;

    /// Check a plaintext password, returning the canonical identity
    fn verify_password(&self, user: &str, pass: &str) -> Result<String, AuthStatus>;

    /// Canonicalize an identity named by the client
    fn canonicalize_user(&self, user: &str) -> Result<String, AuthStatus> {
        Ok(user.to_string())
    }

    /// Whether `authn` may act as `authz`
    fn authorize_proxy(&self, authn: &str, authz: &str) -> Result<(), AuthStatus> {
        if authn == authz {
            Ok(())
        } else {
            Err(AuthStatus::NoAuthz)
        }
    }
}

/// Password-only provider backed by an in-memory table
#[derive(Debug, Default, Clone)]
pub struct PasswordTable {
    users: HashMap<String, String>,
}

impl PasswordTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, user: impl Into<String>, pass: impl Into<String>) {
        self.users.insert(user.into(), pass.into());
    }
}

struct NoMechanisms;

impl MechContext for NoMechanisms {
    fn start(&mut self, _mech: &str, _client_in: Option<&[u8]>) -> Result<MechStep, AuthStatus> {
        Err(AuthStatus::NoMech)
    }

    fn step(&mut self, _client_in: &[u8]) -> Result<MechStep, AuthStatus> {
        Err(AuthStatus::NoMech)
    }

    fn username(&self) -> Option<String> {
        None
    }
}

impl AuthProvider for PasswordTable {
    fn new_context(&self, _props: &SecurityProps) -> Result<Box<dyn MechContext>, AuthStatus> {
        Ok(Box::new(NoMechanisms))
    }

    fn verify_password(&self, user: &str, pass: &str) -> Result<String, AuthStatus> {
        match self.users.get(user) {
            None => Err(AuthStatus::NoUser),
            Some(expected) if expected == pass => Ok(user.to_string()),
            Some(_) => Err(AuthStatus::BadAuth),
        }
    }
}

/// Per-connection authentication state
pub struct AuthState {
    ctx: Option<Box<dyn MechContext>>,
    status: AuthStatus,
    pub props: SecurityProps,
    /// Schemes that may be used on this connection
    pub available: SchemeSet,
    /// Nothing can be offered until the connection is encrypted
    pub tls_required: bool,
}

impl AuthState {
    pub fn new(props: SecurityProps) -> Self {
        AuthState {
            ctx: None,
            status: AuthStatus::Ok,
            props,
            available: SchemeSet::default(),
            tls_required: false,
        }
    }

    /// Recompute the available schemes
    ///
    /// Basic needs protection below HTTP, unless plaintext is allowed.
    /// Mechanism schemes need the provider to offer their mechanism.
    pub fn refresh(&mut self, provider: &dyn AuthProvider, allow_plaintext: bool, tls_done: bool) {
        let mut available = SchemeSet::default();
        if self.props.ssf >= 2 || allow_plaintext || tls_done {
            available.insert(SchemeId::Basic);
        }
        for mech in provider.mechanisms(&self.props) {
            if let Some(scheme) = AUTH_SCHEMES.iter().find(|s| s.mech == Some(mech.as_str())) {
                available.insert(scheme.id);
            }
        }
        self.available = available;
        self.tls_required = available.is_empty();
    }

    /// Dispose of the mechanism context; the next exchange starts fresh
    pub fn reset(&mut self) {
        self.ctx = None;
        self.status = AuthStatus::Ok;
    }

    fn context(&mut self, provider: &dyn AuthProvider) -> Result<&mut Box<dyn MechContext>, AuthStatus> {
        if self.ctx.is_none() {
            self.ctx = Some(provider.new_context(&self.props)?);
        }
        self.ctx.as_mut().ok_or(AuthStatus::Fail)
    }
}

impl fmt::Debug for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthState")
            .field("status", &self.status)
            .field("props", &self.props)
            .field("available", &self.available)
            .field("tls_required", &self.tls_required)
            .finish_non_exhaustive()
    }
}

fn encode_challenge(scheme: &AuthScheme, data: &[u8]) -> Result<String, AuthStatus> {
    if scheme.has(AUTH_BASE64) {
        if data.len() / 3 * 4 > BASE64_BUF_SIZE {
            return Err(AuthStatus::BadProt);
        }
        Ok(STANDARD.encode(data))
    } else {
        Ok(String::from_utf8_lossy(data).into_owned())
    }
}

impl Connection {
    /// Process `Authorization` credentials (or a bare scheme name, to
    /// generate an initial challenge)
    ///
    /// Any challenge or success data for the client is left in
    /// `txn.auth_param`. On success the connection's identity is set.
    pub fn authenticate(&mut self, txn: &mut Transaction, creds: &str) -> AuthStatus {
        txn.auth_param = None;

        let (name, client_in) = match creds.split_once(' ') {
            Some((name, resp)) => (name, Some(resp.trim())),
            None => (creds, None),
        };
        let authzid = txn
            .req_hdrs
            .get("Authorize-As")
            .filter(|a| !a.is_empty())
            .map(str::to_string);

        debug!(
            "http_auth: status={:?} scheme='{}' creds='{}{}' authzid='{}'",
            self.auth.status,
            txn.auth_chal.scheme.map(|s| s.name).unwrap_or(""),
            name,
            if client_in.is_some() { " <response>" } else { "" },
            authzid.as_deref().unwrap_or("")
        );

        if let Some(scheme) = txn.auth_chal.scheme {
            if !scheme.name.eq_ignore_ascii_case(name) {
                debug!("http_auth: changing scheme");
                self.auth.reset();
                txn.auth_chal.scheme = None;
            }
        }

        let scheme = match txn.auth_chal.scheme {
            Some(scheme) => scheme,
            None => {
                let found = AUTH_SCHEMES
                    .iter()
                    .find(|s| !name.is_empty() && s.name.eq_ignore_ascii_case(name));
                match found {
                    Some(scheme) if self.auth.available.contains(scheme.id) => {
                        debug!("http_auth: found matching scheme: {}", scheme.name);
                        txn.auth_chal.scheme = Some(scheme);
                        self.auth.status = AuthStatus::Ok;
                        scheme
                    }
                    _ => {
                        debug!("Unknown auth scheme '{}'", name);
                        return AuthStatus::NoMech;
                    }
                }
            }
        };

        let mut client_in = match client_in {
            Some(resp) if scheme.has(AUTH_BASE64) => {
                if resp.len() / 4 * 3 > BASE64_BUF_SIZE {
                    error!("Base64 decode failed: response too large");
                    return AuthStatus::BadProt;
                }
                match STANDARD.decode(resp) {
                    Ok(decoded) => Some(decoded),
                    Err(e) => {
                        error!("Base64 decode failed: {}", e);
                        return AuthStatus::BadProt;
                    }
                }
            }
            Some(resp) => Some(resp.as_bytes().to_vec()),
            None => None,
        };

        if scheme.has(AUTH_NEED_BODY) {
            if !txn.flags.havebody {
                txn.flags.havebody = true;
                let flags = BodyFlags {
                    cont: txn.flags.cont,
                    decode: true,
                    ..BodyFlags::default()
                };
                if let Err(err) = read_body(
                    &mut self.session,
                    &mut txn.req_hdrs,
                    Some(&mut txn.req_body),
                    flags,
                    self.ctx.config.max_message_size,
                    self.ctx.config.max_request_line,
                ) {
                    txn.flags.close = true;
                    txn.set_error(err.desc);
                    return AuthStatus::Fail;
                }
            }

            let req = HttpRequestInfo {
                method: &txn.req_line.meth,
                uri: &txn.req_line.uri,
                entity: &txn.req_body,
                non_persist: txn.flags.close,
            };
            match self.auth.context(self.ctx.auth.as_ref()) {
                Ok(ctx) => ctx.set_http_request(&req),
                Err(status) => return status,
            }
        }

        let identity = if scheme.id == SchemeId::Basic {
            let mut decoded = match client_in.take() {
                Some(decoded) => decoded,
                None => {
                    txn.auth_param = Some(format!("realm=\"{}\"", self.ctx.config.server_name));
                    // Nothing to reset on the next round
                    txn.auth_chal.scheme = None;
                    return self.auth.status;
                }
            };

            let result = match decoded.iter().position(|&b| b == b':') {
                None => {
                    error!("Basic auth: Missing password");
                    Err(AuthStatus::BadParam)
                }
                Some(colon) => {
                    let user = String::from_utf8_lossy(&decoded[..colon]).into_owned();
                    let verified = match std::str::from_utf8(&decoded[colon + 1..]) {
                        Ok(pass) => self.ctx.auth.verify_password(&user, pass),
                        Err(_) => Err(AuthStatus::BadParam),
                    };
                    verified.map_err(|status| {
                        info!(
                            "badlogin: {} Basic {} {}",
                            self.clienthost, user, status
                        );
                        status
                    })
                }
            };
            // Erase the plaintext password
            decoded.iter_mut().for_each(|b| *b = 0);

            match result {
                Ok(identity) => identity,
                Err(status) => {
                    // Don't allow user probing
                    let status = match status {
                        AuthStatus::NoUser => AuthStatus::BadAuth,
                        other => other,
                    };
                    self.auth.status = status;
                    return status;
                }
            }
        } else {
            let mech = scheme.mech.unwrap_or_default();
            let continuing = self.auth.status == AuthStatus::Continue;
            let ctx = match self.auth.context(self.ctx.auth.as_ref()) {
                Ok(ctx) => ctx,
                Err(status) => return status,
            };

            let result = if continuing {
                debug!("http_auth: continue {}", mech);
                ctx.step(client_in.as_deref().unwrap_or_default())
            } else {
                debug!("http_auth: start {}", mech);
                ctx.start(mech, client_in.as_deref())
            };

            let (done, data) = match result {
                Ok(MechStep::Continue(data)) => (false, data),
                Ok(MechStep::Success(data)) => (true, data),
                Err(status) => {
                    error!("{} authentication failed: {}", scheme.name, status);
                    self.auth.status = status;
                    return status;
                }
            };
            let identity = if done { ctx.username() } else { None };

            if !data.is_empty() || !done {
                match encode_challenge(scheme, &data) {
                    Ok(param) => txn.auth_param = Some(param),
                    Err(status) => {
                        error!("Base64 encode failed: challenge too large");
                        self.auth.status = status;
                        return status;
                    }
                }
            }

            if !done {
                self.auth.status = AuthStatus::Continue;
                return AuthStatus::Continue;
            }
            // The exchange is over, its context is not reusable
            self.auth.status = AuthStatus::Ok;
            self.auth.ctx = None;

            match identity {
                Some(identity) => identity,
                None => {
                    error!("{} succeeded without an identity", mech);
                    return AuthStatus::Fail;
                }
            }
        };

        let identity = match authzid {
            None => identity,
            Some(authzid) => {
                let authz = match self.ctx.auth.canonicalize_user(&authzid) {
                    Ok(authz) => authz,
                    Err(status) => {
                        info!(
                            "badlogin: {} {} {} invalid user",
                            self.clienthost,
                            scheme.name,
                            authzid.escape_debug()
                        );
                        return status;
                    }
                };
                if let Err(status) = self.ctx.auth.authorize_proxy(&identity, &authz) {
                    info!(
                        "badlogin: {} {} {} {}",
                        self.clienthost, scheme.name, identity, status
                    );
                    return status;
                }
                authz
            }
        };

        info!(
            "login: {} {} {}{} User logged in",
            self.clienthost,
            identity,
            scheme.name,
            if self.tls.is_some() { "+TLS" } else { "" }
        );

        self.userid = Some(identity.clone());
        txn.userid = Some(identity.clone());
        self.switch_telemetry(txn, &identity);

        for ns in self.ctx.registry.enabled() {
            if let Some(hook) = &ns.auth_hook {
                hook(&identity);
            }
        }

        AuthStatus::Ok
    }

    /// Rewrite the current request in the pre-authentication log with its
    /// credentials redacted, then continue logging under `identity`
    fn switch_telemetry(&mut self, txn: &Transaction, identity: &str) {
        let record = redacted_request(
            &txn.req_line.to_string(),
            &txn.req_hdrs,
            &txn.req_body,
            self.session.buffered(),
        );

        if let (Some(mark), Some(tap)) = (self.req_mark, self.session.tap_mut()) {
            if let Err(e) = tap.rewrite_from(mark, &record) {
                warn!("unable to redact telemetry log: {}", e);
            }
        }

        let next = self.ctx.telemetry.as_ref().and_then(|sink| sink.open(identity));
        let next = next.and_then(|mut log| match log.append(&record) {
            Ok(()) => Some(log),
            Err(e) => {
                warn!("unable to write telemetry log: {}", e);
                None
            }
        });
        self.session.set_tap(next);
        self.req_mark = None;
    }

    /// Dispose of the mechanism context
    pub fn reset_auth_context(&mut self) {
        self.auth.reset();
    }

    /// Recompute which schemes can be offered on this connection
    pub fn compute_available_schemes(&mut self) {
        self.auth.refresh(
            self.ctx.auth.as_ref(),
            self.ctx.config.allow_plaintext,
            self.tls.is_some(),
        );
    }
}
