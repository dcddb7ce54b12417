//! Namespace registry and method dispatch
//!
//! A namespace is a URL-path prefix with its own method table. The registry
//! keeps the namespaces in match order; the built-in default namespace
//! (prefix `""`) is always last so every path finds a home.

use super::connection::Connection;
use super::handlers;
use super::transaction::{RequestTarget, Transaction};
use super::{HttpError, Method, Result, Status};
use crate::ServerConfig;
use std::fmt;
use std::sync::Arc;

/// `OPTIONS`, `GET`, `HEAD`
pub const ALLOW_READ: u32 = 1 << 0;
/// `POST`
pub const ALLOW_POST: u32 = 1 << 1;
/// `PUT`
pub const ALLOW_WRITE: u32 = 1 << 2;
/// `DELETE`
pub const ALLOW_DELETE: u32 = 1 << 3;
/// `TRACE`
pub const ALLOW_TRACE: u32 = 1 << 4;
/// WebDAV methods
pub const ALLOW_DAV: u32 = 1 << 5;
/// Collection creation and property changes
pub const ALLOW_WRITECOL: u32 = 1 << 6;
/// CalDAV
pub const ALLOW_CAL: u32 = 1 << 7;
/// CalDAV scheduling
pub const ALLOW_CAL_SCHED: u32 = 1 << 8;
/// CardDAV
pub const ALLOW_CARD: u32 = 1 << 9;
/// iSchedule
pub const ALLOW_ISCHEDULE: u32 = 1 << 10;

/// What a method handler did with the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// The handler wrote the complete response
    Done,
    /// The loop must answer with this status (an error page for 4xx/5xx)
    Respond(Status),
}

/// Splits a namespace-relative path into the request target
pub type ParsePath = fn(&str, &mut RequestTarget) -> std::result::Result<(), HttpError>;

/// A method handler
///
/// `Err` is reserved for connection failures; request failures are
/// returned as `Handled::Respond`.
pub type MethodProc = fn(&mut Connection, &mut Transaction, Option<ParsePath>) -> Result<Handled>;

/// One entry of a namespace's method table
#[derive(Clone, Copy)]
pub struct MethodEntry {
    pub proc: MethodProc,
    pub params: Option<ParsePath>,
}

impl fmt::Debug for MethodEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodEntry")
            .field("params", &self.params.is_some())
            .finish_non_exhaustive()
    }
}

/// Callback run with the authenticated identity
pub type AuthHook = Arc<dyn Fn(&str) + Send + Sync>;
/// Callback run when a connection ends
pub type ResetHook = Arc<dyn Fn() + Send + Sync>;

/// A URL namespace and its handlers
///
/// # Examples
///
/// ```
/// use davhttpd::http::namespace::{Namespace, ALLOW_READ};
/// use davhttpd::http::Method;
///
/// let ns = Namespace::new("calendar", "/dav/calendars")
///     .allow(ALLOW_READ)
///     .need_auth(true)
///     .well_known("/.well-known/caldav");
/// assert!(ns.handler(Method::Get).is_none());
/// ```
#[derive(Clone)]
pub struct Namespace {
    pub name: &'static str,
    pub enabled: bool,
    pub prefix: String,
    /// Bootstrap path redirected to `prefix`
    pub well_known: Option<String>,
    pub need_auth: bool,
    /// `ALLOW_*` bits
    pub allow: u32,
    methods: [Option<MethodEntry>; Method::COUNT],
    pub auth_hook: Option<AuthHook>,
    pub reset_hook: Option<ResetHook>,
}

impl Namespace {
    pub fn new(name: &'static str, prefix: impl Into<String>) -> Self {
        Namespace {
            name,
            enabled: true,
            prefix: prefix.into(),
            well_known: None,
            need_auth: false,
            allow: 0,
            methods: [None; Method::COUNT],
            auth_hook: None,
            reset_hook: None,
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn allow(mut self, allow: u32) -> Self {
        self.allow = allow;
        self
    }

    pub fn need_auth(mut self, need_auth: bool) -> Self {
        self.need_auth = need_auth;
        self
    }

    pub fn well_known(mut self, path: impl Into<String>) -> Self {
        self.well_known = Some(path.into());
        self
    }

    /// Register a handler for `meth`
    pub fn method(self, meth: Method, proc: MethodProc) -> Self {
        self.method_with(meth, proc, None)
    }

    /// Register a handler for `meth` with a path parser
    pub fn method_with(mut self, meth: Method, proc: MethodProc, params: Option<ParsePath>) -> Self {
        self.methods[meth.index()] = Some(MethodEntry { proc, params });
        self
    }

    pub fn on_auth(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.auth_hook = Some(Arc::new(hook));
        self
    }

    pub fn on_reset(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.reset_hook = Some(Arc::new(hook));
        self
    }

    pub fn handler(&self, meth: Method) -> Option<MethodEntry> {
        self.methods[meth.index()]
    }

    /// Whether `path` falls under this namespace's prefix
    fn matches(&self, path: &str) -> bool {
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/') || path == "*",
            None => false,
        }
    }

    fn well_known_redirect(&self, path: &str, query: Option<&str>) -> Option<String> {
        let well_known = self.well_known.as_deref()?;
        let rest = path.strip_prefix(well_known)?;
        if !rest.is_empty() && !rest.starts_with('/') {
            return None;
        }
        let mut location = format!("{}{}", self.prefix, rest);
        if let Some(query) = query {
            location.push('?');
            location.push_str(query);
        }
        Some(location)
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("prefix", &self.prefix)
            .field("well_known", &self.well_known)
            .field("need_auth", &self.need_auth)
            .field("allow", &format_args!("{:#x}", self.allow))
            .finish_non_exhaustive()
    }
}

/// Result of matching a request path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Well-known bootstrap path; redirect here
    Redirect(String),
    /// Index of the matching namespace
    Found(usize),
}

/// Ordered set of namespaces
#[derive(Debug, Clone)]
pub struct Registry {
    namespaces: Vec<Namespace>,
}

impl Registry {
    /// Build a registry from `namespaces` followed by the default namespace
    pub fn new(namespaces: Vec<Namespace>, config: &ServerConfig) -> Self {
        let mut namespaces = namespaces;
        namespaces.push(handlers::default_namespace());
        if config.allow_trace {
            for ns in &mut namespaces {
                ns.allow |= ALLOW_TRACE;
            }
        }
        Registry { namespaces }
    }

    pub fn get(&self, idx: usize) -> Option<&Namespace> {
        self.namespaces.get(idx)
    }

    pub fn enabled(&self) -> impl Iterator<Item = &Namespace> {
        self.namespaces.iter().filter(|ns| ns.enabled)
    }

    /// Union of the allow bits of every enabled namespace
    pub fn allow_union(&self) -> u32 {
        self.enabled().fold(0, |acc, ns| acc | ns.allow)
    }

    /// Find the namespace for a request path
    ///
    /// The first enabled namespace whose prefix or well-known path matches
    /// wins. `None` is only possible when the default namespace has been
    /// disabled.
    pub fn lookup(&self, path: &str, query: Option<&str>) -> Option<Lookup> {
        for (idx, ns) in self.namespaces.iter().enumerate() {
            if !ns.enabled {
                continue;
            }
            if let Some(location) = ns.well_known_redirect(path, query) {
                return Some(Lookup::Redirect(location));
            }
            if ns.matches(path) {
                return Some(Lookup::Found(idx));
            }
        }
        None
    }

    /// Run every enabled namespace's reset hook
    pub fn reset(&self) {
        for ns in self.enabled() {
            if let Some(hook) = &ns.reset_hook {
                hook();
            }
        }
    }
}
