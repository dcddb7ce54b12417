//! Per-request transaction state
//!
//! One `Transaction` is created per connection and reset before every
//! request. It owns the request header cache, the request body and all
//! response metadata; the buffers keep their allocations across requests.

use super::auth::AuthScheme;
use super::body::{Coding, Deflater};
use super::parser::{RequestLine, RequestUri};
use super::range::ByteRange;
use super::{Headers, Method};
use std::borrow::Cow;

/// Response varies on `Accept-Encoding`
pub const VARY_AE: u8 = 1 << 0;
/// Response varies on `Brief`
pub const VARY_BRIEF: u8 = 1 << 1;
/// Response varies on `Prefer`
pub const VARY_PREFER: u8 = 1 << 2;

/// `Cache-Control: no-cache`
pub const CC_NOCACHE: u8 = 1 << 0;
/// `Cache-Control: no-transform`
pub const CC_NOTRANSFORM: u8 = 1 << 1;
/// `Cache-Control: private`
pub const CC_PRIVATE: u8 = 1 << 2;

/// `Preference-Applied: return=minimal`
pub const PREFER_MIN: u8 = 1 << 0;
/// `Preference-Applied: return=representation`
pub const PREFER_REP: u8 = 1 << 1;
/// `Preference-Applied: depth-noroot`
pub const PREFER_NOROOT: u8 = 1 << 2;

/// Independent per-request flags
#[derive(Debug, Clone, Copy, Default)]
pub struct TxnFlags {
    /// Close the connection after this response
    pub close: bool,
    /// Request was HTTP/1.0
    pub ver1_0: bool,
    /// Client expects `100 Continue`
    pub cont: bool,
    /// Request body has been read (or discarded)
    pub havebody: bool,
    /// Byte ranges may be served for this request
    pub ranges: bool,
    /// `Vary` bits
    pub vary: u8,
    /// `Cache-Control` bits
    pub cc: u8,
    /// Response uses chunked framing
    pub chunked: bool,
    /// Response transfer-coding
    pub te: Coding,
    /// Response content-coding
    pub ce: Coding,
    /// Response body is streamed in pieces
    pub dynamic: bool,
    /// Response must not carry a body; further body writes are ignored
    pub no_body: bool,
}

/// Namespace-specific view of the request-target
#[derive(Debug, Clone, Default)]
pub struct RequestTarget {
    /// Index of the matched namespace in the registry
    pub namespace: Option<usize>,
    /// Path relative to the namespace prefix
    pub path: String,
    pub collection: Option<String>,
    pub resource: Option<String>,
    /// Allowed-method bits of the matched namespace
    pub allow: u32,
}

/// Authentication exchange state
///
/// The scheme survives `Transaction::reset` so a multi-round exchange can
/// continue on the next request of the connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthChallenge {
    pub scheme: Option<&'static AuthScheme>,
}

/// Candidate error details for the error page
#[derive(Debug, Clone, Default)]
pub struct ErrorInfo {
    pub desc: Option<Cow<'static, str>>,
    /// DAV precondition element name, rendered as an XML error body
    pub precond: Option<&'static str>,
}

/// Response metadata and scratch payload
#[derive(Debug, Clone, Default)]
pub struct ResponseBody {
    pub content_type: Option<String>,
    pub enc: Option<&'static str>,
    pub lang: Option<String>,
    pub loc: Option<String>,
    pub etag: Option<String>,
    /// Last-Modified as seconds since the epoch; 0 when unknown
    pub lastmod: u64,
    pub lock: Option<String>,
    pub stag: Option<String>,
    pub len: u64,
    /// Ranges to serve for 206, or the zero span for 416
    pub ranges: Vec<ByteRange>,
    /// `Preference-Applied` bits
    pub prefs: u8,
    pub payload: Vec<u8>,
}

/// State of one request/response exchange
#[derive(Debug, Default)]
pub struct Transaction {
    pub meth: Option<Method>,
    pub req_line: RequestLine,
    pub req_uri: RequestUri,
    pub req_tgt: RequestTarget,
    pub req_hdrs: Headers,
    pub req_body: Vec<u8>,
    pub flags: TxnFlags,
    pub auth_chal: AuthChallenge,
    /// Last challenge or success data for the current scheme
    pub auth_param: Option<String>,
    /// `Location` for redirects and created resources
    pub location: Option<String>,
    pub error: ErrorInfo,
    pub resp_body: ResponseBody,
    /// Authenticated identity for this request
    pub userid: Option<String>,
    pub(crate) zstrm: Option<Deflater>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare for the next request on the connection
    ///
    /// `close` is the default persistence (true when keep-alive is not
    /// configured) and `vary` the default `Vary` bits.
    pub fn reset(&mut self, close: bool, vary: u8) {
        self.meth = None;
        self.req_line = RequestLine::default();
        self.req_uri = RequestUri::default();
        self.req_tgt = RequestTarget::default();
        self.req_hdrs.clear();
        self.req_body.clear();
        self.flags = TxnFlags {
            close,
            vary,
            ..TxnFlags::default()
        };
        self.auth_param = None;
        self.location = None;
        self.error = ErrorInfo::default();

        let mut payload = std::mem::take(&mut self.resp_body.payload);
        payload.clear();
        self.resp_body = ResponseBody {
            payload,
            ..ResponseBody::default()
        };
        self.userid = None;
        self.zstrm = None;
    }

    /// Whether the request method is HEAD
    pub fn is_head(&self) -> bool {
        self.meth == Some(Method::Head)
    }

    /// Record a description for the error page
    pub fn set_error(&mut self, desc: impl Into<Cow<'static, str>>) {
        self.error.desc = Some(desc.into());
    }
}
