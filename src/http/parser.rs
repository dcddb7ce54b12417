//! HTTP request parsing
//!
//! This module provides the line-level parsers used by the transaction loop:
//! the request-line, the header block (also used for chunked trailers), the
//! request-target and the `Expect` header.

use super::session::HttpSession;
use super::{Error, Headers, HttpError, Method, Result, Status, Version};

/// Longest request-target path accepted
pub const MAX_PATH: usize = 4096;

/// A parsed request-line
///
/// The raw tokens are kept for logging and error pages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestLine {
    pub meth: String,
    pub uri: String,
    pub ver: String,
    pub version: Version,
}

impl std::fmt::Display for RequestLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.meth, self.uri, self.ver)
    }
}

/// Parse HTTP request line
///
/// Format: METHOD SP request-target SP HTTP-version
/// Example: GET /index.html HTTP/1.1
///
/// Exactly three tokens are required. Any `HTTP/1.<digit>` version is
/// accepted; anything else answers 505.
pub fn parse_request_line(line: &str) -> std::result::Result<RequestLine, HttpError> {
    let parts: Vec<&str> = line.split(' ').filter(|t| !t.is_empty()).collect();

    match parts.len() {
        0 => return Err(HttpError::new(Status::BAD_REQUEST, "Missing request method")),
        1 => return Err(HttpError::new(Status::BAD_REQUEST, "Missing request target")),
        2 => return Err(HttpError::new(Status::BAD_REQUEST, "Missing HTTP version")),
        3 => {}
        _ => {
            return Err(HttpError::new(
                Status::BAD_REQUEST,
                "Unexpected extra arguments in Request-line",
            ))
        }
    }

    let version = Version::from_str(parts[2]).map_err(|_| {
        HttpError::new(
            Status::VERSION_NOT_SUPPORTED,
            "This server only speaks HTTP/1.x",
        )
    })?;

    Ok(RequestLine {
        meth: parts[0].to_string(),
        uri: parts[1].to_string(),
        ver: parts[2].to_string(),
        version,
    })
}

/// Read header fields into `headers` up to and including the empty line
///
/// Obsolete line folding (a line starting with SP or HT) continues the
/// previous field. End of input before the empty line is an error.
pub fn read_header_block(session: &mut HttpSession, headers: &mut Headers, max_line: usize) -> Result<()> {
    loop {
        let line = match session.read_line(max_line)? {
            Some(line) => line,
            None => {
                return Err(Error::Protocol(
                    "Missing separator between headers and body".to_string(),
                ))
            }
        };

        if line.is_empty() {
            return Ok(());
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            if !headers.continue_last(&line) {
                return Err(Error::InvalidHeader(format!(
                    "Continuation without a header: {}",
                    line
                )));
            }
            continue;
        }

        let (name, value) = Headers::parse_header_line(&line)?;
        headers.insert(name, value);
    }
}

/// Parsed request-target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestUri {
    /// Scheme of an absolute-form target
    pub scheme: Option<String>,
    /// Authority (host[:port]) of an absolute-form target
    pub authority: Option<String>,
    /// Path, or `*` for a server-wide OPTIONS
    pub path: String,
    /// Raw query string without the leading `?`
    pub query: Option<String>,
}

/// Parse a request-target
///
/// Accepts origin-form, absolute-form with an `http`/`https` scheme, and
/// `*` for OPTIONS. Every failure answers 400.
pub fn parse_uri(meth: Method, target: &str) -> std::result::Result<RequestUri, HttpError> {
    let bad = |desc: &'static str| HttpError::new(Status::BAD_REQUEST, desc);

    if target == "*" {
        if meth != Method::Options {
            return Err(bad("Illegal request target URI"));
        }
        return Ok(RequestUri {
            path: "*".to_string(),
            ..RequestUri::default()
        });
    }

    let target = target.split('#').next().unwrap_or("");
    let mut uri = RequestUri::default();

    let rest = match target.find("://") {
        Some(pos) if !target.starts_with('/') => {
            let scheme = &target[..pos];
            if !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https") {
                return Err(bad("Unsupported URI scheme"));
            }
            uri.scheme = Some(scheme.to_ascii_lowercase());

            let after = &target[pos + 3..];
            let end = after.find(|c| c == '/' || c == '?').unwrap_or(after.len());
            if end == 0 {
                return Err(bad("Illegal request target URI"));
            }
            uri.authority = Some(after[..end].to_string());
            &after[end..]
        }
        _ => target,
    };

    let (path, query) = match rest.split_once('?') {
        Some((path, query)) => (path, Some(query.to_string())),
        None => (rest, None),
    };

    if path.is_empty() {
        return Err(bad("Empty path in target URI"));
    }
    if !path.starts_with('/') {
        return Err(bad("Illegal request target URI"));
    }
    if path.len() > MAX_PATH {
        return Err(bad("Path too long in target URI"));
    }

    uri.path = path.to_string();
    uri.query = query;
    Ok(uri)
}

/// Whether a `Content-Type` value names the media type `ty`, ignoring
/// parameters and case
pub fn is_mediatype(hdr: &str, ty: &str) -> bool {
    let len = ty.len();
    match hdr.get(..len) {
        Some(prefix) if prefix.eq_ignore_ascii_case(ty) => {
            matches!(hdr.as_bytes().get(len), None | Some(b';' | b' ' | b'\t' | b'\r' | b'\n'))
        }
        _ => false,
    }
}

/// Evaluate the `Expect` header
///
/// Returns whether the client expects `100 Continue`. Any other
/// expectation answers 417.
pub fn parse_expect(headers: &Headers) -> std::result::Result<bool, HttpError> {
    let mut cont = false;
    for token in headers.tokens("Expect") {
        if token.eq_ignore_ascii_case("100-continue") {
            cont = true;
        } else {
            return Err(HttpError::new(
                Status::EXPECTATION_FAILED,
                format!("Unsupported expectation: {}", token),
            ));
        }
    }
    Ok(cont)
}
