//! HTTP message types
//!
//! This module defines the method table, protocol versions and status codes
//! used throughout the request/response cycle.

use super::{Error, Result};
use std::fmt;

/// HTTP methods known to the server
///
/// The discriminant doubles as the index into each namespace's method table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Acl,
    Copy,
    Delete,
    Get,
    Head,
    Lock,
    MkCalendar,
    MkCol,
    Move,
    Options,
    Post,
    PropFind,
    PropPatch,
    Put,
    Report,
    Trace,
    Unlock,
}

impl Method {
    /// Number of entries in the method table
    pub const COUNT: usize = 17;

    /// Every known method, in table order
    pub const ALL: [Method; Method::COUNT] = [
        Method::Acl,
        Method::Copy,
        Method::Delete,
        Method::Get,
        Method::Head,
        Method::Lock,
        Method::MkCalendar,
        Method::MkCol,
        Method::Move,
        Method::Options,
        Method::Post,
        Method::PropFind,
        Method::PropPatch,
        Method::Put,
        Method::Report,
        Method::Trace,
        Method::Unlock,
    ];

    /// Parse method from string
    ///
    /// Method names are case-sensitive.
    pub fn from_str(s: &str) -> Result<Self> {
        Method::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| Error::InvalidMethod(s.to_string()))
    }

    /// Convert method to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Acl => "ACL",
            Method::Copy => "COPY",
            Method::Delete => "DELETE",
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Lock => "LOCK",
            Method::MkCalendar => "MKCALENDAR",
            Method::MkCol => "MKCOL",
            Method::Move => "MOVE",
            Method::Options => "OPTIONS",
            Method::Post => "POST",
            Method::PropFind => "PROPFIND",
            Method::PropPatch => "PROPPATCH",
            Method::Put => "PUT",
            Method::Report => "REPORT",
            Method::Trace => "TRACE",
            Method::Unlock => "UNLOCK",
        }
    }

    /// Position in the method table
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Methods whose requests never carry a body
    ///
    /// A request for one of these methods that sends `Content-Type` is
    /// rejected with 415.
    pub fn no_body(&self) -> bool {
        matches!(
            self,
            Method::Copy
                | Method::Delete
                | Method::Get
                | Method::Head
                | Method::Move
                | Method::Options
                | Method::Trace
                | Method::Unlock
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// HTTP version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Version {
    Http10,
    #[default]
    Http11,
}

impl Version {
    /// Parse version from string
    ///
    /// Any `HTTP/1.<digit>` is accepted; minor versions above 0 are treated
    /// as 1.1.
    pub fn from_str(s: &str) -> Result<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != 8 || !s.starts_with("HTTP/1.") || !bytes[7].is_ascii_digit() {
            return Err(Error::InvalidVersion(s.to_string()));
        }
        match bytes[7] {
            b'0' => Ok(Version::Http10),
            _ => Ok(Version::Http11),
        }
    }

    /// Convert version to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// HTTP status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Status {
    code: u16,
}

impl Status {
    /// Create a new status code
    pub fn new(code: u16) -> Result<Self> {
        if (100..600).contains(&code) {
            Ok(Status { code })
        } else {
            Err(Error::Parse(format!("Invalid status code: {}", code)))
        }
    }

    /// Get the status code
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Get the canonical reason phrase for this status code
    pub fn reason_phrase(&self) -> &'static str {
        match self.code {
            100 => "Continue",
            101 => "Switching Protocols",
            102 => "Processing",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            204 => "No Content",
            206 => "Partial Content",
            207 => "Multi-Status",
            301 => "Moved Permanently",
            302 => "Found",
            304 => "Not Modified",
            307 => "Temporary Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            406 => "Not Acceptable",
            408 => "Request Timeout",
            409 => "Conflict",
            410 => "Gone",
            411 => "Length Required",
            412 => "Precondition Failed",
            413 => "Payload Too Large",
            414 => "URI Too Long",
            415 => "Unsupported Media Type",
            416 => "Range Not Satisfiable",
            417 => "Expectation Failed",
            422 => "Unprocessable Entity",
            423 => "Locked",
            424 => "Failed Dependency",
            426 => "Upgrade Required",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            505 => "HTTP Version Not Supported",
            507 => "Insufficient Storage",
            _ => "Unknown",
        }
    }

    /// Check if this is an informational status (1xx)
    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// Responses with this status never carry a body
    pub fn forbids_body(&self) -> bool {
        self.is_informational() || self.code == 204 || self.code == 304
    }

    pub const CONTINUE: Status = Status { code: 100 };
    pub const SWITCHING_PROTOCOLS: Status = Status { code: 101 };
    pub const PROCESSING: Status = Status { code: 102 };
    pub const OK: Status = Status { code: 200 };
    pub const CREATED: Status = Status { code: 201 };
    pub const NO_CONTENT: Status = Status { code: 204 };
    pub const PARTIAL_CONTENT: Status = Status { code: 206 };
    pub const MULTI_STATUS: Status = Status { code: 207 };
    pub const MOVED_PERMANENTLY: Status = Status { code: 301 };
    pub const NOT_MODIFIED: Status = Status { code: 304 };
    pub const BAD_REQUEST: Status = Status { code: 400 };
    pub const UNAUTHORIZED: Status = Status { code: 401 };
    pub const FORBIDDEN: Status = Status { code: 403 };
    pub const NOT_FOUND: Status = Status { code: 404 };
    pub const METHOD_NOT_ALLOWED: Status = Status { code: 405 };
    pub const GONE: Status = Status { code: 410 };
    pub const REQUEST_TIMEOUT: Status = Status { code: 408 };
    pub const LENGTH_REQUIRED: Status = Status { code: 411 };
    pub const PRECONDITION_FAILED: Status = Status { code: 412 };
    pub const PAYLOAD_TOO_LARGE: Status = Status { code: 413 };
    pub const URI_TOO_LONG: Status = Status { code: 414 };
    pub const UNSUPPORTED_MEDIA_TYPE: Status = Status { code: 415 };
    pub const RANGE_NOT_SATISFIABLE: Status = Status { code: 416 };
    pub const EXPECTATION_FAILED: Status = Status { code: 417 };
    pub const LOCKED: Status = Status { code: 423 };
    pub const UPGRADE_REQUIRED: Status = Status { code: 426 };
    pub const INTERNAL_SERVER_ERROR: Status = Status { code: 500 };
    pub const NOT_IMPLEMENTED: Status = Status { code: 501 };
    pub const SERVICE_UNAVAILABLE: Status = Status { code: 503 };
    pub const VERSION_NOT_SUPPORTED: Status = Status { code: 505 };
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason_phrase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parsing() {
        assert_eq!(Method::from_str("GET").unwrap(), Method::Get);
        assert_eq!(Method::from_str("PROPFIND").unwrap(), Method::PropFind);
        assert_eq!(Method::from_str("MKCALENDAR").unwrap(), Method::MkCalendar);
        assert!(Method::from_str("get").is_err());
        assert!(Method::from_str("PATCH").is_err());
    }

    #[test]
    fn test_method_table_order() {
        for (i, method) in Method::ALL.iter().enumerate() {
            assert_eq!(method.index(), i);
            assert_eq!(Method::from_str(method.as_str()).unwrap(), *method);
        }
    }

    #[test]
    fn test_method_no_body() {
        assert!(Method::Get.no_body());
        assert!(Method::Unlock.no_body());
        assert!(!Method::Put.no_body());
        assert!(!Method::PropFind.no_body());
    }

    #[test]
    fn test_version_parsing() {
        assert_eq!(Version::from_str("HTTP/1.0").unwrap(), Version::Http10);
        assert_eq!(Version::from_str("HTTP/1.1").unwrap(), Version::Http11);
        assert_eq!(Version::from_str("HTTP/1.9").unwrap(), Version::Http11);
        assert!(Version::from_str("HTTP/2.0").is_err());
        assert!(Version::from_str("HTTP/1.").is_err());
        assert!(Version::from_str("HTTP/1.x").is_err());
        assert!(Version::from_str("HTTP/1.10").is_err());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Status::OK.code(), 200);
        assert_eq!(Status::LOCKED.reason_phrase(), "Locked");
        assert_eq!(Status::PROCESSING.to_string(), "102 Processing");
        assert!(Status::NOT_MODIFIED.forbids_body());
        assert!(Status::NO_CONTENT.forbids_body());
        assert!(!Status::PARTIAL_CONTENT.forbids_body());
        assert!(Status::new(99).is_err());
    }
}
