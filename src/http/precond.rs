//! Conditional request evaluation
//!
//! Implements the precedence of lock checks, the WebDAV `If` header and the
//! HTTP validator headers (`If-Match`, `If-Unmodified-Since`,
//! `If-None-Match`, `If-Modified-Since`, `If-Range`), ending in byte-range
//! selection.

use super::range::{parse_ranges, RangeOutcome};
use super::transaction::Transaction;
use super::{Method, Status};
use log::debug;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Lock state of a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockData {
    /// Lock token as submitted in an `If` header, e.g. `urn:uuid:...`
    pub token: String,
    /// Authenticated identity owning the lock
    pub owner: String,
    /// Expiry as seconds since the epoch
    pub expires: u64,
}

impl LockData {
    /// Whether the lock is still in force
    pub fn is_active(&self) -> bool {
        self.expires > now_secs()
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Compare one entity-tag from a header against the current etag
///
/// `*` matches any existing representation. A weak `W/` prefix is ignored;
/// otherwise the header value must be exactly the quoted etag.
pub fn etagcmp(hdr: &str, etag: Option<&str>) -> bool {
    let etag = match etag {
        Some(etag) => etag,
        None => return false,
    };
    if hdr == "*" {
        return true;
    }

    let hdr = hdr.strip_prefix("W/").unwrap_or(hdr);
    hdr.strip_prefix('"')
        .and_then(|h| h.strip_suffix('"'))
        .map_or(false, |h| h == etag)
}

/// Whether any entity-tag in the comma-separated header values matches
pub fn etag_match(values: &[&str], etag: Option<&str>) -> bool {
    values.iter().any(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .any(|t| etagcmp(t, etag))
    })
}

/// Evaluate a WebDAV `If` header
///
/// Lists are ORed, conditions inside a list ANDed. Every condition is
/// evaluated so that a matching lock token anywhere in the header clears
/// `locked`.
pub fn eval_if(hdr: &str, etag: Option<&str>, lock_token: Option<&str>, locked: &mut bool) -> bool {
    let mut ret = false;

    for list in hdr.split(')').map(str::trim).filter(|l| !l.is_empty()) {
        // Tagged lists carry a resource URL before the opening paren
        let list = match list.find('(') {
            Some(pos) => &list[pos + 1..],
            None => continue,
        };

        let mut ret_l = true;
        for cond in list.split(|c| c == ']' || c == '>').map(str::trim) {
            if cond.is_empty() {
                continue;
            }

            let (not, cond) = match cond.strip_prefix("Not") {
                Some(rest) => (true, rest.trim_start()),
                None => (false, cond),
            };

            let r = if let Some(tag) = cond.strip_prefix('[') {
                etagcmp(tag, etag)
            } else {
                let token = cond.strip_prefix('<').unwrap_or(cond);
                match lock_token {
                    Some(lock_token) if token == lock_token => {
                        *locked = false;
                        true
                    }
                    _ => false,
                }
            };

            ret_l &= r != not;
        }

        ret |= ret_l;
    }

    ret
}

fn parse_date(value: &str) -> Option<u64> {
    httpdate::parse_http_date(value.trim())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
}

/// Evaluate the preconditions of `txn` against a resource
///
/// `lastmod` is seconds since the epoch and `len` the length of the
/// selected representation (0 when unknown). On 206 or 416 the selected
/// ranges are left in `txn.resp_body.ranges`.
pub fn check_precond(
    txn: &mut Transaction,
    lock: Option<&LockData>,
    etag: Option<&str>,
    lastmod: u64,
    len: u64,
) -> Status {
    let meth = txn.meth;
    let mut lock_token = None;
    let mut locked = false;

    txn.resp_body.ranges.clear();

    if let Some(lock) = lock.filter(|l| l.is_active()) {
        lock_token = Some(lock.token.as_str());

        match meth {
            Some(Method::Delete | Method::Lock | Method::Move | Method::Post | Method::Put) => {
                // Only the owner may proceed, and must also submit the token
                if txn.userid.as_deref() != Some(lock.owner.as_str()) {
                    return Status::LOCKED;
                }
                locked = true;
            }
            // UNLOCK authorizes itself; other methods are not blocked
            _ => {}
        }
    }

    let hdrs = &txn.req_hdrs;

    if let Some(hdr) = hdrs.get("If") {
        if !eval_if(hdr, etag, lock_token, &mut locked) {
            return Status::PRECONDITION_FAILED;
        }
    }
    if locked {
        return Status::LOCKED;
    }

    let is_get = matches!(meth, Some(Method::Get | Method::Head));

    let if_match = hdrs.get_all("If-Match");
    if !if_match.is_empty() {
        if !etag_match(&if_match, etag) {
            return Status::PRECONDITION_FAILED;
        }
    } else if let Some(since) = hdrs.get("If-Unmodified-Since").and_then(parse_date) {
        if lastmod > since {
            return Status::PRECONDITION_FAILED;
        }
    }

    let if_none_match = hdrs.get_all("If-None-Match");
    if !if_none_match.is_empty() {
        if etag_match(&if_none_match, etag) {
            return if is_get {
                Status::NOT_MODIFIED
            } else {
                Status::PRECONDITION_FAILED
            };
        }
    } else if is_get {
        if let Some(since) = hdrs.get("If-Modified-Since").and_then(parse_date) {
            if lastmod <= since {
                return Status::NOT_MODIFIED;
            }
        }
    }

    if txn.flags.ranges && meth == Some(Method::Get) {
        if let Some(range) = hdrs.get("Range") {
            let honor = match hdrs.get("If-Range") {
                None => true,
                Some(if_range) => match parse_date(if_range) {
                    Some(since) => lastmod <= since,
                    None => etagcmp(if_range.trim(), etag),
                },
            };

            if honor {
                match parse_ranges(range, len) {
                    RangeOutcome::Full => {}
                    RangeOutcome::Partial(ranges) => {
                        debug!("Serving {} byte range(s)", ranges.len());
                        txn.resp_body.ranges = ranges;
                        return Status::PARTIAL_CONTENT;
                    }
                    RangeOutcome::Unsatisfiable(span) => {
                        txn.resp_body.ranges.push(span);
                        return Status::RANGE_NOT_SATISFIABLE;
                    }
                }
            }
        }
    }

    Status::OK
}

/// Format seconds since the epoch as an HTTP-date
pub fn http_date(secs: u64) -> String {
    httpdate::fmt_http_date(UNIX_EPOCH + Duration::from_secs(secs))
}
