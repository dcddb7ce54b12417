//! Response emission
//!
//! `response_header` writes the status-line and header block for the
//! current transaction; `write_body` chooses the payload framing on its
//! first call and streams the body (compressed and/or chunked as
//! negotiated). Error pages and multipart/byteranges bodies are built on
//! top of these two.

use super::auth::{AUTH_NEED_PERSIST, AUTH_SCHEMES, AUTH_SERVER_FIRST};
use super::body::{is_incompressible, read_body, BodyFlags, Coding, Deflater};
use super::chunked::ChunkedEncoder;
use super::connection::Connection;
use super::namespace::{
    ALLOW_CAL, ALLOW_CAL_SCHED, ALLOW_CARD, ALLOW_DAV, ALLOW_ISCHEDULE, ALLOW_WRITE, ALLOW_WRITECOL,
};
use super::precond::http_date;
use super::transaction::{Transaction, VARY_BRIEF, VARY_PREFER};
use super::{Method, Result, Status, CRLF, GZIP_MIN_LEN, HTTP_VERSION, TLS_VERSION};
use log::{debug, info};
use std::fmt::{self, Write as _};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub const HTML_DOCTYPE: &str = "<!DOCTYPE html PUBLIC \"-//W3C//DTD HTML 4.01//EN\" \
                                \"http://www.w3.org/TR/html4/strict.dtd\">\n";

const CACHE_CONTROL: &[&str] = &["no-cache", "no-transform", "private"];
const PREFERENCES: &[&str] = &["return=minimal", "return=representation", "depth-noroot"];
const VARY: &[&str] = &["accept-encoding", "brief", "prefer"];
const ALLOW: &[&str] = &["OPTIONS, GET, HEAD", "POST", "PUT", "DELETE", "TRACE"];

/// Escape `<`, `>`, `&`, `'` and `"` into HTML entities
pub struct HtmlEscaped<'a>(pub &'a str);

impl fmt::Display for HtmlEscaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.0.chars() {
            match c {
                '<' => f.write_str("&lt;")?,
                '>' => f.write_str("&gt;")?,
                '&' => f.write_str("&amp;")?,
                '\'' => f.write_str("&apos;")?,
                '"' => f.write_str("&quot;")?,
                c => f.write_char(c)?,
            }
        }
        Ok(())
    }
}

fn header(wire: &mut Vec<u8>, name: &str, value: &str) {
    wire.extend_from_slice(name.as_bytes());
    wire.extend_from_slice(b": ");
    wire.extend_from_slice(value.as_bytes());
    wire.extend_from_slice(CRLF.as_bytes());
}

/// Render the names selected by `bits` as one comma-separated field
fn comma_list(wire: &mut Vec<u8>, name: &str, vals: &[&str], bits: u32) {
    let selected: Vec<&str> = vals
        .iter()
        .enumerate()
        .filter(|(i, _)| bits & (1 << i) != 0)
        .map(|(_, v)| *v)
        .collect();
    header(wire, name, &selected.join(", "));
}

fn www_authenticate(wire: &mut Vec<u8>, name: &str, param: Option<&str>) {
    match param {
        Some(param) => header(wire, "WWW-Authenticate", &format!("{} {}", name, param)),
        None => header(wire, "WWW-Authenticate", name),
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl Connection {
    /// Write the status-line and header block for `code`
    ///
    /// An unread request body is consumed first (kept for a 401 so an
    /// authentication step can use it, discarded otherwise). Provisional
    /// responses are flushed immediately.
    pub fn response_header(&mut self, code: Status, txn: &mut Transaction) -> Result<()> {
        let config = Arc::clone(&self.ctx.config);

        if !txn.flags.havebody {
            txn.flags.havebody = true;
            let body = if code == Status::UNAUTHORIZED {
                Some(&mut txn.req_body)
            } else {
                None
            };
            let flags = BodyFlags {
                cont: txn.flags.cont,
                decode: true,
                ..BodyFlags::default()
            };
            if let Err(err) = read_body(
                &mut self.session,
                &mut txn.req_hdrs,
                body,
                flags,
                config.max_message_size,
                config.max_request_line,
            ) {
                debug!("unable to read request body: {}", err);
                txn.flags.close = true;
            }
        }

        self.log_request(code, txn);

        self.session.disarm_alarm();

        let upgrade = format!("{}, {}", TLS_VERSION, HTTP_VERSION);
        match code {
            Status::SWITCHING_PROTOCOLS => {
                // No keepalive alarm during the TLS handshake
                return self
                    .session
                    .write_interim(code, &[("Upgrade", upgrade.as_str()), ("Connection", "upgrade")]);
            }
            Status::CONTINUE | Status::PROCESSING => {
                self.session.write_interim(code, &[])?;
                if !txn.flags.ver1_0 {
                    self.session.arm_alarm(config.keepalive);
                }
                return Ok(());
            }
            _ => {}
        }

        let mut wire = Vec::with_capacity(1024);
        wire.extend_from_slice(format!("{} {}{}", HTTP_VERSION, code, CRLF).as_bytes());

        let conn_token = if code == Status::UPGRADE_REQUIRED {
            header(&mut wire, "Upgrade", &upgrade);
            "upgrade, "
        } else {
            ""
        };
        if txn.flags.close {
            header(&mut wire, "Connection", &format!("{}close", conn_token));
        } else {
            let timeout = config.idle_timeout.map(|t| t.as_secs()).unwrap_or(0);
            header(&mut wire, "Keep-Alive", &format!("timeout={}", timeout));
            header(&mut wire, "Connection", &format!("{}keep-alive", conn_token));
        }

        // Control data
        let now = now_secs();
        header(&mut wire, "Date", &http_date(now));
        if self.tls.is_some() {
            header(&mut wire, "Strict-Transport-Security", "max-age=600");
        }
        if txn.flags.cc != 0 {
            comma_list(&mut wire, "Cache-Control", CACHE_CONTROL, txn.flags.cc.into());
        }
        if let Some(location) = &txn.location {
            header(&mut wire, "Location", location);
        }
        if txn.resp_body.prefs != 0 {
            comma_list(&mut wire, "Preference-Applied", PREFERENCES, txn.resp_body.prefs.into());
        }
        if txn.flags.vary != 0 {
            comma_list(&mut wire, "Vary", VARY, txn.flags.vary.into());
        }

        // Response context
        if let Some(info) = &config.server_info {
            header(&mut wire, "Server", info);
        }
        if txn.req_tgt.allow & ALLOW_ISCHEDULE != 0 {
            header(&mut wire, "iSchedule-Version", "1.0");
        }

        if code == Status::UNAUTHORIZED {
            self.auth_challenges(&mut wire, txn);
        } else {
            if let (Some(scheme), Some(param)) = (txn.auth_chal.scheme, txn.auth_param.as_deref()) {
                match scheme.success_header {
                    Some(name) => header(&mut wire, name, param),
                    None => www_authenticate(&mut wire, scheme.name, Some(param)),
                }
            }
            allow_headers(&mut wire, code, txn);
        }

        // Validators
        let body = &txn.resp_body;
        if let Some(lock) = &body.lock {
            header(&mut wire, "Lock-Token", &format!("<{}>", lock));
        }
        if let Some(stag) = &body.stag {
            header(&mut wire, "Schedule-Tag", &format!("\"{}\"", stag));
        }
        if let Some(etag) = &body.etag {
            header(&mut wire, "ETag", &format!("\"{}\"", etag));
        }
        if body.lastmod != 0 {
            // Never in the future
            header(&mut wire, "Last-Modified", &http_date(body.lastmod.min(now)));
        }

        // Representation metadata
        if let Some(content_type) = &body.content_type {
            header(&mut wire, "Content-Type", content_type);
            if let Some(enc) = body.enc {
                header(&mut wire, "Content-Encoding", enc);
            }
            if let Some(lang) = &body.lang {
                header(&mut wire, "Content-Language", lang);
            }
            if let Some(loc) = &body.loc {
                header(&mut wire, "Content-Location", loc);
            }
        }

        // Payload framing
        match code {
            Status::NO_CONTENT | Status::NOT_MODIFIED => {}
            _ => {
                if code == Status::PARTIAL_CONTENT || code == Status::RANGE_NOT_SATISFIABLE {
                    if let Some(range) = body.ranges.first() {
                        let unsatisfiable = code == Status::RANGE_NOT_SATISFIABLE;
                        header(&mut wire, "Content-Range", &range.content_range(unsatisfiable));
                    }
                }
                if txn.flags.chunked {
                    // HTTP/1.0 bodies are close-delimited instead
                    if !txn.flags.ver1_0 {
                        let te = match txn.flags.te {
                            Coding::Identity => "chunked".to_string(),
                            coding => format!("{}, chunked", coding.as_str()),
                        };
                        header(&mut wire, "Transfer-Encoding", &te);
                    }
                } else {
                    header(&mut wire, "Content-Length", &body.len.to_string());
                }
            }
        }

        wire.extend_from_slice(CRLF.as_bytes());
        self.session.write_all(&wire)
    }

    /// `WWW-Authenticate` challenges for a 401
    ///
    /// With no exchange in progress every available scheme that suits the
    /// connection is offered; server-first schemes generate their initial
    /// challenge and are skipped if that fails.
    fn auth_challenges(&mut self, wire: &mut Vec<u8>, txn: &mut Transaction) {
        if let Some(scheme) = txn.auth_chal.scheme {
            www_authenticate(wire, scheme.name, txn.auth_param.as_deref());
            return;
        }

        for scheme in AUTH_SCHEMES.iter() {
            if !self.auth.available.contains(scheme.id)
                || (txn.flags.close && scheme.has(AUTH_NEED_PERSIST))
            {
                continue;
            }
            txn.auth_param = None;
            if scheme.has(AUTH_SERVER_FIRST) {
                self.authenticate(txn, scheme.name);
                if txn.auth_param.is_none() {
                    continue;
                }
            }
            www_authenticate(wire, scheme.name, txn.auth_param.as_deref());
        }
    }

    fn log_request(&self, code: Status, txn: &Transaction) {
        let hdrs = &txn.req_hdrs;
        let mut log = self.clienthost.clone();
        if let Some(userid) = &self.userid {
            log.push_str(&format!(" as \"{}\"", userid));
        }
        if let Some(ua) = hdrs.get("User-Agent") {
            log.push_str(&format!(" with \"{}\"", ua));
        }
        log.push_str(&format!("; \"{}", txn.req_line.meth));
        if !txn.req_line.uri.is_empty() {
            log.push_str(&format!(" {}", txn.req_line.uri));
        }
        if !txn.req_line.ver.is_empty() {
            log.push_str(&format!(" {}", txn.req_line.ver));
        }
        log.push('"');
        if let Some(dest) = hdrs.get("Destination") {
            log.push_str(&format!(" (destination={})", dest));
        } else if let Some(ty) = hdrs.get(":type") {
            log.push_str(&format!(" (type={}", ty));
            if let Some(depth) = hdrs.get("Depth") {
                log.push_str(&format!("; depth={}", depth));
            }
            log.push(')');
        }
        log.push_str(&format!(" => \"{}\"", code));
        if let Some(location) = &txn.location {
            log.push_str(&format!(" (location={})", location));
        } else if let Some(desc) = &txn.error.desc {
            log.push_str(&format!(" (error={})", desc));
        }
        info!("{}", log);
    }

    /// Write response body data
    ///
    /// The first call for a response passes `Some(code)`: it picks the
    /// framing, writes the header and the first piece of body. A streamed
    /// (chunked) response continues with `None` calls and ends with an
    /// empty one. Bodies of 1xx, 204 and 304 responses and of HEAD requests
    /// are never written.
    pub fn write_body(&mut self, code: Option<Status>, txn: &mut Transaction, buf: &[u8]) -> Result<()> {
        if let Some(code) = code {
            let flags = &mut txn.flags;
            flags.dynamic = flags.chunked;

            if (!flags.dynamic && buf.len() < GZIP_MIN_LEN)
                || is_incompressible(txn.resp_body.content_type.as_deref())
            {
                flags.ce = Coding::Identity;
                flags.te = Coding::Identity;
            }

            if flags.te != Coding::Identity {
                // Compressed output is always streamed
                flags.chunked = true;
            } else if flags.ce != Coding::Identity {
                txn.resp_body.enc = Some(flags.ce.as_str());
                flags.chunked = true;
            } else if !flags.dynamic {
                txn.resp_body.len = buf.len() as u64;
            }

            if flags.ver1_0 && flags.chunked {
                flags.close = true;
            }

            self.response_header(code, txn)?;

            if code.forbids_body() || txn.is_head() {
                txn.flags.no_body = true;
                return Ok(());
            }

            txn.zstrm = match (txn.flags.te, txn.flags.ce) {
                (Coding::Identity, Coding::Identity) => None,
                (Coding::Identity, ce) => Some(Deflater::new(ce)),
                (te, _) => Some(Deflater::new(te)),
            };
        }

        if txn.flags.no_body {
            return Ok(());
        }

        let ver1_0 = txn.flags.ver1_0;
        if txn.flags.te != Coding::Identity || txn.flags.ce != Coding::Identity {
            let last = !(txn.flags.dynamic && !buf.is_empty());
            let out = match txn.zstrm.take() {
                Some(mut zstrm) if !last => {
                    let out = zstrm.push(buf)?;
                    txn.zstrm = Some(zstrm);
                    out
                }
                Some(zstrm) => zstrm.finish(buf)?,
                // Stream already finished
                None => return Ok(()),
            };

            if ver1_0 {
                self.session.write_all(&out)?;
            } else {
                let mut chunks = ChunkedEncoder::new(&mut self.session);
                chunks.write_chunk(&out)?;
                if last {
                    chunks.finish()?;
                }
            }
        } else if txn.flags.dynamic && !ver1_0 {
            let mut chunks = ChunkedEncoder::new(&mut self.session);
            if buf.is_empty() {
                chunks.finish()?;
            } else {
                chunks.write_chunk(buf)?;
            }
        } else {
            // Full body, or HTTP/1.0 close-delimited data
            self.session.write_all(buf)?;
        }
        Ok(())
    }

    /// Answer with an error page for `code`
    ///
    /// A DAV precondition, when set, is rendered as an XML error body in
    /// place of the HTML page.
    pub fn error_response(&mut self, code: Status, txn: &mut Transaction) -> Result<()> {
        // Neither Brief nor Prefer affect error bodies
        txn.flags.vary &= !(VARY_BRIEF | VARY_PREFER);
        txn.resp_body.prefs = 0;

        let mut page = std::mem::take(&mut txn.resp_body.payload);
        page.clear();

        if let Some(precond) = txn.error.precond {
            page.extend_from_slice(
                format!(
                    "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
                     <D:error xmlns:D=\"DAV:\"><D:{}/></D:error>\n",
                    precond
                )
                .as_bytes(),
            );
            txn.resp_body.content_type = Some("application/xml; charset=utf-8".to_string());
        } else {
            if txn.error.desc.is_none() {
                let desc = match code {
                    Status::BAD_REQUEST => Some("The request was not understood by this server."),
                    Status::NOT_FOUND => Some("The requested URL was not found on this server."),
                    Status::METHOD_NOT_ALLOWED => {
                        Some("The requested method is not allowed for the URL.")
                    }
                    Status::GONE => Some("The requested URL has been removed from this server."),
                    Status::INTERNAL_SERVER_ERROR => Some("The server encountered an internal error."),
                    Status::NOT_IMPLEMENTED => {
                        Some("The requested method is not implemented by this server.")
                    }
                    Status::SERVICE_UNAVAILABLE => {
                        Some("The server is unable to process the request at this time.")
                    }
                    _ => None,
                };
                if let Some(desc) = desc {
                    txn.set_error(desc);
                }
            }

            if let Some(desc) = &txn.error.desc {
                let config = &self.ctx.config;

                // Description, host and port may all carry client bytes
                let mut html = format!(
                    "{doctype}<html>\n<head>\n<title>{code}</title>\n</head>\n\
                     <body>\n<h1>{reason}</h1>\n<p>{desc}</p>\n",
                    doctype = HTML_DOCTYPE,
                    code = code,
                    reason = code.reason_phrase(),
                    desc = HtmlEscaped(desc),
                );
                if let Some(info) = &config.server_info {
                    let (host, port) = match txn.req_hdrs.get("Host").filter(|h| !h.is_empty()) {
                        Some(host) => match host.split_once(':') {
                            Some((host, port)) => (host.to_string(), Some(port.to_string())),
                            None => (host.to_string(), None),
                        },
                        None => (config.server_name.clone(), None),
                    };
                    let port = port
                        .or_else(|| self.local_port.map(|p| p.to_string()))
                        .unwrap_or_default();

                    html.push_str(&format!(
                        "<hr>\n<address>{} Server at {} Port {}</address>\n",
                        HtmlEscaped(info),
                        HtmlEscaped(&host),
                        HtmlEscaped(&port),
                    ));
                }
                html.push_str("</body>\n</html>\n");
                page.extend_from_slice(html.as_bytes());
                txn.resp_body.content_type = Some("text/html; charset=utf-8".to_string());
            }
        }

        let result = self.write_body(Some(code), txn, &page);
        txn.resp_body.payload = page;
        result
    }

    /// Send the selected ranges of `data` as multipart/byteranges
    pub fn multipart_byteranges(&mut self, txn: &mut Transaction, data: &[u8]) -> Result<()> {
        let ranges = std::mem::take(&mut txn.resp_body.ranges);
        let part_type = txn
            .resp_body
            .content_type
            .take()
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        let boundary = format!(
            "{}-{}-{}-{}",
            txn.req_hdrs.get("Host").unwrap_or(self.ctx.config.server_name.as_str()),
            std::process::id(),
            now.as_secs(),
            now.subsec_nanos()
        );

        txn.resp_body.content_type = Some(format!("multipart/byteranges; boundary=\"{}\"", boundary));
        txn.flags.chunked = true;
        self.write_body(
            Some(Status::PARTIAL_CONTENT),
            txn,
            b"This is a message with multiple parts in MIME format.\r\n",
        )?;

        for range in &ranges {
            let part = format!(
                "\r\n--{}\r\nContent-Type: {}\r\nContent-Range: {}\r\n\r\n",
                boundary,
                part_type,
                range.content_range(false)
            );
            self.write_body(None, txn, part.as_bytes())?;

            let first = range.first as usize;
            let last = (range.last as usize).min(data.len().saturating_sub(1));
            if let Some(slice) = data.get(first..=last) {
                self.write_body(None, txn, slice)?;
            }
        }

        let close = format!("\r\n--{}--\r\n", boundary);
        self.write_body(None, txn, close.as_bytes())?;
        self.write_body(None, txn, &[])
    }
}

/// `Accept-Ranges`, `DAV` and `Allow` headers
fn allow_headers(wire: &mut Vec<u8>, code: Status, txn: &Transaction) {
    let allow = txn.req_tgt.allow;
    let mut code = code;

    match txn.meth {
        Some(Method::Get | Method::Head) if code == Status::OK => {
            header(wire, "Accept-Ranges", if txn.flags.ranges { "bytes" } else { "none" });
        }
        Some(Method::Options) if code == Status::OK => {
            if allow & ALLOW_DAV != 0 {
                header(
                    wire,
                    "DAV",
                    &format!(
                        "1,{} 3, access-control{}",
                        if allow & ALLOW_WRITE != 0 { " 2," } else { "" },
                        if allow & ALLOW_WRITECOL != 0 { ", extended-mkcol" } else { "" }
                    ),
                );
                if allow & ALLOW_CAL != 0 {
                    header(
                        wire,
                        "DAV",
                        &format!(
                            "calendar-access{}",
                            if allow & ALLOW_CAL_SCHED != 0 {
                                ", calendar-auto-schedule"
                            } else {
                                ""
                            }
                        ),
                    );
                }
                if allow & ALLOW_CARD != 0 {
                    header(wire, "DAV", "addressbook");
                }
            }
            // OPTIONS also lists the allowed methods
            code = Status::METHOD_NOT_ALLOWED;
        }
        _ => {}
    }

    if code == Status::METHOD_NOT_ALLOWED {
        comma_list(wire, "Allow", ALLOW, allow);

        if allow & ALLOW_DAV != 0 {
            let mut dav = String::from("PROPFIND, REPORT");
            if allow & ALLOW_WRITE != 0 {
                dav.push_str(", COPY, MOVE, LOCK, UNLOCK");
            }
            if allow & ALLOW_WRITECOL != 0 {
                dav.push_str(", PROPPATCH, MKCOL, ACL");
            }
            header(wire, "Allow", &dav);
            if allow & ALLOW_WRITECOL != 0 && allow & ALLOW_CAL != 0 {
                header(wire, "Allow", "MKCALENDAR");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::auth::PasswordTable;
    use crate::http::connection::ServerContext;
    use crate::http::namespace::{ALLOW_READ, ALLOW_TRACE};
    use crate::http::range::ByteRange;
    use crate::http::session::MemoryOps;
    use crate::http::transaction::{CC_NOCACHE, VARY_AE};
    use crate::http::HttpSession;
    use crate::ServerConfig;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use std::sync::Mutex;

    fn connection(config: ServerConfig) -> (Connection, Arc<Mutex<Vec<u8>>>) {
        let mut table = PasswordTable::new();
        table.insert("alice", "secret");
        let context = Arc::new(ServerContext::new(config, Arc::new(table)));
        let ops = MemoryOps::new(Vec::new());
        let output = ops.output();
        let mut conn = Connection::new(HttpSession::new(Box::new(ops)), context, "[10.0.0.1]".to_string());
        conn.compute_available_schemes();
        (conn, output)
    }

    fn get_txn() -> Transaction {
        let mut txn = Transaction::new();
        txn.meth = Some(Method::Get);
        txn.flags.havebody = true;
        txn.req_tgt.allow = ALLOW_READ;
        txn
    }

    fn written(conn: &mut Connection, output: &Arc<Mutex<Vec<u8>>>) -> String {
        conn.session.flush_output().unwrap();
        String::from_utf8_lossy(&output.lock().unwrap()).into_owned()
    }

    fn split(response: &str) -> (&str, &str) {
        response.split_once("\r\n\r\n").unwrap()
    }

    #[test]
    fn test_full_body_has_length() {
        let (mut conn, output) = connection(ServerConfig::default());
        let mut txn = get_txn();
        txn.resp_body.content_type = Some("text/plain".to_string());
        txn.resp_body.etag = Some("1-5".to_string());
        txn.flags.cc = CC_NOCACHE;

        conn.write_body(Some(Status::OK), &mut txn, b"hello").unwrap();
        let out = written(&mut conn, &output);
        let (head, body) = split(&out);

        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("\r\nContent-Length: 5"));
        assert!(head.contains("\r\nContent-Type: text/plain"));
        assert!(head.contains("\r\nETag: \"1-5\""));
        assert!(head.contains("\r\nCache-Control: no-cache"));
        assert!(head.contains("\r\nConnection: keep-alive"));
        assert!(head.contains("\r\nKeep-Alive: timeout=300"));
        assert!(head.contains("\r\nAccept-Ranges: none"));
        assert!(head.contains("\r\nServer: davhttpd/"));
        assert_eq!(body, "hello");
    }

    #[test]
    fn test_head_and_304_have_no_body() {
        let (mut conn, output) = connection(ServerConfig::default());
        let mut txn = get_txn();
        txn.meth = Some(Method::Head);
        conn.write_body(Some(Status::OK), &mut txn, b"hello").unwrap();
        conn.write_body(None, &mut txn, b"more").unwrap();
        let out = written(&mut conn, &output);
        let (head, body) = split(&out);
        assert!(head.contains("Content-Length: 5"));
        assert_eq!(body, "");

        let (mut conn, output) = connection(ServerConfig::default());
        let mut txn = get_txn();
        txn.resp_body.etag = Some("v1".to_string());
        conn.write_body(Some(Status::NOT_MODIFIED), &mut txn, b"ignored").unwrap();
        let out = written(&mut conn, &output);
        let (head, body) = split(&out);
        assert!(head.starts_with("HTTP/1.1 304 Not Modified"));
        assert!(!head.contains("Content-Length"));
        assert!(head.contains("ETag: \"v1\""));
        assert_eq!(body, "");
    }

    #[test]
    fn test_chunked_stream() {
        let (mut conn, output) = connection(ServerConfig::default());
        let mut txn = get_txn();
        txn.flags.chunked = true;
        txn.resp_body.content_type = Some("text/plain".to_string());

        conn.write_body(Some(Status::OK), &mut txn, b"abc").unwrap();
        conn.write_body(None, &mut txn, b"defgh").unwrap();
        conn.write_body(None, &mut txn, &[]).unwrap();

        let out = written(&mut conn, &output);
        let (head, body) = split(&out);
        assert!(head.contains("Transfer-Encoding: chunked"));
        assert!(!head.contains("Content-Length"));
        assert_eq!(body, "3\r\nabc\r\n5\r\ndefgh\r\n0\r\n\r\n");
    }

    #[test]
    fn test_http10_stream_is_close_delimited() {
        let (mut conn, output) = connection(ServerConfig::default());
        let mut txn = get_txn();
        txn.flags.ver1_0 = true;
        txn.flags.chunked = true;

        conn.write_body(Some(Status::OK), &mut txn, b"abc").unwrap();
        conn.write_body(None, &mut txn, b"def").unwrap();
        conn.write_body(None, &mut txn, &[]).unwrap();

        assert!(txn.flags.close);
        let out = written(&mut conn, &output);
        let (head, body) = split(&out);
        assert!(head.contains("Connection: close"));
        assert!(!head.contains("Transfer-Encoding"));
        assert_eq!(body, "abcdef");
    }

    #[test]
    fn test_gzip_content_coding() {
        let (mut conn, output) = connection(ServerConfig::default());
        let mut txn = get_txn();
        txn.flags.ce = Coding::Gzip;
        txn.flags.vary = VARY_AE;
        txn.resp_body.content_type = Some("text/plain".to_string());
        let text = "compress me please ".repeat(40);

        conn.write_body(Some(Status::OK), &mut txn, text.as_bytes()).unwrap();
        conn.session.flush_output().unwrap();
        let out = output.lock().unwrap().clone();
        let split_at = out.windows(4).position(|w| w == b"\r\n\r\n").unwrap();
        let head = String::from_utf8_lossy(&out[..split_at]).into_owned();
        assert!(head.contains("Content-Encoding: gzip"));
        assert!(head.contains("Transfer-Encoding: chunked"));
        assert!(head.contains("Vary: accept-encoding"));

        // Undo the chunking, then the gzip coding
        let mut rest = &out[split_at + 4..];
        let mut gz = Vec::new();
        loop {
            let eol = rest.windows(2).position(|w| w == b"\r\n").unwrap();
            let size = usize::from_str_radix(std::str::from_utf8(&rest[..eol]).unwrap(), 16).unwrap();
            rest = &rest[eol + 2..];
            if size == 0 {
                break;
            }
            gz.extend_from_slice(&rest[..size]);
            rest = &rest[size + 2..];
        }
        let mut decoded = String::new();
        GzDecoder::new(&gz[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, text);
    }

    #[test]
    fn test_small_or_incompressible_bodies_not_compressed() {
        let (mut conn, output) = connection(ServerConfig::default());
        let mut txn = get_txn();
        txn.flags.ce = Coding::Gzip;
        conn.write_body(Some(Status::OK), &mut txn, b"short").unwrap();
        let out = written(&mut conn, &output);
        assert!(!out.contains("Content-Encoding"));
        assert!(out.ends_with("\r\n\r\nshort"));

        let (mut conn, output) = connection(ServerConfig::default());
        let mut txn = get_txn();
        txn.flags.ce = Coding::Gzip;
        txn.resp_body.content_type = Some("image/png".to_string());
        conn.write_body(Some(Status::OK), &mut txn, &[0u8; 1000]).unwrap();
        let out = written(&mut conn, &output);
        assert!(!out.contains("Content-Encoding"));
        assert!(out.contains("Content-Length: 1000"));
    }

    #[test]
    fn test_content_range() {
        let (mut conn, output) = connection(ServerConfig::default());
        let mut txn = get_txn();
        txn.resp_body.ranges = vec![ByteRange { first: 0, last: 0, len: 1000 }];
        conn.write_body(Some(Status::RANGE_NOT_SATISFIABLE), &mut txn, &[]).unwrap();
        let out = written(&mut conn, &output);
        assert!(out.contains("Content-Range: bytes */1000"));
    }

    #[test]
    fn test_unauthorized_offers_basic_realm() {
        let config = ServerConfig::builder()
            .server_name("dav.example.com")
            .allow_plaintext(true)
            .build();
        let (mut conn, output) = connection(config);
        let mut txn = get_txn();

        conn.error_response(Status::UNAUTHORIZED, &mut txn).unwrap();
        let out = written(&mut conn, &output);
        assert!(out.starts_with("HTTP/1.1 401 Unauthorized"));
        assert!(out.contains("WWW-Authenticate: Basic realm=\"dav.example.com\""));
        assert!(txn.auth_chal.scheme.is_none());
    }

    #[test]
    fn test_method_not_allowed_lists_methods() {
        let (mut conn, output) = connection(ServerConfig::default());
        let mut txn = get_txn();
        txn.meth = Some(Method::Put);
        txn.req_tgt.allow = ALLOW_READ | ALLOW_TRACE | ALLOW_DAV | ALLOW_WRITE;

        conn.error_response(Status::METHOD_NOT_ALLOWED, &mut txn).unwrap();
        let out = written(&mut conn, &output);
        assert!(out.contains("\r\nAllow: OPTIONS, GET, HEAD, PUT, TRACE\r\n"));
        assert!(out.contains("\r\nAllow: PROPFIND, REPORT, COPY, MOVE, LOCK, UNLOCK\r\n"));
        assert!(out.contains("<p>The requested method is not allowed for the URL.</p>"));
    }

    #[test]
    fn test_options_dav_headers() {
        let (mut conn, output) = connection(ServerConfig::default());
        let mut txn = get_txn();
        txn.meth = Some(Method::Options);
        txn.req_tgt.allow = ALLOW_READ | ALLOW_DAV | ALLOW_WRITE | ALLOW_CAL | ALLOW_CAL_SCHED;

        conn.response_header(Status::OK, &mut txn).unwrap();
        let out = written(&mut conn, &output);
        assert!(out.contains("\r\nDAV: 1, 2, 3, access-control\r\n"));
        assert!(out.contains("\r\nDAV: calendar-access, calendar-auto-schedule\r\n"));
        assert!(out.contains("\r\nAllow: OPTIONS, GET, HEAD, PUT\r\n"));
    }

    #[test]
    fn test_error_page() {
        let (mut conn, output) = connection(ServerConfig::default());
        let mut txn = get_txn();
        txn.req_hdrs.insert("Host", "dav.example.com:8008");

        conn.error_response(Status::NOT_FOUND, &mut txn).unwrap();
        let out = written(&mut conn, &output);
        let (head, body) = split(&out);
        assert!(head.contains("Content-Type: text/html; charset=utf-8"));
        assert!(body.contains("<title>404 Not Found</title>"));
        assert!(body.contains("<h1>Not Found</h1>"));
        assert!(body.contains("Server at dav.example.com Port 8008</address>"));
    }

    #[test]
    fn test_html_escaped() {
        assert_eq!(HtmlEscaped("a<b>&'\"c").to_string(), "a&lt;b&gt;&amp;&apos;&quot;c");
        assert_eq!(HtmlEscaped("plain text").to_string(), "plain text");
    }

    #[test]
    fn test_error_page_escapes_client_input() {
        let (mut conn, output) = connection(ServerConfig::default());
        let mut txn = get_txn();
        txn.req_hdrs.insert("Host", "<b>evil</b>:<i>80</i>");
        txn.set_error("Unsupported expectation: <script>alert(1)</script>".to_string());

        conn.error_response(Status::EXPECTATION_FAILED, &mut txn).unwrap();
        let out = written(&mut conn, &output);
        let (_, body) = split(&out);
        assert!(body.contains("<p>Unsupported expectation: &lt;script&gt;alert(1)&lt;/script&gt;</p>"));
        assert!(body.contains("Server at &lt;b&gt;evil&lt;/b&gt; Port &lt;i&gt;80&lt;/i&gt;</address>"));
        assert!(!body.contains("<script>"));
        assert!(!body.contains("<b>"));
    }

    #[test]
    fn test_error_page_without_host() {
        let (mut conn, output) = connection(ServerConfig::builder().server_name("dav.example.com").build());
        conn.set_local_port(8443);
        let mut txn = get_txn();

        conn.error_response(Status::BAD_REQUEST, &mut txn).unwrap();
        let out = written(&mut conn, &output);
        let (_, body) = split(&out);
        assert!(body.contains("<p>The request was not understood by this server.</p>"));
        assert!(body.contains("<address>davhttpd/"));
        assert!(body.contains(" Server at dav.example.com Port 8443</address>"));
    }

    #[test]
    fn test_error_page_without_server_info() {
        let config = ServerConfig::builder().server_info(None).build();
        let (mut conn, output) = connection(config);
        let mut txn = get_txn();
        txn.req_hdrs.insert("Host", "dav.example.com:8008");

        conn.error_response(Status::NOT_FOUND, &mut txn).unwrap();
        let out = written(&mut conn, &output);
        let (head, body) = split(&out);
        assert!(!head.contains("\r\nServer:"));
        assert!(body.contains("<p>The requested URL was not found on this server.</p>"));
        assert!(!body.contains("<address>"));
        assert!(!body.contains("dav.example.com"));
        assert!(body.ends_with("</body>\n</html>\n"));
    }

    #[test]
    fn test_precondition_error_is_xml() {
        let (mut conn, output) = connection(ServerConfig::default());
        let mut txn = get_txn();
        txn.meth = Some(Method::Put);
        txn.error.precond = Some("supported-calendar-data");

        conn.error_response(Status::FORBIDDEN, &mut txn).unwrap();
        let out = written(&mut conn, &output);
        assert!(out.contains("Content-Type: application/xml; charset=utf-8"));
        assert!(out.contains("<D:error xmlns:D=\"DAV:\"><D:supported-calendar-data/></D:error>"));
    }

    #[test]
    fn test_multipart_byteranges() {
        let (mut conn, output) = connection(ServerConfig::default());
        let mut txn = get_txn();
        txn.req_hdrs.insert("Host", "example.com");
        txn.resp_body.content_type = Some("text/plain".to_string());
        txn.resp_body.ranges = vec![
            ByteRange { first: 0, last: 1, len: 10 },
            ByteRange { first: 8, last: 9, len: 10 },
        ];

        conn.multipart_byteranges(&mut txn, b"0123456789").unwrap();
        let out = written(&mut conn, &output);
        let (head, body) = split(&out);
        assert!(head.starts_with("HTTP/1.1 206 Partial Content"));
        assert!(head.contains("Content-Type: multipart/byteranges; boundary=\"example.com-"));
        assert!(head.contains("Transfer-Encoding: chunked"));
        assert!(!head.contains("Content-Range"));
        assert!(body.contains("Content-Range: bytes 0-1/10"));
        assert!(body.contains("Content-Range: bytes 8-9/10"));
        assert!(body.contains("\r\n01\r\n"));
        assert!(body.contains("\r\n89\r\n"));
        assert!(body.ends_with("0\r\n\r\n"));
    }
}
