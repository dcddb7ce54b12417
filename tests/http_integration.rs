//! Integration tests for the HTTP layer
//!
//! These tests run a real listener and talk to it over TCP (and TLS).

use davhttpd::http::auth::PasswordTable;
use davhttpd::http::namespace::{ALLOW_READ, ALLOW_WRITE};
use davhttpd::http::telemetry::FileTelemetrySink;
use davhttpd::http::tls::{TlsConfig, TlsVersion};
use davhttpd::http::{Connection, Handled, HttpServer, Method, Namespace, ServerContext, Status, Transaction};
use davhttpd::http::namespace::ParsePath;
use davhttpd::ServerConfig;
use flate2::read::GzDecoder;
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use std::fs;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// A parsed response: the head up to the blank line and the decoded body
struct Response {
    head: String,
    body: Vec<u8>,
}

impl Response {
    fn status(&self) -> u16 {
        self.head[9..12].parse().unwrap()
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.head.split("\r\n").skip(1).find_map(|line| {
            let (n, v) = line.split_once(':')?;
            n.eq_ignore_ascii_case(name).then(|| v.trim())
        })
    }
}

fn read_line<R: Read>(r: &mut R) -> String {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    while !line.ends_with(b"\r\n") {
        if r.read(&mut byte).unwrap() == 0 {
            break;
        }
        line.push(byte[0]);
    }
    String::from_utf8(line).unwrap()
}

/// Read one response, using its framing to find the end of the body
fn read_response<R: Read>(r: &mut R, head_only: bool) -> Response {
    let mut head = String::new();
    loop {
        let line = read_line(r);
        head.push_str(&line);
        if line == "\r\n" || line.is_empty() {
            break;
        }
    }
    let mut resp = Response { head, body: Vec::new() };
    if head_only {
        return resp;
    }

    if resp.header("Transfer-Encoding").map_or(false, |te| te.ends_with("chunked")) {
        loop {
            let size_line = read_line(r);
            let size = usize::from_str_radix(size_line.trim(), 16).unwrap();
            let mut chunk = vec![0u8; size + 2];
            r.read_exact(&mut chunk).unwrap();
            if size == 0 {
                break;
            }
            resp.body.extend_from_slice(&chunk[..size]);
        }
    } else if let Some(len) = resp.header("Content-Length") {
        let mut body = vec![0u8; len.parse().unwrap()];
        r.read_exact(&mut body).unwrap();
        resp.body = body;
    }
    resp
}

fn whoami(conn: &mut Connection, txn: &mut Transaction, _params: Option<ParsePath>) -> davhttpd::http::Result<Handled> {
    let body = format!("you are {}", conn.userid().unwrap_or("nobody"));
    txn.resp_body.content_type = Some("text/plain".to_string());
    conn.write_body(Some(Status::OK), txn, body.as_bytes())?;
    Ok(Handled::Done)
}

fn echo(conn: &mut Connection, txn: &mut Transaction, _params: Option<ParsePath>) -> davhttpd::http::Result<Handled> {
    if let Err(err) = conn.read_request_body(txn) {
        txn.set_error(err.desc);
        return Ok(Handled::Respond(err.status));
    }
    let body = std::mem::take(&mut txn.req_body);
    txn.resp_body.content_type = Some("application/octet-stream".to_string());
    conn.write_body(Some(Status::CREATED), txn, &body)?;
    Ok(Handled::Done)
}

fn start(context: ServerContext) -> SocketAddr {
    let server = HttpServer::bind("127.0.0.1:0".parse().unwrap(), context).unwrap();
    let addr = server.local_addr().unwrap();
    thread::spawn(move || {
        let _ = server.serve();
    });
    addr
}

fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    stream
}

fn passwords() -> Arc<PasswordTable> {
    let mut table = PasswordTable::new();
    table.insert("alice", "secret");
    Arc::new(table)
}

fn tls_config() -> Arc<TlsConfig> {
    Arc::new(
        TlsConfig::server()
            .version_range(TlsVersion::Tls12, TlsVersion::Tls13)
            .fallback_cn("localhost")
            .build()
            .unwrap(),
    )
}

fn tls_connector() -> SslConnector {
    let mut builder = SslConnector::builder(SslMethod::tls_client()).unwrap();
    builder.set_verify(SslVerifyMode::NONE);
    builder.build()
}

#[test]
fn test_static_documents_over_tcp() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("index.html"), b"<html><body>home</body></html>").unwrap();
    fs::write(dir.path().join("notes.txt"), "line of notes\n".repeat(100)).unwrap();

    let config = ServerConfig::builder()
        .doc_root(dir.path())
        .idle_timeout(Some(Duration::from_secs(5)))
        .build();
    let addr = start(ServerContext::new(config, passwords()));
    let mut stream = connect(addr);

    // Three pipelined requests on one connection
    stream
        .write_all(
            b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n\
              HEAD /notes.txt HTTP/1.1\r\nHost: localhost\r\n\r\n\
              GET /notes.txt HTTP/1.1\r\nHost: localhost\r\nRange: bytes=0-12\r\n\r\n",
        )
        .unwrap();

    let index = read_response(&mut stream, false);
    assert_eq!(index.status(), 200);
    assert_eq!(index.header("Content-Type"), Some("text/html"));
    assert_eq!(index.header("Keep-Alive"), Some("timeout=5"));
    assert_eq!(index.body, b"<html><body>home</body></html>");

    let head = read_response(&mut stream, true);
    assert_eq!(head.status(), 200);
    assert_eq!(head.header("Content-Length"), Some("1400"));
    let etag = head.header("ETag").unwrap().to_string();

    let partial = read_response(&mut stream, false);
    assert_eq!(partial.status(), 206);
    assert_eq!(partial.header("Content-Range"), Some("bytes 0-12/1400"));
    assert_eq!(partial.body, b"line of notes");

    let req = format!(
        "GET /notes.txt HTTP/1.1\r\nHost: localhost\r\nIf-None-Match: {}\r\nConnection: close\r\n\r\n",
        etag
    );
    stream.write_all(req.as_bytes()).unwrap();
    let cached = read_response(&mut stream, true);
    assert_eq!(cached.status(), 304);
    assert_eq!(cached.header("ETag"), Some(etag.as_str()));
    assert_eq!(cached.header("Connection"), Some("close"));

    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());
}

#[test]
fn test_gzip_content_coding() {
    let dir = tempfile::tempdir().unwrap();
    let text = "compressible text ".repeat(200);
    fs::write(dir.path().join("big.txt"), &text).unwrap();

    let config = ServerConfig::builder()
        .doc_root(dir.path())
        .allow_compress(true)
        .build();
    let addr = start(ServerContext::new(config, passwords()));
    let mut stream = connect(addr);

    stream
        .write_all(b"GET /big.txt HTTP/1.1\r\nHost: localhost\r\nAccept-Encoding: gzip\r\nConnection: close\r\n\r\n")
        .unwrap();
    let resp = read_response(&mut stream, false);

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.header("Content-Encoding"), Some("gzip"));
    assert_eq!(resp.header("Vary"), Some("accept-encoding"));
    assert_eq!(resp.header("Accept-Ranges"), Some("none"));
    assert!(resp.body.len() < text.len());

    let mut decoded = String::new();
    GzDecoder::new(&resp.body[..]).read_to_string(&mut decoded).unwrap();
    assert_eq!(decoded, text);
}

#[test]
fn test_expect_continue_and_chunked_upload() {
    let ns = Namespace::new("upload", "/upload")
        .allow(ALLOW_READ | ALLOW_WRITE)
        .method(Method::Put, echo);
    let config = ServerConfig::builder().build();
    let addr = start(ServerContext::new(config, passwords()).with_namespaces(vec![ns]));
    let mut stream = connect(addr);

    stream
        .write_all(
            b"PUT /upload/a HTTP/1.1\r\nHost: localhost\r\nExpect: 100-continue\r\n\
              Content-Type: text/plain\r\nTransfer-Encoding: chunked\r\n\r\n",
        )
        .unwrap();
    let interim = read_response(&mut stream, true);
    assert_eq!(interim.status(), 100);

    stream.write_all(b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n").unwrap();
    let resp = read_response(&mut stream, false);
    assert_eq!(resp.status(), 201);
    assert_eq!(resp.body, b"hello world");
}

#[test]
fn test_basic_auth_over_implicit_tls() {
    let logins = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&logins);
    let ns = Namespace::new("private", "/private")
        .allow(ALLOW_READ)
        .need_auth(true)
        .on_auth(move |user| seen.lock().unwrap().push(user.to_string()))
        .method(Method::Get, whoami);
    let config = ServerConfig::builder()
        .server_name("localhost")
        .implicit_tls(true)
        .build();
    let context = ServerContext::new(config, passwords())
        .with_namespaces(vec![ns])
        .with_tls(tls_config());
    let addr = start(context);

    let mut stream = tls_connector().connect("localhost", connect(addr)).unwrap();

    stream
        .write_all(b"GET /private/me HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();
    let challenge = read_response(&mut stream, false);
    assert_eq!(challenge.status(), 401);
    assert_eq!(challenge.header("WWW-Authenticate"), Some("Basic realm=\"localhost\""));
    assert_eq!(challenge.header("Strict-Transport-Security"), Some("max-age=600"));

    // alice:secret
    stream
        .write_all(
            b"GET /private/me HTTP/1.1\r\nHost: localhost\r\n\
              Authorization: Basic YWxpY2U6c2VjcmV0\r\n\r\n",
        )
        .unwrap();
    let resp = read_response(&mut stream, false);
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.body, b"you are alice");

    // The login sticks to the connection
    stream
        .write_all(b"GET /private/me HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .unwrap();
    let resp = read_response(&mut stream, false);
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.body, b"you are alice");
    assert_eq!(*logins.lock().unwrap(), vec!["alice".to_string()]);
}

#[test]
fn test_plaintext_redirected_to_https() {
    let ns = Namespace::new("private", "/private")
        .allow(ALLOW_READ)
        .need_auth(true)
        .method(Method::Get, whoami);
    let context = ServerContext::new(ServerConfig::default(), passwords()).with_namespaces(vec![ns]);
    let addr = start(context);
    let mut stream = connect(addr);

    stream
        .write_all(b"GET /private/me?x=1 HTTP/1.1\r\nHost: dav.example.com\r\nConnection: close\r\n\r\n")
        .unwrap();
    let resp = read_response(&mut stream, false);
    assert_eq!(resp.status(), 301);
    assert_eq!(resp.header("Location"), Some("https://dav.example.com/private/me?x=1"));
}

#[test]
fn test_in_place_tls_upgrade() {
    let ns = Namespace::new("private", "/private")
        .allow(ALLOW_READ)
        .need_auth(true)
        .method(Method::Get, whoami);
    let context = ServerContext::new(ServerConfig::default(), passwords())
        .with_namespaces(vec![ns])
        .with_tls(tls_config());
    let addr = start(context);
    let mut stream = connect(addr);

    stream
        .write_all(
            b"GET /private/me HTTP/1.1\r\nHost: localhost\r\n\
              Connection: Upgrade\r\nUpgrade: TLS/1.0\r\n\
              Authorization: Basic YWxpY2U6c2VjcmV0\r\n\r\n",
        )
        .unwrap();
    let switching = read_response(&mut stream, true);
    assert_eq!(switching.status(), 101);
    assert_eq!(switching.header("Upgrade"), Some("TLS/1.0, HTTP/1.1"));

    // The answer to the same request arrives over TLS
    let mut tls = tls_connector().connect("localhost", stream).unwrap();
    let resp = read_response(&mut tls, false);
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.body, b"you are alice");
    assert_eq!(resp.header("Strict-Transport-Security"), Some("max-age=600"));
}

#[test]
fn test_concurrent_connections() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("shared.txt"), b"shared").unwrap();
    let config = ServerConfig::builder().doc_root(dir.path()).build();
    let addr = start(ServerContext::new(config, passwords()));

    let clients: Vec<_> = (0..8)
        .map(|_| {
            thread::spawn(move || {
                let mut stream = connect(addr);
                stream
                    .write_all(b"GET /shared.txt HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
                    .unwrap();
                read_response(&mut stream, false)
            })
        })
        .collect();

    for client in clients {
        let resp = client.join().unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.body, b"shared");
    }
}

#[test]
fn test_telemetry_redacted_after_login() {
    let logs = tempfile::tempdir().unwrap();
    fs::create_dir(logs.path().join("[127.0.0.1]")).unwrap();
    fs::create_dir(logs.path().join("alice")).unwrap();

    let ns = Namespace::new("private", "/private")
        .allow(ALLOW_READ)
        .need_auth(true)
        .method(Method::Get, whoami);
    let config = ServerConfig::builder().allow_plaintext(true).build();
    let context = ServerContext::new(config, passwords())
        .with_namespaces(vec![ns])
        .with_telemetry(Arc::new(FileTelemetrySink::new(logs.path())));
    let addr = start(context);
    let mut stream = connect(addr);

    stream
        .write_all(
            b"GET /private/me HTTP/1.1\r\nHost: localhost\r\n\
              Authorization: Basic YWxpY2U6c2VjcmV0\r\nConnection: close\r\n\r\n",
        )
        .unwrap();
    let resp = read_response(&mut stream, false);
    assert_eq!(resp.body, b"you are alice");
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).unwrap();

    let read_log = |key: &str| {
        let entry = fs::read_dir(logs.path().join(key)).unwrap().next().unwrap().unwrap();
        String::from_utf8(fs::read(entry.path()).unwrap()).unwrap()
    };

    let before = read_log("[127.0.0.1]");
    assert!(before.contains(&format!("Authorization: Basic {:<16}\r\n", "...")));
    assert!(!before.contains("YWxpY2U6c2VjcmV0"));

    let after = read_log("alice");
    assert!(after.contains("<GET /private/me HTTP/1.1\r\n"));
    assert!(!after.contains("YWxpY2U6c2VjcmV0"));
}
