//! Built-in method handlers
//!
//! These make up the default namespace, which catches every path no other
//! namespace claims: static documents from the configured document root,
//! `OPTIONS`, `TRACE`, and the `PROPFIND /` probe sent by DAV clients.

use super::body::Coding;
use super::connection::Connection;
use super::namespace::{Handled, Namespace, ParsePath, ALLOW_READ, ALLOW_TRACE};
use super::precond::check_precond;
use super::transaction::{Transaction, CC_NOCACHE};
use super::{Method, Result, Status};
use log::{debug, error};
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Headers never echoed by `TRACE`
const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "proxy-authorization"];

/// The namespace serving every otherwise unclaimed path
pub fn default_namespace() -> Namespace {
    Namespace::new("default", "")
        .allow(ALLOW_READ)
        .method(Method::Get, get_doc)
        .method(Method::Head, get_doc)
        .method(Method::Options, options)
        .method(Method::PropFind, propfind_root)
        .method(Method::Trace, trace)
}

/// Media type by file extension, falling back to content signatures
pub fn media_type(path: &Path, data: &[u8]) -> &'static str {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        let ext = ext.to_ascii_lowercase();
        return match ext.as_str() {
            "txt" | "text" => "text/plain",
            "html" | "htm" => "text/html",
            "css" => "text/css",
            "js" => "text/javascript",
            "jpg" | "jpeg" => "image/jpeg",
            "gif" => "image/gif",
            "png" => "image/png",
            _ => "application/octet-stream",
        };
    }

    if data.starts_with(b"\x89PNG\r\n\x1a\n") {
        "image/png"
    } else if data.starts_with(b"\xff\xd8\xff\xe0") {
        "image/jpeg"
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        "image/gif"
    } else {
        "application/octet-stream"
    }
}

/// GET/HEAD a static document under the document root
pub fn get_doc(conn: &mut Connection, txn: &mut Transaction, _params: Option<ParsePath>) -> Result<Handled> {
    let root = match &conn.config().doc_root {
        Some(root) => root.clone(),
        None => return Ok(Handled::Respond(Status::NOT_FOUND)),
    };

    let rel = match txn.req_tgt.path.as_str() {
        "" | "/" => "/index.html",
        path => path,
    };
    if rel.split('/').any(|seg| seg == "..") {
        return Ok(Handled::Respond(Status::NOT_FOUND));
    }
    let path = root.join(rel.trim_start_matches('/'));

    let meta = match fs::metadata(&path) {
        Ok(meta) if meta.is_file() => meta,
        _ => return Ok(Handled::Respond(Status::NOT_FOUND)),
    };
    let lastmod = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs());
    let etag = format!("{}-{}", lastmod, meta.len());

    // Ranges of a content-coded body would address the coded bytes
    txn.flags.ranges = txn.flags.ce == Coding::Identity;
    let precond = check_precond(txn, None, Some(&etag), lastmod, meta.len());
    match precond {
        Status::OK | Status::PARTIAL_CONTENT => {}
        Status::NOT_MODIFIED => {
            txn.resp_body.etag = Some(etag);
            return Ok(Handled::Respond(precond));
        }
        _ => return Ok(Handled::Respond(precond)),
    }

    let data = match fs::read(&path) {
        Ok(data) => data,
        Err(e) => {
            error!("unable to read {}: {}", path.display(), e);
            return Ok(Handled::Respond(Status::INTERNAL_SERVER_ERROR));
        }
    };

    txn.resp_body.etag = Some(etag);
    txn.resp_body.lastmod = lastmod;
    if txn.resp_body.content_type.is_none() {
        txn.resp_body.content_type = Some(media_type(&path, &data).to_string());
    }

    if txn.resp_body.ranges.len() > 1 {
        conn.multipart_byteranges(txn, &data)?;
        return Ok(Handled::Done);
    }

    let body = match (precond, txn.resp_body.ranges.first()) {
        (Status::PARTIAL_CONTENT, Some(range)) => {
            let last = (range.last as usize).min(data.len().saturating_sub(1));
            data.get(range.first as usize..=last).unwrap_or_default()
        }
        _ => &data[..],
    };
    conn.write_body(Some(precond), txn, body)?;
    Ok(Handled::Done)
}

/// OPTIONS: advertise the methods and DAV features of the target
pub fn options(conn: &mut Connection, txn: &mut Transaction, params: Option<ParsePath>) -> Result<Handled> {
    txn.flags.cc |= CC_NOCACHE;
    // No body, so nothing varies
    txn.flags.vary = 0;

    if txn.req_tgt.path == "*" {
        txn.req_tgt.allow |= conn.registry().allow_union();
    } else if let Some(parse_path) = params {
        let path = txn.req_tgt.path.clone();
        if let Err(err) = parse_path(&path, &mut txn.req_tgt) {
            txn.set_error(err.desc);
            return Ok(Handled::Respond(err.status));
        }
    }

    conn.response_header(Status::OK, txn)?;
    Ok(Handled::Done)
}

/// PROPFIND on a path no DAV namespace serves
///
/// DAV clients probe `/` to discover the server; make them authenticate
/// first so they can be pointed at their collections.
pub fn propfind_root(conn: &mut Connection, txn: &mut Transaction, _params: Option<ParsePath>) -> Result<Handled> {
    if txn.req_tgt.path == "/" && conn.userid().is_none() {
        return Ok(Handled::Respond(Status::UNAUTHORIZED));
    }
    Ok(Handled::Respond(Status::METHOD_NOT_ALLOWED))
}

/// TRACE: echo the request back as `message/http`
pub fn trace(conn: &mut Connection, txn: &mut Transaction, params: Option<ParsePath>) -> Result<Handled> {
    txn.flags.cc |= CC_NOCACHE;

    if txn.req_tgt.allow & ALLOW_TRACE == 0 {
        return Ok(Handled::Respond(Status::METHOD_NOT_ALLOWED));
    }

    let max_fwd = txn
        .req_hdrs
        .get("Max-Forwards")
        .map_or(u64::MAX, |v| v.trim().parse().unwrap_or(0));
    if max_fwd != 0 {
        if let Some(parse_path) = params {
            let path = txn.req_tgt.path.clone();
            if let Err(err) = parse_path(&path, &mut txn.req_tgt) {
                txn.set_error(err.desc);
                return Ok(Handled::Respond(err.status));
            }
        }
    }

    let mut msg = std::mem::take(&mut txn.resp_body.payload);
    msg.clear();
    msg.extend_from_slice(format!("TRACE {} {}\r\n", txn.req_line.uri, txn.req_line.ver).as_bytes());
    for (name, value) in txn.req_hdrs.iter() {
        if SENSITIVE_HEADERS.iter().any(|s| name.eq_ignore_ascii_case(s)) {
            debug!("TRACE: not echoing {}", name);
            continue;
        }
        let mut chars = name.chars();
        if let Some(first) = chars.next() {
            msg.push(first.to_ascii_uppercase() as u8);
            msg.extend_from_slice(chars.as_str().as_bytes());
        }
        msg.extend_from_slice(b": ");
        msg.extend_from_slice(value.as_bytes());
        msg.extend_from_slice(b"\r\n");
    }
    msg.extend_from_slice(b"\r\n");

    txn.resp_body.content_type = Some("message/http".to_string());
    let result = conn.write_body(Some(Status::OK), txn, &msg);
    txn.resp_body.payload = msg;
    result.map(|()| Handled::Done)
}
