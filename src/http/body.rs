//! Message body framing
//!
//! Reading side: resolves `Transfer-Encoding` / `Content-Length` /
//! close-delimited framing, reads or discards the payload and undoes
//! transfer- and content-codings.
//!
//! Writing side: the streaming compressor used by `write_body` and the list
//! of media types that are never compressed.

use super::chunked::read_chunked;
use super::session::HttpSession;
use super::{Headers, HttpError, Status};
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use log::debug;
use std::io::{self, Read, Write};

/// Media types that are already compressed
const INCOMPRESSIBLE_TYPES: &[&str] = &["image/gif", "image/jpeg", "image/png"];

/// A transfer- or content-coding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Coding {
    #[default]
    Identity,
    Deflate,
    Gzip,
}

impl Coding {
    /// Coding name for `Transfer-Encoding` / `Content-Encoding` headers
    pub fn as_str(&self) -> &'static str {
        match self {
            Coding::Identity => "identity",
            Coding::Deflate => "deflate",
            Coding::Gzip => "gzip",
        }
    }

    fn from_token(token: &str) -> Option<Coding> {
        if token.eq_ignore_ascii_case("deflate") {
            Some(Coding::Deflate)
        } else if token.eq_ignore_ascii_case("gzip") || token.eq_ignore_ascii_case("x-gzip") {
            Some(Coding::Gzip)
        } else {
            None
        }
    }
}

/// Options for [`read_body`]
#[derive(Debug, Clone, Copy, Default)]
pub struct BodyFlags {
    /// The message is a response (allows close-delimited framing)
    pub response: bool,
    /// The connection closes after this message
    pub close: bool,
    /// Undo the representation's `Content-Encoding`
    pub decode: bool,
    /// The client is waiting for `100 Continue` before sending the body
    pub cont: bool,
}

enum Framing {
    None,
    Chunked,
    Length(u64),
    Close,
}

/// Read (or discard) a message body
///
/// When `body` is `None` the payload is read and thrown away. A client that
/// is still waiting for `100 Continue` is not sent one when the body is only
/// being discarded; otherwise the interim response is sent before reading.
/// `max` limits the body size (0 = unlimited).
pub fn read_body(
    session: &mut HttpSession,
    headers: &mut Headers,
    mut body: Option<&mut Vec<u8>>,
    flags: BodyFlags,
    max: u64,
    max_line: usize,
) -> Result<(), HttpError> {
    if let Some(body) = body.as_deref_mut() {
        body.clear();
    }

    let (framing, te) = resolve_framing(headers, flags, body.is_some(), max)?;
    if matches!(framing, Framing::None) {
        return Ok(());
    }

    if flags.cont {
        if body.is_none() {
            // The client has not sent the body and nobody wants it
            return Ok(());
        }
        session
            .write_interim(Status::CONTINUE, &[])
            .map_err(|e| HttpError::from_read(&e, "Unable to send 100 Continue"))?;
    }

    match framing {
        Framing::None => {}
        Framing::Chunked => {
            read_chunked(session, headers, body.as_deref_mut(), max, max_line)?;
        }
        Framing::Length(len) => {
            session
                .read_exact_into(len, body.as_deref_mut())
                .map_err(|e| HttpError::from_read(&e, "Unable to read body data"))?;
        }
        Framing::Close => {
            let n = session
                .read_to_end(body.as_deref_mut(), max)
                .map_err(|e| HttpError::from_read(&e, "Unable to read body data"))?;
            if max > 0 && n > max {
                return Err(too_large(max));
            }
        }
    }

    let body = match body {
        Some(body) if !body.is_empty() => body,
        _ => return Ok(()),
    };

    if te != Coding::Identity {
        *body = inflate(body, InflateMode::for_coding(te), max)
            .map_err(|_| HttpError::new(Status::BAD_REQUEST, "Error decoding payload"))?;
    }

    if flags.decode {
        if let Some(ce) = headers.get("Content-Encoding") {
            let ce = ce.trim();
            let mode = if ce.eq_ignore_ascii_case("identity") {
                None
            } else if ce.eq_ignore_ascii_case("deflate") {
                let msie = headers
                    .get("User-Agent")
                    .map(|ua| ua.contains("; MSIE "))
                    .unwrap_or(false);
                Some(if msie { InflateMode::Raw } else { InflateMode::Zlib })
            } else if ce.eq_ignore_ascii_case("gzip") || ce.eq_ignore_ascii_case("x-gzip") {
                Some(InflateMode::Gzip)
            } else {
                return Err(HttpError::new(
                    Status::UNSUPPORTED_MEDIA_TYPE,
                    format!("Specified Content-Encoding not accepted: {}", ce),
                ));
            };

            if let Some(mode) = mode {
                *body = inflate(body, mode, max)
                    .map_err(|_| HttpError::new(Status::BAD_REQUEST, "Error decoding content"))?;
            }
        }
    }

    Ok(())
}

fn too_large(max: u64) -> HttpError {
    HttpError::new(
        Status::PAYLOAD_TOO_LARGE,
        format!("Message exceeds {} octets", max),
    )
}

fn resolve_framing(
    headers: &Headers,
    flags: BodyFlags,
    want_body: bool,
    max: u64,
) -> Result<(Framing, Coding), HttpError> {
    let te_values = headers.get_all("Transfer-Encoding");
    if !te_values.is_empty() {
        let mut chunked = false;
        let mut coding = Coding::Identity;
        let mut valid = true;

        for token in headers.tokens("Transfer-Encoding") {
            if chunked {
                // chunked MUST be the final coding
                valid = false;
                break;
            }
            if token.eq_ignore_ascii_case("chunked") {
                chunked = true;
            } else if let Some(c) = Coding::from_token(token) {
                if coding != Coding::Identity {
                    valid = false;
                    break;
                }
                coding = c;
            } else if want_body && !token.eq_ignore_ascii_case("identity") {
                // Unknown codings only matter if we have to decode the body
                valid = false;
                break;
            }
        }

        if !valid {
            return Err(HttpError::new(
                Status::NOT_IMPLEMENTED,
                "Specified Transfer-Encoding not implemented",
            ));
        }
        if chunked {
            return Ok((Framing::Chunked, coding));
        }
        if flags.response && flags.close {
            return Ok((Framing::Close, coding));
        }
        return Err(HttpError::new(
            Status::NOT_IMPLEMENTED,
            "Final Transfer-Encoding MUST be \"chunked\"",
        ));
    }

    match headers.count("Content-Length") {
        0 => {}
        1 => {
            let value = headers.get("Content-Length").unwrap_or("").trim();
            let len: u64 = value
                .parse()
                .map_err(|_| HttpError::new(Status::BAD_REQUEST, "Invalid Content-Length"))?;
            if max > 0 && len > max {
                return Err(too_large(max));
            }
            return Ok((
                if len == 0 { Framing::None } else { Framing::Length(len) },
                Coding::Identity,
            ));
        }
        _ => {
            return Err(HttpError::new(
                Status::BAD_REQUEST,
                "Multiple Content-Length header fields",
            ))
        }
    }

    if flags.response {
        if flags.close {
            return Ok((Framing::Close, Coding::Identity));
        }
        return Err(HttpError::new(Status::LENGTH_REQUIRED, "Missing Content-Length"));
    }

    Ok((Framing::None, Coding::Identity))
}

/// zlib stream flavour to inflate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InflateMode {
    /// RFC 1950 zlib wrapper
    Zlib,
    /// RFC 1951 raw deflate, as sent by some broken clients
    Raw,
    /// RFC 1952 gzip wrapper
    Gzip,
}

impl InflateMode {
    fn for_coding(coding: Coding) -> Self {
        match coding {
            Coding::Gzip => InflateMode::Gzip,
            _ => InflateMode::Zlib,
        }
    }
}

/// Inflate a complete buffer
///
/// Output larger than `max` bytes (0 = unlimited) is an error.
pub fn inflate(data: &[u8], mode: InflateMode, max: u64) -> io::Result<Vec<u8>> {
    let limit = if max > 0 { max + 1 } else { u64::MAX };
    let mut out = Vec::with_capacity(data.len() * 2);

    match mode {
        InflateMode::Zlib => ZlibDecoder::new(data).take(limit).read_to_end(&mut out)?,
        InflateMode::Raw => DeflateDecoder::new(data).take(limit).read_to_end(&mut out)?,
        InflateMode::Gzip => GzDecoder::new(data).take(limit).read_to_end(&mut out)?,
    };

    if max > 0 && out.len() as u64 > max {
        debug!("inflated body exceeds {} octets", max);
        return Err(io::Error::new(io::ErrorKind::InvalidData, "inflated body too large"));
    }
    Ok(out)
}

/// Whether a media type is already compressed
pub fn is_incompressible(content_type: Option<&str>) -> bool {
    let media = match content_type {
        Some(t) => t.split(';').next().unwrap_or("").trim(),
        None => return false,
    };
    INCOMPRESSIBLE_TYPES
        .iter()
        .any(|t| t.eq_ignore_ascii_case(media))
}

enum Encoder {
    Gzip(GzEncoder<Vec<u8>>),
    Zlib(ZlibEncoder<Vec<u8>>),
}

/// Streaming compressor for response bodies
///
/// Input is pushed in pieces; the compressed output produced so far is
/// drained after every push so it can be sent as a chunk.
pub struct Deflater {
    encoder: Encoder,
}

impl Deflater {
    /// Create a compressor for the gzip or deflate coding
    pub fn new(coding: Coding) -> Self {
        let encoder = match coding {
            Coding::Deflate => Encoder::Zlib(ZlibEncoder::new(Vec::new(), Compression::default())),
            _ => Encoder::Gzip(GzEncoder::new(Vec::new(), Compression::default())),
        };
        Deflater { encoder }
    }

    /// Compress more input, returning whatever output is ready
    pub fn push(&mut self, data: &[u8]) -> io::Result<Vec<u8>> {
        match &mut self.encoder {
            Encoder::Gzip(enc) => {
                enc.write_all(data)?;
                Ok(std::mem::take(enc.get_mut()))
            }
            Encoder::Zlib(enc) => {
                enc.write_all(data)?;
                Ok(std::mem::take(enc.get_mut()))
            }
        }
    }

    /// Compress the last input and end the stream
    pub fn finish(self, data: &[u8]) -> io::Result<Vec<u8>> {
        match self.encoder {
            Encoder::Gzip(mut enc) => {
                enc.write_all(data)?;
                enc.finish()
            }
            Encoder::Zlib(mut enc) => {
                enc.write_all(data)?;
                enc.finish()
            }
        }
    }
}

impl std::fmt::Debug for Deflater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.encoder {
            Encoder::Gzip(_) => "gzip",
            Encoder::Zlib(_) => "deflate",
        };
        f.debug_struct("Deflater").field("coding", &kind).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::session::MemoryOps;
    use flate2::write::DeflateEncoder;
    use std::sync::{Arc, Mutex};

    fn setup(input: &[u8], hdrs: &[(&str, &str)]) -> (HttpSession, Headers, Arc<Mutex<Vec<u8>>>) {
        let ops = MemoryOps::new(input.to_vec());
        let output = ops.output();
        let mut headers = Headers::new();
        for (n, v) in hdrs {
            headers.insert(n.to_string(), v.to_string());
        }
        (HttpSession::new(Box::new(ops)), headers, output)
    }

    fn read(input: &[u8], hdrs: &[(&str, &str)], flags: BodyFlags) -> Result<Vec<u8>, HttpError> {
        let (mut session, mut headers, _) = setup(input, hdrs);
        let mut body = Vec::new();
        read_body(&mut session, &mut headers, Some(&mut body), flags, 0, 1024)?;
        Ok(body)
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn test_content_length() {
        let body = read(b"helloEXTRA", &[("Content-Length", "5")], BodyFlags::default()).unwrap();
        assert_eq!(body, b"hello");
    }

    #[test]
    fn test_no_framing_means_no_body() {
        let body = read(b"GET / HTTP/1.1\r\n", &[], BodyFlags::default()).unwrap();
        assert!(body.is_empty());
    }

    #[test]
    fn test_multiple_content_length() {
        let err = read(b"abc", &[("Content-Length", "3"), ("Content-Length", "3")], BodyFlags::default())
            .unwrap_err();
        assert_eq!(err.status, Status::BAD_REQUEST);
    }

    #[test]
    fn test_too_large() {
        let (mut session, mut headers, _) = setup(b"0123456789", &[("Content-Length", "10")]);
        let err = read_body(&mut session, &mut headers, None, BodyFlags::default(), 4, 1024).unwrap_err();
        assert_eq!(err.status, Status::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_chunked_with_gzip_transfer_coding() {
        let compressed = gzip(b"payload payload payload");
        let mut input = format!("{:x}\r\n", compressed.len()).into_bytes();
        input.extend_from_slice(&compressed);
        input.extend_from_slice(b"\r\n0\r\n\r\n");

        let body = read(&input, &[("Transfer-Encoding", "gzip, chunked")], BodyFlags::default()).unwrap();
        assert_eq!(body, b"payload payload payload");
    }

    #[test]
    fn test_transfer_encoding_rules() {
        let flags = BodyFlags::default();
        let not_impl = |te: &str| read(b"", &[("Transfer-Encoding", te)], flags).unwrap_err().status;

        assert_eq!(not_impl("gzip"), Status::NOT_IMPLEMENTED);
        assert_eq!(not_impl("chunked, gzip"), Status::NOT_IMPLEMENTED);
        assert_eq!(not_impl("gzip, deflate, chunked"), Status::NOT_IMPLEMENTED);
        assert_eq!(not_impl("bogus, chunked"), Status::NOT_IMPLEMENTED);
    }

    #[test]
    fn test_close_delimited_response() {
        let flags = BodyFlags {
            response: true,
            close: true,
            ..Default::default()
        };
        assert_eq!(read(b"until eof", &[], flags).unwrap(), b"until eof");

        let flags = BodyFlags {
            response: true,
            ..Default::default()
        };
        assert_eq!(read(b"x", &[], flags).unwrap_err().status, Status::LENGTH_REQUIRED);
    }

    #[test]
    fn test_content_encoding_decode() {
        let compressed = gzip(b"calendar data");
        let len = compressed.len().to_string();
        let flags = BodyFlags {
            decode: true,
            ..Default::default()
        };

        let body = read(
            &compressed,
            &[("Content-Length", len.as_str()), ("Content-Encoding", "gzip")],
            flags,
        )
        .unwrap();
        assert_eq!(body, b"calendar data");

        let err = read(b"abc", &[("Content-Length", "3"), ("Content-Encoding", "br")], flags).unwrap_err();
        assert_eq!(err.status, Status::UNSUPPORTED_MEDIA_TYPE);

        let err = read(b"abc", &[("Content-Length", "3"), ("Content-Encoding", "gzip")], flags).unwrap_err();
        assert_eq!(err.status, Status::BAD_REQUEST);
    }

    #[test]
    fn test_msie_raw_deflate() {
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"raw deflate").unwrap();
        let raw = enc.finish().unwrap();
        let len = raw.len().to_string();
        let flags = BodyFlags {
            decode: true,
            ..Default::default()
        };

        let body = read(
            &raw,
            &[
                ("Content-Length", len.as_str()),
                ("Content-Encoding", "deflate"),
                ("User-Agent", "Mozilla/4.0 (compatible; MSIE 6.0; Windows NT 5.1)"),
            ],
            flags,
        )
        .unwrap();
        assert_eq!(body, b"raw deflate");
    }

    #[test]
    fn test_expect_continue() {
        let flags = BodyFlags {
            cont: true,
            ..Default::default()
        };

        let (mut session, mut headers, output) = setup(b"hello", &[("Content-Length", "5")]);
        let mut body = Vec::new();
        read_body(&mut session, &mut headers, Some(&mut body), flags, 0, 1024).unwrap();
        assert_eq!(body, b"hello");
        assert!(output.lock().unwrap().starts_with(b"HTTP/1.1 100 Continue\r\n\r\n"));

        // Discarding a body the client has not sent yet sends nothing
        let (mut session, mut headers, output) = setup(b"", &[("Content-Length", "5")]);
        read_body(&mut session, &mut headers, None, flags, 0, 1024).unwrap();
        assert!(output.lock().unwrap().is_empty());
    }

    #[test]
    fn test_deflater_streaming() {
        let mut deflater = Deflater::new(Coding::Gzip);
        let mut compressed = deflater.push(b"first part, ").unwrap();
        compressed.extend(deflater.finish(b"second part").unwrap());

        let out = inflate(&compressed, InflateMode::Gzip, 0).unwrap();
        assert_eq!(out, b"first part, second part");

        let deflater = Deflater::new(Coding::Deflate);
        let compressed = deflater.finish(b"zlib").unwrap();
        assert_eq!(inflate(&compressed, InflateMode::Zlib, 0).unwrap(), b"zlib");
    }

    #[test]
    fn test_inflate_limit() {
        let compressed = gzip(&[b'a'; 10_000]);
        assert!(inflate(&compressed, InflateMode::Gzip, 100).is_err());
        assert_eq!(inflate(&compressed, InflateMode::Gzip, 0).unwrap().len(), 10_000);
    }

    #[test]
    fn test_incompressible() {
        assert!(is_incompressible(Some("image/png")));
        assert!(is_incompressible(Some("IMAGE/JPEG; q=1")));
        assert!(!is_incompressible(Some("text/html; charset=utf-8")));
        assert!(!is_incompressible(None));
    }
}
