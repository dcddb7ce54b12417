//! Chunked transfer encoding support
//!
//! This module provides encoding and decoding for HTTP chunked transfer encoding.
//! Encoding writes to any `io::Write`; decoding pulls from an `HttpSession`.

use super::parser::read_header_block;
use super::session::HttpSession;
use super::{Headers, HttpError, Result, Status, CRLF};
use std::io::Write;

/// Chunked encoder
///
/// Encodes data in HTTP chunked transfer encoding format
pub struct ChunkedEncoder<W: Write> {
    writer: W,
}

impl<W: Write> ChunkedEncoder<W> {
    /// Create a new chunked encoder
    pub fn new(writer: W) -> Self {
        ChunkedEncoder { writer }
    }

    /// Write a chunk of data
    ///
    /// Empty input writes nothing; a zero-size chunk would end the body.
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        write!(self.writer, "{:x}{}", data.len(), CRLF)?;
        self.writer.write_all(data)?;
        self.writer.write_all(CRLF.as_bytes())?;

        Ok(())
    }

    /// Write the final chunk (0-sized chunk) and an empty trailer
    pub fn finish(&mut self) -> Result<()> {
        write!(self.writer, "0{}{}", CRLF, CRLF)?;
        Ok(())
    }

    /// Consume the encoder and return the underlying writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Helper function to encode a complete body in chunks of `chunk_size`
pub fn encode_chunked_body(data: &[u8], chunk_size: usize) -> Result<Vec<u8>> {
    let mut encoder = ChunkedEncoder::new(Vec::new());
    for chunk in data.chunks(chunk_size.max(1)) {
        encoder.write_chunk(chunk)?;
    }
    encoder.finish()?;
    Ok(encoder.into_inner())
}

/// Parse a chunk-size line, ignoring chunk extensions
fn parse_chunk_size(line: &str) -> Option<u64> {
    let size = line.split(';').next().unwrap_or("").trim();
    if size.is_empty() || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(size, 16).ok()
}

/// Read a chunked body from the session
///
/// Data is appended to `out`, or discarded when `out` is `None`. Trailer
/// fields following the last chunk are added to `headers`. `max` limits the
/// decoded size (0 = unlimited). Returns the decoded length.
pub fn read_chunked(
    session: &mut HttpSession,
    headers: &mut Headers,
    mut out: Option<&mut Vec<u8>>,
    max: u64,
    max_line: usize,
) -> std::result::Result<u64, HttpError> {
    let mut total: u64 = 0;

    loop {
        let line = match session.read_line(max_line) {
            Ok(Some(line)) => line,
            Ok(None) => {
                return Err(HttpError::new(Status::BAD_REQUEST, "Unable to read chunk size"))
            }
            Err(e) => return Err(HttpError::from_read(&e, "Unable to read chunk size")),
        };
        let size = parse_chunk_size(&line)
            .ok_or_else(|| HttpError::new(Status::BAD_REQUEST, "Unable to read chunk size"))?;

        total = total.saturating_add(size);
        if max > 0 && total > max {
            return Err(HttpError::new(
                Status::PAYLOAD_TOO_LARGE,
                format!("Message exceeds {} octets", max),
            ));
        }

        if size == 0 {
            return read_header_block(session, headers, max_line)
                .map(|_| total)
                .map_err(|e| HttpError::from_read(&e, "Error reading trailer"));
        }

        session
            .read_exact_into(size, out.as_deref_mut())
            .map_err(|e| HttpError::from_read(&e, "Unable to read chunk data"))?;

        match session.read_line(max_line) {
            Ok(Some(crlf)) if crlf.is_empty() => {}
            Ok(_) => {
                return Err(HttpError::new(
                    Status::BAD_REQUEST,
                    "Missing CRLF following chunk",
                ))
            }
            Err(e) => return Err(HttpError::from_read(&e, "Missing CRLF following chunk")),
        }
    }
}
