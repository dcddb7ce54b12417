//! Protocol telemetry logs
//!
//! A telemetry log records the raw input of a connection for debugging.
//! Logs are opt-in per key: the file sink only records for keys that have a
//! directory under its root. Before a user authenticates the log is keyed by
//! client host; after authentication the current request is rewritten with
//! its credentials redacted and logging continues under the user's key.

use super::headers::Headers;
use log::debug;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// An open telemetry log
pub trait TelemetryLog {
    /// Append raw bytes
    fn append(&mut self, data: &[u8]) -> io::Result<()>;

    /// Current length of the log
    fn position(&self) -> u64;

    /// Truncate the log at `offset` and append `data` in place of the tail
    fn rewrite_from(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;
}

/// Opens telemetry logs
pub trait TelemetrySink: Send + Sync {
    /// Open a log for `key`, or `None` when logging is not enabled for it
    fn open(&self, key: &str) -> Option<Box<dyn TelemetryLog>>;
}

/// File-backed telemetry sink
///
/// Logs for `key` are written to `<root>/<key>/<pid>-<n>` when the
/// directory `<root>/<key>` exists.
#[derive(Debug)]
pub struct FileTelemetrySink {
    root: PathBuf,
    next: AtomicU64,
}

impl FileTelemetrySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileTelemetrySink {
            root: root.into(),
            next: AtomicU64::new(0),
        }
    }
}

impl TelemetrySink for FileTelemetrySink {
    fn open(&self, key: &str) -> Option<Box<dyn TelemetryLog>> {
        if key.is_empty() || key.contains('/') || key.starts_with('.') {
            return None;
        }
        let dir = self.root.join(key);
        if !fs::metadata(&dir).map(|m| m.is_dir()).unwrap_or(false) {
            return None;
        }

        let n = self.next.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("{}-{}", std::process::id(), n));
        match FileLog::open(&path) {
            Ok(log) => {
                debug!("telemetry logging to {}", path.display());
                Some(Box::new(log))
            }
            Err(e) => {
                debug!("unable to open telemetry log {}: {}", path.display(), e);
                None
            }
        }
    }
}

struct FileLog {
    file: File,
    len: u64,
}

impl FileLog {
    fn open(path: &std::path::Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(FileLog { file, len })
    }
}

impl TelemetryLog for FileLog {
    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(self.len))?;
        self.file.write_all(data)?;
        self.len += data.len() as u64;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.len
    }

    fn rewrite_from(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        let offset = offset.min(self.len);
        self.file.set_len(offset)?;
        self.len = offset;
        self.append(data)
    }
}

/// In-memory telemetry log
#[derive(Debug, Default, Clone)]
pub struct MemoryLog {
    pub data: Vec<u8>,
}

impl TelemetryLog for MemoryLog {
    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.data.extend_from_slice(data);
        Ok(())
    }

    fn position(&self) -> u64 {
        self.data.len() as u64
    }

    fn rewrite_from(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.data.truncate(offset as usize);
        self.data.extend_from_slice(data);
        Ok(())
    }
}

/// Render a request for the telemetry log with its credentials redacted
///
/// The `Authorization` credentials are replaced by `...` padded with spaces
/// to the original length, so the rewritten record has the same size as the
/// raw bytes it replaces. `pending` is input already received but not yet
/// processed.
pub fn redacted_request(
    request_line: &str,
    headers: &Headers,
    body: &[u8],
    pending: &[u8],
) -> Vec<u8> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let mut out = Vec::with_capacity(request_line.len() + body.len() + pending.len() + 256);
    out.extend_from_slice(format!("<{}<{}\r\n", now, request_line).as_bytes());
    for (name, value) in headers.iter() {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        if name.eq_ignore_ascii_case("Authorization") {
            out.extend_from_slice(redact_credentials(value).as_bytes());
        } else {
            out.extend_from_slice(value.as_bytes());
        }
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out.extend_from_slice(pending);
    out
}

/// Replace everything after the scheme name with a same-length placeholder
pub fn redact_credentials(value: &str) -> String {
    match value.split_once(' ') {
        Some((scheme, creds)) => format!("{} {:<width$}", scheme, "...", width = creds.len()),
        None => value.to_string(),
    }
}
