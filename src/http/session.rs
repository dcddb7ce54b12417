//! Session operations abstraction
//!
//! This module provides the session operations pattern that allows
//! transparent switching between plain TCP and TLS connections.
//!
//! The session operations abstraction is the key to supporting both
//! plain and encrypted HTTP connections with the same code, including an
//! `Upgrade: TLS/1.0` switch in the middle of a connection: `HttpSession`
//! owns a boxed `SessionOps` that can be swapped for a TLS-wrapped one.
//!
//! On top of the raw transport `HttpSession` provides:
//! - buffered line and byte input with an idle timeout
//! - buffered output, flushed before every blocking read
//! - a cooperative keepalive alarm that emits `102 Processing`
//! - an optional telemetry tap recording every input byte

use super::message::Status;
use super::telemetry::TelemetryLog;
use super::{Error, Result, HTTP_VERSION, PROT_BUFSIZE};
use bytes::{Buf, Bytes, BytesMut};
use log::{debug, warn};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Session operations trait
///
/// This trait defines the operations that can be performed on a session,
/// abstracting over plain TCP and TLS connections.
pub trait SessionOps {
    /// Poll the session for events
    ///
    /// Returns true if the session is ready for the requested operation
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool>;

    /// Read data from the session
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write data to the session
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Flush any data buffered by the transport itself
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Close the session
    fn close(&mut self) -> Result<()>;
}

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
    Both,
}

struct Alarm {
    interval: Duration,
    due: Instant,
}

/// HTTP session wrapping a transport with session operations
pub struct HttpSession {
    ops: Box<dyn SessionOps>,
    timeout: Option<Duration>,
    inbuf: BytesMut,
    outbuf: Vec<u8>,
    eof: bool,
    alarm: Option<Alarm>,
    tap: Option<Box<dyn TelemetryLog>>,
}

impl HttpSession {
    /// Create a new HTTP session
    pub fn new(ops: Box<dyn SessionOps>) -> Self {
        HttpSession {
            ops,
            timeout: None,
            inbuf: BytesMut::with_capacity(PROT_BUFSIZE),
            outbuf: Vec::with_capacity(PROT_BUFSIZE),
            eof: false,
            alarm: None,
            tap: None,
        }
    }

    /// Set the idle timeout for blocking operations
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Get the timeout
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether the peer has closed its side of the connection
    pub fn is_eof(&self) -> bool {
        self.eof && self.inbuf.is_empty()
    }

    /// Input that has been received but not yet consumed
    pub fn buffered(&self) -> &[u8] {
        &self.inbuf
    }

    /// Read one line, stripping the CRLF (or bare LF) terminator
    ///
    /// Returns `Ok(None)` at end of input. A line that does not fit in
    /// `max` bytes, terminator included, fails with `Error::LineTooLong`.
    pub fn read_line(&mut self, max: usize) -> Result<Option<String>> {
        loop {
            if let Some(pos) = self.inbuf.iter().position(|&b| b == b'\n') {
                if pos + 1 > max {
                    return Err(Error::LineTooLong(max));
                }
                let line = self.inbuf.split_to(pos + 1);
                return Ok(Some(line_to_string(&line[..pos])));
            }
            if self.inbuf.len() >= max {
                return Err(Error::LineTooLong(max));
            }
            if self.fill()? == 0 {
                if self.inbuf.is_empty() {
                    return Ok(None);
                }
                let line = self.inbuf.split();
                return Ok(Some(line_to_string(&line)));
            }
        }
    }

    /// Read up to `buf.len()` bytes, returning 0 at end of input
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.inbuf.is_empty() && self.fill()? == 0 {
            return Ok(0);
        }
        let n = buf.len().min(self.inbuf.len());
        self.inbuf.copy_to_slice(&mut buf[..n]);
        Ok(n)
    }

    /// Read exactly `len` bytes, appending them to `out` or discarding them
    pub fn read_exact_into(&mut self, mut len: u64, mut out: Option<&mut Vec<u8>>) -> Result<()> {
        while len > 0 {
            if self.inbuf.is_empty() && self.fill()? == 0 {
                return Err(Error::ConnectionClosed);
            }
            let take = (self.inbuf.len() as u64).min(len) as usize;
            let chunk = self.inbuf.split_to(take);
            if let Some(out) = out.as_deref_mut() {
                out.extend_from_slice(&chunk);
            }
            len -= take as u64;
        }
        Ok(())
    }

    /// Read until end of input, appending to `out` or discarding
    ///
    /// Stops early once more than `limit` bytes have been read (0 means no
    /// limit). Returns the number of bytes read.
    pub fn read_to_end(&mut self, mut out: Option<&mut Vec<u8>>, limit: u64) -> Result<u64> {
        let mut total = 0u64;
        loop {
            if self.inbuf.is_empty() && self.fill()? == 0 {
                return Ok(total);
            }
            let chunk = self.inbuf.split();
            total += chunk.len() as u64;
            if let Some(out) = out.as_deref_mut() {
                out.extend_from_slice(&chunk);
            }
            if limit > 0 && total > limit {
                return Ok(total);
            }
        }
    }

    /// Queue data for output
    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.outbuf.extend_from_slice(data);
        if self.outbuf.len() >= PROT_BUFSIZE * 4 {
            self.flush_output()?;
        }
        Ok(())
    }

    /// Push all queued output to the transport
    pub fn flush_output(&mut self) -> Result<()> {
        while !self.outbuf.is_empty() {
            if !self.ops.poll(PollEvents::Write, self.timeout)? {
                return Err(Error::Timeout);
            }
            let n = self.ops.write(&self.outbuf)?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            self.outbuf.drain(..n);
        }
        self.ops.flush()
    }

    /// Send a provisional (1xx) response immediately
    ///
    /// Sending an interim response restarts the keepalive alarm.
    pub fn write_interim(&mut self, status: Status, headers: &[(&str, &str)]) -> Result<()> {
        let mut head = format!("{} {}\r\n", HTTP_VERSION, status);
        for (name, value) in headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        head.push_str("\r\n");
        self.outbuf.extend_from_slice(head.as_bytes());
        self.flush_output()?;

        if let Some(alarm) = &mut self.alarm {
            alarm.due = Instant::now() + alarm.interval;
        }
        Ok(())
    }

    /// Arm the keepalive alarm; `None` disarms it
    pub fn arm_alarm(&mut self, interval: Option<Duration>) {
        self.alarm = interval.map(|interval| Alarm {
            interval,
            due: Instant::now() + interval,
        });
    }

    /// Disarm the keepalive alarm
    pub fn disarm_alarm(&mut self) {
        self.alarm = None;
    }

    /// Whether the keepalive alarm is armed
    pub fn alarm_armed(&self) -> bool {
        self.alarm.is_some()
    }

    /// Emit `102 Processing` if the keepalive alarm has expired
    ///
    /// Long-running handlers call this periodically; blocking reads check
    /// it on their own.
    pub fn check_alarm(&mut self) -> Result<()> {
        if self.alarm_due() {
            debug!("keepalive alarm expired, sending interim response");
            self.write_interim(Status::PROCESSING, &[])?;
        }
        Ok(())
    }

    fn alarm_due(&self) -> bool {
        self.alarm
            .as_ref()
            .map(|a| Instant::now() >= a.due)
            .unwrap_or(false)
    }

    /// Attach (or detach) the telemetry tap, returning the previous one
    pub fn set_tap(&mut self, tap: Option<Box<dyn TelemetryLog>>) -> Option<Box<dyn TelemetryLog>> {
        std::mem::replace(&mut self.tap, tap)
    }

    /// Get the telemetry tap, if any
    pub fn tap_mut(&mut self) -> Option<&mut (dyn TelemetryLog + 'static)> {
        self.tap.as_deref_mut()
    }

    /// Tap offset of the first unconsumed input byte
    pub fn tap_mark(&self) -> Option<u64> {
        self.tap
            .as_ref()
            .map(|t| t.position().saturating_sub(self.inbuf.len() as u64))
    }

    /// Replace the transport in place
    ///
    /// Queued output is flushed first. Input that was already buffered is
    /// replayed to the new transport's inner stream before anything else.
    pub fn upgrade<F, T>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(Box<dyn SessionOps>) -> Result<(Box<dyn SessionOps>, T)>,
    {
        self.flush_output()?;
        let raw = std::mem::replace(&mut self.ops, Box::new(Detached));
        let raw: Box<dyn SessionOps> = if self.inbuf.is_empty() {
            raw
        } else {
            Box::new(Rewind::new(self.inbuf.split().freeze(), raw))
        };
        let (ops, info) = f(raw)?;
        self.ops = ops;
        self.eof = false;
        Ok(info)
    }

    /// Flush pending output and close the session
    pub fn close(&mut self) -> Result<()> {
        let flushed = self.flush_output();
        let closed = self.ops.close();
        flushed.and(closed)
    }

    fn fill(&mut self) -> Result<usize> {
        if self.eof {
            return Ok(0);
        }
        self.flush_output()?;
        self.wait_readable()?;

        let mut buf = [0u8; PROT_BUFSIZE];
        let n = self.ops.read(&mut buf)?;
        if n == 0 {
            self.eof = true;
            return Ok(0);
        }
        self.inbuf.extend_from_slice(&buf[..n]);

        if let Some(tap) = &mut self.tap {
            if let Err(e) = tap.append(&buf[..n]) {
                warn!("telemetry log write failed, detaching: {}", e);
                self.tap = None;
            }
        }
        Ok(n)
    }

    fn wait_readable(&mut self) -> Result<()> {
        let started = Instant::now();
        loop {
            let idle_left = self.timeout.map(|t| t.saturating_sub(started.elapsed()));
            let alarm_left = self
                .alarm
                .as_ref()
                .map(|a| a.due.saturating_duration_since(Instant::now()));
            let wait = match (idle_left, alarm_left) {
                (Some(idle), Some(alarm)) => Some(idle.min(alarm)),
                (idle, None) => idle,
                (None, alarm) => alarm,
            };

            if self.ops.poll(PollEvents::Read, wait)? {
                return Ok(());
            }
            if self.alarm_due() {
                self.check_alarm()?;
                continue;
            }
            if let Some(timeout) = self.timeout {
                if started.elapsed() >= timeout {
                    return Err(Error::Timeout);
                }
            }
        }
    }
}

impl Write for HttpSession {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_all(buf).map_err(into_io)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_output().map_err(into_io)
    }
}

impl fmt::Debug for HttpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSession")
            .field("timeout", &self.timeout)
            .field("buffered_in", &self.inbuf.len())
            .field("buffered_out", &self.outbuf.len())
            .field("eof", &self.eof)
            .finish()
    }
}

fn line_to_string(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

fn into_io(err: Error) -> io::Error {
    match err {
        Error::Io(e) => e,
        Error::Timeout => io::Error::new(io::ErrorKind::TimedOut, "timeout"),
        other => io::Error::new(io::ErrorKind::Other, other.to_string()),
    }
}

/// Plain file descriptor session operations
pub struct FdSessionOps {
    stream: TcpStream,
}

impl FdSessionOps {
    /// Create a new FD session operations from a TCP stream
    pub fn new(stream: TcpStream) -> Self {
        FdSessionOps { stream }
    }

    /// Get a reference to the underlying stream
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }
}

impl SessionOps for FdSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        use libc::{poll, pollfd, POLLIN, POLLOUT};

        let mut pfd = pollfd {
            fd: self.stream.as_raw_fd(),
            events: match events {
                PollEvents::Read => POLLIN,
                PollEvents::Write => POLLOUT,
                PollEvents::Both => POLLIN | POLLOUT,
            },
            revents: 0,
        };

        let timeout_ms = timeout
            .map(|d| d.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1); // -1 = infinite

        let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };

        if result < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(Error::Io(err));
        }

        Ok(result > 0)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream.read(buf).map_err(Error::from)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.stream.write(buf).map_err(Error::from)
    }

    fn close(&mut self) -> Result<()> {
        use std::net::Shutdown;
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(Error::from(e)),
            _ => Ok(()),
        }
    }
}

/// Replays already-buffered input ahead of the inner transport
struct Rewind {
    pre: Bytes,
    inner: Box<dyn SessionOps>,
}

impl Rewind {
    fn new(pre: Bytes, inner: Box<dyn SessionOps>) -> Self {
        Rewind { pre, inner }
    }
}

impl SessionOps for Rewind {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        if events != PollEvents::Write && !self.pre.is_empty() {
            return Ok(true);
        }
        self.inner.poll(events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.pre.is_empty() {
            return self.inner.read(buf);
        }
        let n = buf.len().min(self.pre.len());
        self.pre.copy_to_slice(&mut buf[..n]);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

/// Placeholder transport while the real one is being upgraded
struct Detached;

impl SessionOps for Detached {
    fn poll(&self, _events: PollEvents, _timeout: Option<Duration>) -> Result<bool> {
        Err(Error::ConnectionClosed)
    }

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Err(Error::ConnectionClosed)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize> {
        Err(Error::ConnectionClosed)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// In-memory session operations
///
/// Serves a fixed input script and captures everything written. Used to
/// drive a connection without a socket.
pub struct MemoryOps {
    input: Bytes,
    output: Arc<Mutex<Vec<u8>>>,
}

impl MemoryOps {
    /// Create a session that will read `input` and then report end of input
    pub fn new(input: impl Into<Vec<u8>>) -> Self {
        MemoryOps {
            input: Bytes::from(input.into()),
            output: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared handle to the captured output
    pub fn output(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.output)
    }
}

impl SessionOps for MemoryOps {
    fn poll(&self, _events: PollEvents, _timeout: Option<Duration>) -> Result<bool> {
        Ok(true)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = buf.len().min(self.input.len());
        self.input.copy_to_slice(&mut buf[..n]);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let mut output = self
            .output
            .lock()
            .map_err(|_| Error::Protocol("output buffer poisoned".to_string()))?;
        output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Helper to create an HTTP session from a TCP stream
pub fn from_tcp_stream(stream: TcpStream) -> HttpSession {
    HttpSession::new(Box::new(FdSessionOps::new(stream)))
}
