//! Session operations abstraction
//!
//! All HTTP I/O goes through the `SessionOps` trait so request writing
//! and response parsing are transparent to the underlying transport
//! (plain TCP or TLS). `HttpSession` layers the read/write timeout and
//! the caller's cancellation token on top: every wait is sliced so
//! cancellation is observed promptly, and the deadline and the token
//! produce distinct errors.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::time::{Duration, Instant};

use super::{Error, Result};
use crate::net::client::poll_fd;
use crate::net::{CancelToken, POLL_SLICE_MS};

/// Events to wait for on a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
}

/// Operations every transport must provide
pub trait SessionOps: Send {
    /// Wait until the session is ready for the requested operation.
    /// Returns false when the wait timed out.
    fn poll(&self, events: PollEvents, timeout: Duration) -> Result<bool>;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    fn flush(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

impl SessionOps for Box<dyn SessionOps + Send> {
    fn poll(&self, events: PollEvents, timeout: Duration) -> Result<bool> {
        (**self).poll(events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Plain TCP session
pub struct TcpSession {
    stream: TcpStream,
}

impl TcpSession {
    pub fn new(stream: TcpStream) -> Self {
        TcpSession { stream }
    }

    /// Give the stream back, e.g. to wrap it in TLS after a CONNECT
    /// handshake ran over the plain session.
    pub fn into_stream(self) -> TcpStream {
        self.stream
    }
}

impl SessionOps for TcpSession {
    fn poll(&self, events: PollEvents, timeout: Duration) -> Result<bool> {
        let events = match events {
            PollEvents::Read => libc::POLLIN,
            PollEvents::Write => libc::POLLOUT,
        };
        Ok(poll_fd(self.stream.as_raw_fd(), events, timeout)?)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.stream.read(buf)?)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        Ok(self.stream.write(buf)?)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(self.stream.flush()?)
    }

    fn close(&mut self) -> Result<()> {
        Ok(self.stream.shutdown(std::net::Shutdown::Both)?)
    }
}

/// A session plus its timeout and cancellation policy
pub struct HttpSession<S: SessionOps> {
    ops: S,
    timeout: Option<Duration>,
    cancel: CancelToken,
}

impl<S: SessionOps> HttpSession<S> {
    pub fn new(ops: S) -> Self {
        HttpSession {
            ops,
            timeout: None,
            cancel: CancelToken::new(),
        }
    }

    /// Set the read/write timeout for subsequent operations
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Install the cancellation token for the current request cycle
    pub fn set_cancel(&mut self, cancel: CancelToken) {
        self.cancel = cancel;
    }

    pub fn get_ref(&self) -> &S {
        &self.ops
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.ops
    }

    pub fn into_inner(self) -> S {
        self.ops
    }

    /// Wait for readiness, observing cancellation between poll slices.
    /// Deadline exhaustion and cancellation are distinct failures; when
    /// both apply, cancellation wins.
    fn wait_ready(&self, events: PollEvents) -> Result<()> {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let slice = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Err(Error::Timeout);
                    }
                    (d - now).min(Duration::from_millis(POLL_SLICE_MS))
                }
                None => Duration::from_millis(POLL_SLICE_MS),
            };
            if self.ops.poll(events, slice)? {
                return Ok(());
            }
        }
    }

    /// Read into `buf`; `Ok(0)` signals end of stream
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.wait_ready(PollEvents::Read)?;
        self.ops.read(buf)
    }

    /// Read exactly one byte; `None` signals end of stream
    pub fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.read(&mut byte)? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    /// Fill `buf` completely or fail with `ConnectionClosed`
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            filled += n;
        }
        Ok(())
    }

    /// Write the whole buffer or fail with `ConnectionClosed`
    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let mut written = 0;
        while written < buf.len() {
            self.wait_ready(PollEvents::Write)?;
            let n = self.ops.write(&buf[written..])?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            written += n;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.ops.flush()
    }

    pub fn close(&mut self) -> Result<()> {
        self.ops.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn session_pair() -> (HttpSession<TcpSession>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (HttpSession::new(TcpSession::new(client)), server)
    }

    #[test]
    fn test_read_write_roundtrip() {
        let (mut session, mut server) = session_pair();

        let handle = thread::spawn(move || {
            let mut buf = [0u8; 4];
            server.read_exact(&mut buf).unwrap();
            assert_eq!(&buf, b"ping");
            server.write_all(b"pong!").unwrap();
        });

        session.write_all(b"ping").unwrap();
        let mut buf = [0u8; 5];
        session.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong!");

        handle.join().unwrap();
    }

    #[test]
    fn test_read_timeout_is_distinct() {
        let (mut session, _server) = session_pair();
        session.set_timeout(Some(Duration::from_millis(50)));

        let mut buf = [0u8; 1];
        let err = session.read(&mut buf).unwrap_err();
        assert!(matches!(err, Error::Timeout));
        assert!(err.is_timeout());
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_cancellation_beats_timeout() {
        let (mut session, _server) = session_pair();
        session.set_timeout(Some(Duration::from_secs(5)));

        let cancel = CancelToken::new();
        session.set_cancel(cancel.clone());
        cancel.cancel();

        let mut buf = [0u8; 1];
        let err = session.read(&mut buf).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(err.is_cancelled());
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_read_byte_eof() {
        let (mut session, server) = session_pair();
        drop(server);
        assert_eq!(session.read_byte().unwrap(), None);
    }
}
