//! Client-side TLS
//!
//! A `TlsConnector` holds the OpenSSL context for a transport; each
//! handshake wraps an established TCP stream into a `TlsSession` that
//! implements `SessionOps`, so the HTTP layer never distinguishes plain
//! from encrypted streams. Certificate validation policy beyond the
//! verify-peer toggle is outside this crate.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::time::Duration;

use openssl::ssl::{Ssl, SslContext, SslContextBuilder, SslMethod, SslStream, SslVerifyMode};

use super::session::{PollEvents, SessionOps};
use super::{Error, Result};
use crate::net::client::poll_fd;

/// TLS layer errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("Handshake failed: {0}")]
    Handshake(String),
}

/// Reusable client TLS configuration
pub struct TlsConnector {
    ctx: SslContext,
    verify_peer: bool,
}

impl TlsConnector {
    /// Build a connector. With `verify_peer` the system trust roots are
    /// loaded and the peer certificate is checked against the server
    /// name; without it the handshake accepts any certificate.
    pub fn new(verify_peer: bool) -> std::result::Result<Self, TlsError> {
        let mut builder = SslContextBuilder::new(SslMethod::tls_client())?;
        if verify_peer {
            builder.set_default_verify_paths()?;
            builder.set_verify(SslVerifyMode::PEER);
        } else {
            builder.set_verify(SslVerifyMode::NONE);
        }
        Ok(TlsConnector {
            ctx: builder.build(),
            verify_peer,
        })
    }

    /// Perform the client handshake over an established stream.
    ///
    /// `server_name` goes into SNI and, when verification is on, into
    /// host-name matching. For tunneled connections this is the true
    /// destination host, never the proxy.
    pub fn connect(
        &self,
        stream: TcpStream,
        server_name: &str,
    ) -> std::result::Result<TlsSession, TlsError> {
        let mut ssl = Ssl::new(&self.ctx)?;
        ssl.set_hostname(server_name)?;
        if self.verify_peer {
            ssl.param_mut().set_host(server_name)?;
        }

        let stream = ssl
            .connect(stream)
            .map_err(|e| TlsError::Handshake(e.to_string()))?;

        Ok(TlsSession { stream })
    }
}

/// TLS session over one TCP stream
pub struct TlsSession {
    stream: SslStream<TcpStream>,
}

impl SessionOps for TlsSession {
    fn poll(&self, events: PollEvents, timeout: Duration) -> Result<bool> {
        // Data already decrypted inside the SSL buffer doesn't show up on
        // the descriptor
        if events == PollEvents::Read && self.stream.ssl().pending() > 0 {
            return Ok(true);
        }

        let events = match events {
            PollEvents::Read => libc::POLLIN,
            PollEvents::Write => libc::POLLOUT,
        };
        Ok(poll_fd(self.stream.get_ref().as_raw_fd(), events, timeout)?)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.stream.read(buf) {
            Ok(n) => Ok(n),
            // A peer that drops the link without close_notify still ends
            // the stream
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(0),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        Ok(self.stream.write(buf)?)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(self.stream.flush()?)
    }

    fn close(&mut self) -> Result<()> {
        let _ = self.stream.shutdown();
        Ok(self
            .stream
            .get_mut()
            .shutdown(std::net::Shutdown::Both)?)
    }
}
