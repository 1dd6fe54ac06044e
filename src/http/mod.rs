//! HTTP/1.x wire layer
//!
//! Request serialization, byte-level response parsing and the session
//! abstraction that lets the same code drive plain TCP and TLS streams.

pub mod headers;
pub mod request;
pub mod response;
pub mod session;
pub mod tls;

pub use headers::Headers;
pub use request::{Body, Method, Request};
pub use response::{read_response, ParseOptions, Response};
pub use session::{HttpSession, PollEvents, SessionOps, TcpSession};
pub use tls::{TlsConnector, TlsSession};

use std::fmt;

use url::Url;

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP transport errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Net(#[from] crate::net::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] tls::TlsError),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Invalid HTTP version: {0}")]
    InvalidVersion(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Timeout")]
    Timeout,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("Authentication setup failed: {0}")]
    Auth(String),

    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// True for both connect and read/write deadline failures
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout | Error::Net(crate::net::Error::Timeout))
    }

    /// True when the caller's cancellation token stopped the operation
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Error::Cancelled | Error::Net(crate::net::Error::Cancelled)
        )
    }
}

/// Maximum number of headers per message
pub const MAX_HEADERS: usize = 64;

/// CRLF line ending emitted on output
pub const CRLF: &str = "\r\n";

/// Default bound on the status line, to cap memory on garbage input
pub const DEFAULT_MAX_STATUS_LINE: usize = 100;

/// HTTP protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

/// Simple response without a status line
pub const HTTP_09: Version = Version { major: 0, minor: 9 };
pub const HTTP_10: Version = Version { major: 1, minor: 0 };
pub const HTTP_11: Version = Version { major: 1, minor: 1 };

impl Version {
    /// Parse the `d.d` form used in status lines
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.splitn(2, '.');
        let major = parts.next().and_then(|p| p.parse().ok());
        let minor = parts.next().and_then(|p| p.parse().ok());
        match (major, minor) {
            (Some(major), Some(minor)) => Ok(Version { major, minor }),
            _ => Err(Error::InvalidVersion(s.to_string())),
        }
    }
}

impl Default for Version {
    fn default() -> Self {
        HTTP_11
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Cookie storage supplied by the caller.
///
/// `Set-Cookie`/`Set-Cookie2` response headers are routed here, keyed by
/// the request URI, instead of being exposed as ordinary headers.
pub trait CookieStore: Send + Sync {
    /// The `Cookie` header value for a request to `url`, if any
    fn cookie_header(&self, url: &Url) -> Option<String>;

    /// Record a `Set-Cookie`-style header received for `url`
    fn set_cookies(&self, url: &Url, header_value: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse() {
        assert_eq!(Version::parse("1.1").unwrap(), HTTP_11);
        assert_eq!(Version::parse("1.0").unwrap(), HTTP_10);
        assert_eq!(Version::parse("0.9").unwrap(), HTTP_09);
        assert!(Version::parse("x.y").is_err());
        assert!(Version::parse("1").is_err());
    }

    #[test]
    fn test_version_ordering() {
        assert!(HTTP_09 < HTTP_10);
        assert!(HTTP_10 < HTTP_11);
        assert!(HTTP_11 >= HTTP_10);
    }

    #[test]
    fn test_version_display() {
        assert_eq!(HTTP_11.to_string(), "1.1");
    }
}
