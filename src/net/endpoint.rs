//! Destination endpoints
//!
//! An `EndPoint` classifies and carries a destination as either a numeric
//! IPv4/IPv6 address or a host name still to be resolved. Ordering and
//! equality compare the kind first, then the host case-insensitively,
//! then the port, so endpoints can key a pool map.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{Ipv4Addr, Ipv6Addr};

use url::Url;

use super::{Error, Result};

/// The endpoint kind
///
/// The order of the variants is significant: it is the primary sort key
/// for `EndPoint` ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EndPointKind {
    /// Numeric IPv4 address
    IPv4,
    /// Numeric IPv6 address
    IPv6,
    /// Host name that has to be resolved yet
    HostName,
}

/// A destination host and port
///
/// Immutable once constructed.
#[derive(Debug, Clone)]
pub struct EndPoint {
    kind: EndPointKind,
    host: String,
    port: u16,
}

impl EndPoint {
    /// Create an endpoint, classifying the host string
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        // URL hosts carry IPv6 literals in brackets
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .map(str::to_string)
            .unwrap_or(host);
        let kind = classify(&host);
        EndPoint { kind, host, port }
    }

    /// Create an endpoint from a URL's host and (explicit or default) port
    pub fn from_url(url: &Url) -> Result<Self> {
        let host = url
            .host_str()
            .ok_or_else(|| Error::NoAddresses(url.as_str().to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::NoAddresses(url.as_str().to_string()))?;
        Ok(EndPoint::new(host, port))
    }

    pub fn kind(&self) -> EndPointKind {
        self.kind
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Classify a host string into an endpoint kind
fn classify(host: &str) -> EndPointKind {
    if host.parse::<Ipv4Addr>().is_ok() {
        return EndPointKind::IPv4;
    }
    if host.contains(':') || host.parse::<Ipv6Addr>().is_ok() {
        return EndPointKind::IPv6;
    }
    EndPointKind::HostName
}

fn host_cmp(a: &str, b: &str) -> Ordering {
    let a = a.bytes().map(|c| c.to_ascii_lowercase());
    let b = b.bytes().map(|c| c.to_ascii_lowercase());
    a.cmp(b)
}

impl Ord for EndPoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.kind
            .cmp(&other.kind)
            .then_with(|| host_cmp(&self.host, &other.host))
            .then_with(|| self.port.cmp(&other.port))
    }
}

impl PartialOrd for EndPoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for EndPoint {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EndPoint {}

impl Hash for EndPoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        for b in self.host.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
        self.port.hash(state);
    }
}

impl fmt::Display for EndPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
