//! Network primitives
//!
//! Destination classification, host resolution and the low-level TCP
//! client that owns one connection's lifecycle.

pub mod cancel;
pub mod client;
pub mod endpoint;
pub mod resolver;

pub use cancel::CancelToken;
pub use client::{ClientConfig, TcpClient};
pub use endpoint::{EndPoint, EndPointKind};
pub use resolver::{resolve, AddressSupport, IpSupport};

/// Result type for network operations
pub type Result<T> = std::result::Result<T, Error>;

/// Network layer errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connect timed out")]
    Timeout,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Unsupported address family for {0}")]
    UnsupportedAddress(String),

    #[error("No usable address found for {0}")]
    NoAddresses(String),

    #[error("Not connected")]
    NotConnected,
}

/// Granularity of a single readiness wait. Cancellation is observed
/// between slices, so this bounds cancellation latency.
pub(crate) const POLL_SLICE_MS: u64 = 100;
