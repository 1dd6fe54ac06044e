//! httpwire - HTTP/1.x client transport over raw TCP sockets
//!
//! This crate implements an HTTP/1.x client transport directly on top of
//! TCP sockets, without going through a higher-level HTTP stack. It owns
//! persistent-connection pooling with keep-alive eviction, proxy traversal
//! (direct, plain HTTP proxy, CONNECT tunneling), proxy authentication
//! (Basic and Digest), and byte-level parsing of status lines, headers and
//! bodies, including legacy HTTP/0.9 simple responses.

pub mod http;
pub mod net;
pub mod pool;
pub mod proxy;
pub mod transport;

pub use http::{Body, CookieStore, Error, Headers, Method, Request, Response, Version};
pub use net::{AddressSupport, CancelToken, EndPoint, EndPointKind};
pub use proxy::{
    Credential, FixedProxy, NoCredentials, NoProxy, ProxyCredentials, ProxyResolver,
    StaticCredentials,
};
pub use transport::{Transport, TransportConfig};
