//! Connection pooling
//!
//! At most one reusable connection exists per (destination, TLS) key.
//! Entries track keep-alive lifetime and usage-count limits negotiated
//! from response headers; expired entries are discovered and evicted
//! lazily on next use of their key. The pool map lives behind one lock;
//! each entry carries its own lock that serializes request/response
//! cycles on that connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::http::headers::Headers;
use crate::http::response::Response;
use crate::http::session::{HttpSession, SessionOps, TcpSession};
use crate::http::tls::TlsConnector;
use crate::http::{Error, Result, HTTP_10};
use crate::net::{CancelToken, EndPoint, TcpClient};
use crate::proxy::ProxyHandler;

/// Evict slightly before the negotiated lifetime so a request never
/// races the server's own teardown.
const SAFETY_MARGIN: Duration = Duration::from_millis(500);

/// Lifetime assumed when the server advertises keep-alive without limits
const DEFAULT_KEEP_ALIVE_LIFETIME: Duration = Duration::from_secs(5);

/// Identifies at most one pooled connection
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionKey {
    pub address: EndPoint,
    pub use_ssl: bool,
}

impl ConnectionKey {
    pub fn new(address: EndPoint, use_ssl: bool) -> Self {
        ConnectionKey { address, use_ssl }
    }
}

/// One reusable connection: a TCP client plus, once opened, its session
pub struct PooledConnection {
    key: ConnectionKey,
    client: TcpClient,
    session: Option<HttpSession<Box<dyn SessionOps + Send>>>,
    lifetime: Option<Duration>,
    max_usage_count: Option<u32>,
    usage_count: u32,
    last_usage: Option<Instant>,
    max_valid: Option<Instant>,
}

impl PooledConnection {
    /// A fresh connection with no limits; the first `update` narrows
    /// them from what the server answers.
    pub fn new(key: ConnectionKey, client: TcpClient) -> Self {
        PooledConnection {
            key,
            client,
            session: None,
            lifetime: None,
            max_usage_count: None,
            usage_count: 0,
            last_usage: None,
            max_valid: None,
        }
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    pub fn lifetime(&self) -> Option<Duration> {
        self.lifetime
    }

    pub fn max_usage_count(&self) -> Option<u32> {
        self.max_usage_count
    }

    pub fn usage_count(&self) -> u32 {
        self.usage_count
    }

    pub fn last_usage(&self) -> Option<Instant> {
        self.last_usage
    }

    /// The pool invariant: neither the lifetime deadline nor the usage
    /// quota may be exhausted.
    pub fn is_valid(&self, now: Instant) -> bool {
        let timeout_exceeded = match (self.lifetime, self.max_valid) {
            (Some(_), Some(max_valid)) => now >= max_valid,
            _ => false,
        };
        let usage_exceeded = self
            .max_usage_count
            .map_or(false, |max| self.usage_count >= max);
        !timeout_exceeded && !usage_exceeded
    }

    /// Return the open session, connecting (and TLS-bootstrapping, via
    /// the proxy handler) first when necessary. An expired entry is
    /// closed before reconnecting.
    pub fn ensure_open(
        &mut self,
        destination: &EndPoint,
        handler: &ProxyHandler,
        tls: &TlsConnector,
        cancel: &CancelToken,
        max_status_line: usize,
    ) -> Result<&mut HttpSession<Box<dyn SessionOps + Send>>> {
        if !self.is_valid(Instant::now()) {
            self.close();
        }

        if self.session.is_none() || !self.client.is_connected() {
            self.close();
            self.client.connect(cancel)?;
            let stream = self.client.take_stream()?;
            let read_write_timeout = self.client.config().read_write_timeout;

            let ops: Box<dyn SessionOps + Send> = if self.key.use_ssl {
                handler.establish_tls(
                    stream,
                    destination,
                    tls,
                    read_write_timeout,
                    cancel,
                    max_status_line,
                )?
            } else {
                Box::new(TcpSession::new(stream))
            };

            let mut session = HttpSession::new(ops);
            session.set_timeout(read_write_timeout);
            self.session = Some(session);
        }

        let session = match &mut self.session {
            Some(session) => session,
            None => return Err(Error::ConnectionClosed),
        };
        session.set_cancel(cancel.clone());
        Ok(session)
    }

    /// Keep-alive negotiation from a response.
    ///
    /// A pre-1.0 response with no keep-alive signal caps the connection
    /// at a single use. Otherwise `Keep-Alive: timeout=,max=` directives
    /// narrow the limits (`max` resets the usage count); a keep-alive
    /// response without any limit gets the default lifetime. Usage and
    /// timestamps advance on every call.
    pub fn update(&mut self, response: &Response, now: Instant) {
        let keep_alive = response.version() >= HTTP_10
            || response.headers().value_contains("Connection", "Keep-Alive");

        if !keep_alive {
            self.max_usage_count = Some(1);
        } else {
            for value in response.headers().get_all("Keep-Alive") {
                for (name, value) in Headers::parse_directives(value) {
                    match name.as_str() {
                        "timeout" => {
                            if let Ok(secs) = value.parse::<u64>() {
                                self.lifetime = Some(Duration::from_secs(secs));
                            }
                        }
                        "max" => {
                            if let Ok(max) = value.parse::<u32>() {
                                self.max_usage_count = Some(max);
                                self.usage_count = 0;
                            }
                        }
                        _ => {}
                    }
                }
            }

            if self.lifetime.is_none() && self.max_usage_count.is_none() {
                self.lifetime = Some(DEFAULT_KEEP_ALIVE_LIFETIME);
            }
        }

        self.usage_count += 1;
        self.last_usage = Some(now);
        if let Some(lifetime) = self.lifetime {
            self.max_valid = now
                .checked_add(lifetime)
                .and_then(|t| t.checked_sub(SAFETY_MARGIN));
        }
    }

    /// Dispose the stream and disconnect the socket
    pub fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            let _ = session.close();
        }
        self.client.disconnect();
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// The pool map: one entry per key, all mutation under one lock
#[derive(Default)]
pub struct ConnectionPool {
    entries: Mutex<HashMap<ConnectionKey, Arc<Mutex<PooledConnection>>>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        ConnectionPool {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the entry for `key`, constructing it when absent. Forced
    /// recreation disposes and replaces whatever is there, which is how
    /// the retry path guarantees itself a fresh socket.
    pub fn get_or_create<F>(
        &self,
        key: &ConnectionKey,
        force_recreate: bool,
        make: F,
    ) -> Result<Arc<Mutex<PooledConnection>>>
    where
        F: FnOnce() -> Result<PooledConnection>,
    {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        if force_recreate {
            if let Some(old) = entries.remove(key) {
                old.lock().unwrap_or_else(PoisonError::into_inner).close();
            }
        }

        if let Some(existing) = entries.get(key) {
            return Ok(existing.clone());
        }

        let connection = Arc::new(Mutex::new(make()?));
        entries.insert(key.clone(), connection.clone());
        Ok(connection)
    }

    /// Evict and close the entry for `key`, if present. Used when a
    /// response carried `Connection: close`.
    pub fn remove(&self, key: &ConnectionKey) {
        let removed = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        // Closing happens outside the map lock
        if let Some(old) = removed {
            old.lock().unwrap_or_else(PoisonError::into_inner).close();
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::response::tests_support::parse_bytes;
    use crate::net::ClientConfig;

    fn test_key() -> ConnectionKey {
        ConnectionKey::new(EndPoint::new("127.0.0.1", 9), false)
    }

    fn unconnected(key: &ConnectionKey) -> PooledConnection {
        let config = ClientConfig::new(key.address.clone());
        PooledConnection::new(key.clone(), TcpClient::new(config))
    }

    fn keep_alive_response(header: &str) -> Response {
        parse_bytes(
            format!(
                "HTTP/1.1 200 OK\r\nKeep-Alive: {}\r\nContent-Length: 0\r\n\r\n",
                header
            )
            .as_bytes(),
        )
    }

    #[test]
    fn test_key_ordering() {
        let plain = ConnectionKey::new(EndPoint::new("a.example", 80), false);
        let ssl = ConnectionKey::new(EndPoint::new("a.example", 80), true);
        let other = ConnectionKey::new(EndPoint::new("b.example", 80), false);
        assert!(plain < ssl);
        assert!(ssl < other);
        assert_eq!(
            plain,
            ConnectionKey::new(EndPoint::new("A.EXAMPLE", 80), false)
        );
    }

    #[test]
    fn test_fresh_connection_is_valid_without_limits() {
        let connection = unconnected(&test_key());
        assert!(connection.is_valid(Instant::now()));
        assert_eq!(connection.usage_count(), 0);
    }

    #[test]
    fn test_keep_alive_directives() {
        let mut connection = unconnected(&test_key());
        connection.update(&keep_alive_response("timeout=15, max=100"), Instant::now());

        assert_eq!(connection.lifetime(), Some(Duration::from_secs(15)));
        assert_eq!(connection.max_usage_count(), Some(100));
        // Reset to zero by `max`, then bumped by the update itself
        assert_eq!(connection.usage_count(), 1);
        assert!(connection.is_valid(Instant::now()));
    }

    #[test]
    fn test_pre_http10_forces_single_use() {
        let mut connection = unconnected(&test_key());
        // A simple response has version 0.9 and no headers at all
        let response = parse_bytes(b"raw body with no status line");
        connection.update(&response, Instant::now());

        assert_eq!(connection.max_usage_count(), Some(1));
        assert_eq!(connection.usage_count(), 1);
        assert!(!connection.is_valid(Instant::now()));
    }

    #[test]
    fn test_usage_quota_invalidates() {
        let mut connection = unconnected(&test_key());
        connection.update(&keep_alive_response("max=1"), Instant::now());
        assert!(!connection.is_valid(Instant::now()));
    }

    #[test]
    fn test_keep_alive_without_limits_defaults_lifetime() {
        let mut connection = unconnected(&test_key());
        let response = parse_bytes(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
        let now = Instant::now();
        connection.update(&response, now);

        assert_eq!(connection.lifetime(), Some(DEFAULT_KEEP_ALIVE_LIFETIME));
        assert!(connection.is_valid(now));
        // Expired just past the lifetime minus the safety margin
        let later = now + DEFAULT_KEEP_ALIVE_LIFETIME;
        assert!(!connection.is_valid(later));
    }

    #[test]
    fn test_lifetime_honors_safety_margin() {
        let mut connection = unconnected(&test_key());
        let now = Instant::now();
        connection.update(&keep_alive_response("timeout=10"), now);

        let just_inside = now + Duration::from_millis(9400);
        let just_outside = now + Duration::from_millis(9600);
        assert!(connection.is_valid(just_inside));
        assert!(!connection.is_valid(just_outside));
    }

    #[test]
    fn test_unknown_directives_ignored() {
        let mut connection = unconnected(&test_key());
        connection.update(
            &keep_alive_response("timeout=15, max=100, frobnicate=3"),
            Instant::now(),
        );
        assert_eq!(connection.lifetime(), Some(Duration::from_secs(15)));
        assert_eq!(connection.max_usage_count(), Some(100));
    }

    #[test]
    fn test_pool_identity_across_calls() {
        let pool = ConnectionPool::new();
        let key = test_key();

        let first = pool
            .get_or_create(&key, false, || Ok(unconnected(&key)))
            .unwrap();
        let second = pool
            .get_or_create(&key, false, || Ok(unconnected(&key)))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_forced_recreation_replaces_entry() {
        let pool = ConnectionPool::new();
        let key = test_key();

        let first = pool
            .get_or_create(&key, false, || Ok(unconnected(&key)))
            .unwrap();
        let second = pool
            .get_or_create(&key, true, || Ok(unconnected(&key)))
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_remove_evicts() {
        let pool = ConnectionPool::new();
        let key = test_key();
        pool.get_or_create(&key, false, || Ok(unconnected(&key)))
            .unwrap();

        pool.remove(&key);
        assert!(pool.is_empty());

        let recreated = pool
            .get_or_create(&key, false, || Ok(unconnected(&key)))
            .unwrap();
        assert_eq!(recreated.lock().unwrap().usage_count(), 0);
    }

    #[test]
    fn test_keys_are_distinct_per_ssl_flag() {
        let pool = ConnectionPool::new();
        let plain = test_key();
        let ssl = ConnectionKey::new(plain.address.clone(), true);

        let a = pool
            .get_or_create(&plain, false, || Ok(unconnected(&plain)))
            .unwrap();
        let b = pool
            .get_or_create(&ssl, false, || Ok(unconnected(&ssl)))
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 2);
    }
}
