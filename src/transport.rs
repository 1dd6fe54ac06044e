//! Transport orchestrator
//!
//! The top-level request/response cycle: pick the proxy path, resolve
//! and validate the destination, acquire the pooled connection, write
//! the request, parse the response, negotiate keep-alive, and apply the
//! retry and redirect policies. Any first-attempt failure gets exactly
//! one retry on a freshly created connection; the second failure
//! propagates to the caller untouched.

use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use url::Url;

use crate::http::headers::Headers;
use crate::http::request::path_and_query;
use crate::http::response::{read_response, ParseOptions};
use crate::http::tls::TlsConnector;
use crate::http::{
    Body, CookieStore, Error, Method, Request, Response, Result, CRLF, DEFAULT_MAX_STATUS_LINE,
    HTTP_10,
};
use crate::net::{
    resolve, AddressSupport, CancelToken, ClientConfig, EndPoint, EndPointKind, TcpClient,
};
use crate::pool::{ConnectionKey, ConnectionPool, PooledConnection};
use crate::proxy::{NoCredentials, NoProxy, ProxyCredentials, ProxyRegistry, ProxyResolver};

/// Configuration surface of a transport
pub struct TransportConfig {
    pub connect_timeout: Duration,
    pub read_write_timeout: Duration,
    /// Follow 301/303/307 responses (302 is always followed)
    pub allow_redirect: bool,
    /// Resolve host names locally instead of handing them to the
    /// connect layer
    pub resolve_host: bool,
    pub address_support: AddressSupport,
    pub max_status_line: usize,
    pub use_cookies: bool,
    pub verify_certificates: bool,
    pub proxy_resolver: Arc<dyn ProxyResolver>,
    pub proxy_credentials: Arc<dyn ProxyCredentials>,
    pub cookie_store: Option<Arc<dyn CookieStore>>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            connect_timeout: Duration::from_secs(100),
            read_write_timeout: Duration::from_secs(300),
            allow_redirect: false,
            resolve_host: false,
            address_support: AddressSupport::ALL,
            max_status_line: DEFAULT_MAX_STATUS_LINE,
            use_cookies: false,
            verify_certificates: true,
            proxy_resolver: Arc::new(NoProxy),
            proxy_credentials: Arc::new(NoCredentials),
            cookie_store: None,
        }
    }
}

/// HTTP/1.x client transport over pooled raw TCP connections
pub struct Transport {
    config: TransportConfig,
    pool: ConnectionPool,
    proxies: ProxyRegistry,
    tls: TlsConnector,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Result<Self> {
        let tls = TlsConnector::new(config.verify_certificates)?;
        let proxies = ProxyRegistry::new(
            config.proxy_resolver.clone(),
            config.proxy_credentials.clone(),
        );
        Ok(Transport {
            config,
            pool: ConnectionPool::new(),
            proxies,
            tls,
        })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Send one request and return the parsed response.
    ///
    /// The first attempt failing for any reason triggers exactly one
    /// retry with a forcibly recreated connection. A redirect response
    /// is followed once per the policy: 302 always, 301/303/307 only
    /// when redirects are enabled, with 303 rewriting the method to GET.
    pub fn send(&self, mut request: Request, cancel: &CancelToken) -> Result<Response> {
        // A streaming body is buffered up front so a retry can replay it
        request.buffer_body()?;
        validate_content(&request)?;

        let mut response =
            match self.internal_send(&request, request.method(), request.url().clone(), cancel, false)
            {
                Ok(response) => response,
                // An unusable target stays unusable; everything else gets
                // one retry on a fresh connection
                Err(error) if !is_retryable(&error) => return Err(error),
                Err(_) => {
                    self.internal_send(&request, request.method(), request.url().clone(), cancel, true)?
                }
            };

        let follow = response.status() == 302
            || (self.config.allow_redirect && matches!(response.status(), 301 | 303 | 307));
        if follow {
            if let Some(location) = response.header("Location").map(str::to_string) {
                let method = if response.status() == 303 {
                    Method::Get
                } else {
                    request.method()
                };
                let target = request.url().join(&location)?;
                drop(response);
                response = self.internal_send(&request, method, target, cancel, false)?;
            }
        }

        Ok(response)
    }

    /// Validate the destination against the supported address families,
    /// resolving host names when the family set (or configuration)
    /// demands it.
    fn destination_for(&self, url: &Url) -> Result<EndPoint> {
        let support = self.config.address_support;
        let mut destination = EndPoint::from_url(url)?;

        match destination.kind() {
            EndPointKind::IPv4 => {}
            EndPointKind::IPv6 => {
                if !support.ipv6 {
                    return Err(
                        crate::net::Error::UnsupportedAddress(destination.to_string()).into()
                    );
                }
            }
            EndPointKind::HostName => {
                if !support.host_names {
                    destination = resolve(&destination, support.ip_support())
                        .map_err(Error::from)?
                        .ok_or_else(|| {
                            crate::net::Error::NoAddresses(destination.to_string())
                        })?;
                }
            }
        }

        if self.config.resolve_host && destination.kind() == EndPointKind::HostName {
            if let Some(resolved) = resolve(&destination, support.ip_support())? {
                destination = resolved;
            }
        }

        Ok(destination)
    }

    fn internal_send(
        &self,
        request: &Request,
        method: Method,
        url: Url,
        cancel: &CancelToken,
        force_recreate: bool,
    ) -> Result<Response> {
        let handler = self.proxies.handler_for(&url);
        let use_ssl = url.scheme().eq_ignore_ascii_case("https");
        let destination = self.destination_for(&url)?;
        let key = ConnectionKey::new(destination.clone(), use_ssl);

        let connection = self.pool.get_or_create(&key, force_recreate, || {
            let endpoint = handler.connect_endpoint(&destination)?;
            let mut client_config = ClientConfig::new(endpoint);
            client_config.connect_timeout = Some(self.config.connect_timeout);
            client_config.read_write_timeout = Some(self.config.read_write_timeout);
            Ok(PooledConnection::new(
                key.clone(),
                TcpClient::new(client_config),
            ))
        })?;

        let mut connection = connection.lock().unwrap_or_else(PoisonError::into_inner);
        let session = connection.ensure_open(
            &destination,
            &handler,
            &self.tls,
            cancel,
            self.config.max_status_line,
        )?;

        // Assemble the header block: Host and Connection first, then
        // cookies and proxy authorization, then whatever the request
        // carries that is not already present.
        let mut headers = Headers::new();
        if let Some(host) = url.host_str() {
            headers.insert("Host", host);
        }
        if request.version() >= HTTP_10 {
            headers.insert("Connection", "Keep-Alive");
        }
        if self.config.use_cookies {
            if let Some(store) = &self.config.cookie_store {
                if let Some(cookie) = store.cookie_header(&url) {
                    if !cookie.is_empty() {
                        headers.insert("Cookie", cookie);
                    }
                }
            }
        }
        if handler.proxy_uri().is_some() && !request.headers().contains("Proxy-Authorization") {
            let uri = path_and_query(&url);
            if let Some(value) = handler.authenticator().authorization_for(
                method.as_str(),
                &uri,
                request.body_bytes(),
            )? {
                headers.insert("Proxy-Authorization", value);
            }
        }

        let reserved: Vec<String> = headers.iter().map(|(n, _)| n.to_string()).collect();
        for (name, value) in request.headers().iter() {
            if !reserved.iter().any(|r| r.eq_ignore_ascii_case(name)) {
                headers.insert(name, value);
            }
        }

        let body = request.body_bytes().unwrap_or_default();
        if !headers.contains("Content-Length")
            && (!body.is_empty() || matches!(method, Method::Put | Method::Post))
        {
            headers.insert("Content-Length", body.len().to_string());
        }

        let mut wire = String::new();
        wire.push_str(&handler.request_line(method, request.version(), &url));
        wire.push_str(CRLF);
        for (name, value) in headers.iter() {
            wire.push_str(name);
            wire.push_str(": ");
            wire.push_str(value);
            wire.push_str(CRLF);
        }
        wire.push_str(CRLF);

        session.write_all(wire.as_bytes())?;
        if !body.is_empty() {
            session.write_all(body)?;
        }
        session.flush()?;

        let cookie_sink = if self.config.use_cookies {
            self.config.cookie_store.as_deref()
        } else {
            None
        };
        let opts = ParseOptions {
            max_status_line: Some(self.config.max_status_line),
            skip_body: false,
            cookies: cookie_sink.map(|store| (store, &url)),
        };
        let response = read_response(session, &opts)?;

        connection.update(&response, Instant::now());

        // A proxy challenge arms the authenticator for the next attempt
        if response.status() == 407 {
            if let Some(proxy) = handler.proxy_uri() {
                let proxy = proxy.clone();
                handler.authenticator().authentication_failed(&response, &proxy)?;
            }
        }

        let evict = response.connection_close();
        drop(connection);
        if evict {
            self.pool.remove(&key);
        }

        Ok(response)
    }
}

/// Unsupported-target failures are deterministic; a second attempt
/// cannot change them
fn is_retryable(error: &Error) -> bool {
    !matches!(
        error,
        Error::Net(
            crate::net::Error::UnsupportedAddress(_) | crate::net::Error::NoAddresses(_)
        )
    )
}

/// PUT and POST bodies must be framable: keep-alive needs a known
/// Content-Length, so a body whose length cannot be determined is a
/// hard error rather than a silently unframed send.
fn validate_content(request: &Request) -> Result<()> {
    if !matches!(request.method(), Method::Put | Method::Post) {
        return Ok(());
    }
    match request.body() {
        Body::Empty | Body::Bytes(_) => Ok(()),
        Body::Reader(_) => Err(Error::Protocol(
            "A request body must have a known Content-Length when Keep-Alive is used".to_string(),
        )),
    }
}
