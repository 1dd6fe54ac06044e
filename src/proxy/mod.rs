//! Proxy traversal
//!
//! Three connection paths exist: direct, plain HTTP proxy (the proxy
//! relays, the request line carries the absolute URI), and CONNECT
//! tunneling for TLS through a proxy. The path is selected once per
//! request from the caller-supplied resolver; handler instances are
//! cached per proxy URI so one proxy keeps one authenticator state
//! across requests.

pub mod auth;

pub use auth::{
    Credential, NoCredentials, ProxyAuthenticator, ProxyCredentials, StaticCredentials,
};

use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use url::Url;

use crate::http::request::path_and_query;
use crate::http::response::{read_response, ParseOptions};
use crate::http::session::{HttpSession, SessionOps, TcpSession};
use crate::http::tls::TlsConnector;
use crate::http::{Error, Method, Result, Version, CRLF};
use crate::net::{CancelToken, EndPoint};

/// Maps a target URI to the proxy that should carry it, if any
pub trait ProxyResolver: Send + Sync {
    fn proxy_for(&self, target: &Url) -> Option<Url>;
}

/// Direct connections for every target
pub struct NoProxy;

impl ProxyResolver for NoProxy {
    fn proxy_for(&self, _target: &Url) -> Option<Url> {
        None
    }
}

/// One proxy for every target
pub struct FixedProxy {
    proxy: Url,
}

impl FixedProxy {
    pub fn new(proxy: Url) -> Self {
        FixedProxy { proxy }
    }
}

impl ProxyResolver for FixedProxy {
    fn proxy_for(&self, _target: &Url) -> Option<Url> {
        Some(self.proxy.clone())
    }
}

/// The CONNECT request line for a tunnel to `destination`
fn connect_request_line(destination: &EndPoint) -> String {
    format!("CONNECT {} HTTP/1.1", destination)
}

/// The connection path for one proxy (or the direct path)
pub struct ProxyHandler {
    proxy: Option<Url>,
    authenticator: Mutex<ProxyAuthenticator>,
}

impl ProxyHandler {
    pub(crate) fn direct(credentials: Arc<dyn ProxyCredentials>) -> Self {
        ProxyHandler {
            proxy: None,
            authenticator: Mutex::new(ProxyAuthenticator::new(credentials)),
        }
    }

    pub(crate) fn proxied(proxy: Url, credentials: Arc<dyn ProxyCredentials>) -> Self {
        ProxyHandler {
            proxy: Some(proxy),
            authenticator: Mutex::new(ProxyAuthenticator::new(credentials)),
        }
    }

    pub fn proxy_uri(&self) -> Option<&Url> {
        self.proxy.as_ref()
    }

    /// The authenticator shared by every request through this proxy
    pub fn authenticator(&self) -> std::sync::MutexGuard<'_, ProxyAuthenticator> {
        self.authenticator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Build the request line for the application request.
    ///
    /// Directly connected requests use the origin form (path+query);
    /// anything that goes through a proxy uses the absolute URI.
    pub fn request_line(&self, method: Method, version: Version, target: &Url) -> String {
        match &self.proxy {
            None => format!("{} {} HTTP/{}", method, path_and_query(target), version),
            Some(_) => format!("{} {} HTTP/{}", method, target, version),
        }
    }

    /// Where the TCP connection actually goes: the proxy endpoint when
    /// one is configured, the true destination otherwise.
    pub fn connect_endpoint(&self, destination: &EndPoint) -> Result<EndPoint> {
        match &self.proxy {
            Some(proxy) => Ok(EndPoint::from_url(proxy)?),
            None => Ok(destination.clone()),
        }
    }

    /// Prepare a stream for TLS application data: establish the CONNECT
    /// tunnel first when a proxy is in the way, then run the TLS
    /// handshake addressed to the true destination host.
    pub(crate) fn establish_tls(
        &self,
        stream: TcpStream,
        destination: &EndPoint,
        tls: &TlsConnector,
        rw_timeout: Option<Duration>,
        cancel: &CancelToken,
        max_status_line: usize,
    ) -> Result<Box<dyn SessionOps + Send>> {
        let stream = match &self.proxy {
            Some(proxy) => self.connect_tunnel(
                stream,
                destination,
                proxy.clone(),
                rw_timeout,
                cancel,
                max_status_line,
            )?,
            None => stream,
        };
        Ok(Box::new(tls.connect(stream, destination.host())?))
    }

    /// Run the CONNECT handshake. The proxy's reply is parsed headers
    /// only, so the reply never consumes tunnel bytes and never owns the
    /// socket. A 407 gets one retry after the authenticator re-arms.
    fn connect_tunnel(
        &self,
        stream: TcpStream,
        destination: &EndPoint,
        proxy: Url,
        rw_timeout: Option<Duration>,
        cancel: &CancelToken,
        max_status_line: usize,
    ) -> Result<TcpStream> {
        let mut session = HttpSession::new(TcpSession::new(stream));
        session.set_timeout(rw_timeout);
        session.set_cancel(cancel.clone());

        let mut authorization = self.authenticator().connect_authorization(destination)?;
        let mut retried = false;

        loop {
            let mut handshake = String::new();
            handshake.push_str(&connect_request_line(destination));
            handshake.push_str(CRLF);
            handshake.push_str(&format!("Host: {}{}", destination.host(), CRLF));
            if let Some(value) = &authorization {
                handshake.push_str(&format!("Proxy-Authorization: {}{}", value, CRLF));
            }
            handshake.push_str(CRLF);

            session.write_all(handshake.as_bytes())?;
            session.flush()?;

            let opts = ParseOptions {
                max_status_line: Some(max_status_line),
                skip_body: true,
                cookies: None,
            };
            let response = read_response(&mut session, &opts)?;

            if response.is_success() {
                return Ok(session.into_inner().into_stream());
            }

            if response.status() == 407 && !retried {
                // Clear the reply body off the stream so a second
                // CONNECT starts clean
                if let Some(len) = response
                    .content_headers()
                    .get("Content-Length")
                    .and_then(|v| v.trim().parse::<usize>().ok())
                {
                    let mut drain = vec![0u8; len];
                    session.read_exact(&mut drain)?;
                }

                if self
                    .authenticator()
                    .authentication_failed(&response, &proxy)?
                {
                    authorization = self.authenticator().connect_authorization(destination)?;
                    if authorization.is_some() {
                        retried = true;
                        continue;
                    }
                }
            }

            return Err(Error::Proxy(format!(
                "CONNECT to {} failed: {} {}",
                destination,
                response.status(),
                response.reason()
            )));
        }
    }
}

/// Per-proxy-URI handler cache
pub struct ProxyRegistry {
    resolver: Arc<dyn ProxyResolver>,
    credentials: Arc<dyn ProxyCredentials>,
    direct: Arc<ProxyHandler>,
    proxied: Mutex<HashMap<String, Arc<ProxyHandler>>>,
}

impl ProxyRegistry {
    pub fn new(resolver: Arc<dyn ProxyResolver>, credentials: Arc<dyn ProxyCredentials>) -> Self {
        ProxyRegistry {
            direct: Arc::new(ProxyHandler::direct(credentials.clone())),
            resolver,
            credentials,
            proxied: Mutex::new(HashMap::new()),
        }
    }

    /// The handler for one request's target. Repeated requests through
    /// the same proxy share one handler and thus one authenticator.
    pub fn handler_for(&self, target: &Url) -> Arc<ProxyHandler> {
        let Some(proxy) = self.resolver.proxy_for(target) else {
            return self.direct.clone();
        };

        let mut handlers = self
            .proxied
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        handlers
            .entry(proxy.as_str().to_string())
            .or_insert_with(|| {
                Arc::new(ProxyHandler::proxied(proxy, self.credentials.clone()))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HTTP_11;

    fn registry(resolver: Arc<dyn ProxyResolver>) -> ProxyRegistry {
        ProxyRegistry::new(resolver, Arc::new(NoCredentials))
    }

    #[test]
    fn test_connect_request_line() {
        let destination = EndPoint::new("example.org", 443);
        assert_eq!(
            connect_request_line(&destination),
            "CONNECT example.org:443 HTTP/1.1"
        );
    }

    #[test]
    fn test_direct_request_line_is_origin_form() {
        let handler = ProxyHandler::direct(Arc::new(NoCredentials));
        let target = Url::parse("http://example.org/a/b?c=1").unwrap();
        assert_eq!(
            handler.request_line(Method::Get, HTTP_11, &target),
            "GET /a/b?c=1 HTTP/1.1"
        );
    }

    #[test]
    fn test_proxied_request_line_is_absolute() {
        let proxy = Url::parse("http://proxy.example:3128").unwrap();
        let handler = ProxyHandler::proxied(proxy, Arc::new(NoCredentials));
        let target = Url::parse("http://example.org/a/b?c=1").unwrap();
        assert_eq!(
            handler.request_line(Method::Post, HTTP_11, &target),
            "POST http://example.org/a/b?c=1 HTTP/1.1"
        );
    }

    #[test]
    fn test_connect_endpoint_selection() {
        let destination = EndPoint::new("example.org", 80);

        let direct = ProxyHandler::direct(Arc::new(NoCredentials));
        assert_eq!(
            direct.connect_endpoint(&destination).unwrap(),
            destination
        );

        let proxy = Url::parse("http://proxy.example:3128").unwrap();
        let proxied = ProxyHandler::proxied(proxy, Arc::new(NoCredentials));
        assert_eq!(
            proxied.connect_endpoint(&destination).unwrap(),
            EndPoint::new("proxy.example", 3128)
        );
    }

    #[test]
    fn test_handler_cached_per_proxy_uri() {
        let proxy = Url::parse("http://proxy.example:3128").unwrap();
        let registry = registry(Arc::new(FixedProxy::new(proxy)));
        let target = Url::parse("http://example.org/").unwrap();

        let first = registry.handler_for(&target);
        let second = registry.handler_for(&target);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_no_proxy_resolves_to_direct() {
        let registry = registry(Arc::new(NoProxy));
        let target = Url::parse("http://example.org/").unwrap();
        let handler = registry.handler_for(&target);
        assert!(handler.proxy_uri().is_none());
    }
}
