//! Proxy authentication
//!
//! A 407 response drives a small state machine: challenge headers are
//! parsed, the highest-ranked scheme with a registered factory is
//! selected, credentials are resolved for the proxy, and the scheme
//! module produces one `Proxy-Authorization` value per subsequent
//! attempt. The registry is plain data, not a type hierarchy.

mod basic;
mod digest;
mod ntlm;

use std::sync::Arc;

use url::Url;

use crate::http::request::path_and_query;
use crate::http::{Request, Response, Result};
use crate::net::EndPoint;

/// A username/password pair for one proxy
#[derive(Debug, Clone)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credential {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Credential lookup, queried per (proxy URI, scheme)
pub trait ProxyCredentials: Send + Sync {
    fn credential(&self, proxy: &Url, scheme: &str) -> Option<Credential>;
}

/// No credentials for any proxy
pub struct NoCredentials;

impl ProxyCredentials for NoCredentials {
    fn credential(&self, _proxy: &Url, _scheme: &str) -> Option<Credential> {
        None
    }
}

/// The same credential for every proxy and scheme
pub struct StaticCredentials {
    credential: Credential,
}

impl StaticCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        StaticCredentials {
            credential: Credential::new(username, password),
        }
    }
}

impl ProxyCredentials for StaticCredentials {
    fn credential(&self, _proxy: &Url, _scheme: &str) -> Option<Credential> {
        Some(self.credential.clone())
    }
}

/// One active authentication scheme
pub(crate) trait AuthScheme: Send + std::fmt::Debug {
    /// Compute the authorization header value for a request described by
    /// its method, request-target and (for integrity-protected schemes)
    /// entity body. `None` means the scheme has nothing to offer right
    /// now (e.g. an expired client nonce awaiting a fresh challenge).
    fn authorization(
        &mut self,
        method: &str,
        uri: &str,
        entity_body: Option<&[u8]>,
    ) -> Result<Option<String>>;
}

/// Scheme constructor: challenge data plus credentials
type SchemeBuilder = fn(Option<&str>, Credential) -> Result<Box<dyn AuthScheme>>;

struct SchemeFactory {
    scheme: &'static str,
    /// Higher wins when the proxy offers several schemes
    priority: i32,
    build: SchemeBuilder,
}

static FACTORIES: &[SchemeFactory] = &[
    SchemeFactory {
        scheme: "Basic",
        priority: -1000,
        build: basic::build,
    },
    SchemeFactory {
        scheme: "NTLM",
        priority: 0,
        build: ntlm::build,
    },
    SchemeFactory {
        scheme: "Digest",
        priority: 1000,
        build: digest::build,
    },
];

/// Split a challenge into scheme and scheme-data at the first whitespace
fn parse_challenge(value: &str) -> (&str, Option<&str>) {
    let value = value.trim();
    match value.find([' ', '\t']) {
        Some(ws) => (&value[..ws], Some(value[ws..].trim_start())),
        None => (value, None),
    }
}

/// Per-proxy authentication state
pub struct ProxyAuthenticator {
    credentials: Arc<dyn ProxyCredentials>,
    module: Option<Box<dyn AuthScheme>>,
}

impl ProxyAuthenticator {
    pub fn new(credentials: Arc<dyn ProxyCredentials>) -> Self {
        ProxyAuthenticator {
            credentials,
            module: None,
        }
    }

    /// Whether a scheme module is armed from a previous challenge
    pub fn is_armed(&self) -> bool {
        self.module.is_some()
    }

    /// Apply the active scheme to a request. Nothing happens without an
    /// armed module or when the header is already present.
    pub fn authenticate(&mut self, request: &mut Request) -> Result<()> {
        if request.headers().contains("Proxy-Authorization") {
            return Ok(());
        }
        let uri = path_and_query(request.url());
        let method = request.method().as_str().to_string();
        if let Some(value) = self.authorization_for(&method, &uri, request.body_bytes())? {
            request.headers_mut().insert("Proxy-Authorization", value);
        }
        Ok(())
    }

    /// The header value the active scheme computes for one request,
    /// described by method, request-target and entity body
    pub(crate) fn authorization_for(
        &mut self,
        method: &str,
        uri: &str,
        entity_body: Option<&[u8]>,
    ) -> Result<Option<String>> {
        match &mut self.module {
            Some(module) => module.authorization(method, uri, entity_body),
            None => Ok(None),
        }
    }

    /// Authorization value for a CONNECT handshake to `destination`
    pub(crate) fn connect_authorization(
        &mut self,
        destination: &EndPoint,
    ) -> Result<Option<String>> {
        self.authorization_for("CONNECT", &destination.to_string(), None)
    }

    /// Digest a 407 response: select a scheme, resolve credentials,
    /// build the module. Returns whether a module is now armed. Missing
    /// credentials leave the authenticator empty without error;
    /// malformed or unsupported challenges are hard errors.
    pub fn authentication_failed(&mut self, response: &Response, proxy: &Url) -> Result<bool> {
        self.module = None;

        let mut selected: Option<(&SchemeFactory, Option<&str>)> = None;
        for value in response.headers().get_all("Proxy-Authenticate") {
            let (scheme, data) = parse_challenge(value);
            let Some(factory) = FACTORIES
                .iter()
                .find(|f| f.scheme.eq_ignore_ascii_case(scheme))
            else {
                continue;
            };
            if selected.map_or(true, |(best, _)| factory.priority > best.priority) {
                selected = Some((factory, data));
            }
        }

        let Some((factory, data)) = selected else {
            return Ok(false);
        };
        let Some(credential) = self.credentials.credential(proxy, factory.scheme) else {
            return Ok(false);
        };

        self.module = Some((factory.build)(data, credential)?);
        Ok(true)
    }
}
