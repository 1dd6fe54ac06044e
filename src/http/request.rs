//! HTTP requests
//!
//! The request type carries a full URL rather than a bare path: the
//! active proxy mode decides per request whether the wire sees the
//! path+query, the absolute URI, or a CONNECT target.

use std::fmt;
use std::io::Read;

use url::Url;

use super::headers::Headers;
use super::{Error, Result, Version};

/// HTTP request methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Request body
///
/// A `Reader` body is buffered before the first send attempt so the
/// request carries a known Content-Length (keep-alive framing needs one)
/// and so a retry can replay the same bytes.
pub enum Body {
    Empty,
    Bytes(Vec<u8>),
    Reader(Box<dyn Read + Send>),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Body::Empty"),
            Body::Bytes(b) => write!(f, "Body::Bytes({} bytes)", b.len()),
            Body::Reader(_) => f.write_str("Body::Reader"),
        }
    }
}

/// An outgoing HTTP request
#[derive(Debug)]
pub struct Request {
    method: Method,
    url: Url,
    version: Version,
    headers: Headers,
    body: Body,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Request {
            method,
            url,
            version: Version::default(),
            headers: Headers::new(),
            body: Body::Empty,
        }
    }

    /// Convenience constructor for a bodyless GET
    pub fn get(url: Url) -> Self {
        Request::new(Method::Get, url)
    }

    /// Convenience constructor for a POST with a byte body
    pub fn post(url: Url, body: Vec<u8>) -> Self {
        Request::new(Method::Post, url).with_body(Body::Bytes(body))
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// The body length, when determinable without consuming anything
    pub fn content_length(&self) -> Option<u64> {
        match &self.body {
            Body::Empty => None,
            Body::Bytes(b) => Some(b.len() as u64),
            Body::Reader(_) => None,
        }
    }

    /// The body bytes, once buffered
    pub fn body_bytes(&self) -> Option<&[u8]> {
        match &self.body {
            Body::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Buffer a streaming body into memory.
    ///
    /// PUT and POST requests must carry a determinable Content-Length;
    /// a body that cannot be buffered is a hard error rather than a
    /// silently unframed send.
    pub(crate) fn buffer_body(&mut self) -> Result<()> {
        if let Body::Reader(reader) = &mut self.body {
            let mut buf = Vec::new();
            reader
                .read_to_end(&mut buf)
                .map_err(|e| Error::Protocol(format!("Cannot buffer request body: {}", e)))?;
            self.body = Body::Bytes(buf);
        }
        Ok(())
    }
}

/// The path plus query of a URL, as it appears in an origin-form
/// request line
pub fn path_and_query(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}
