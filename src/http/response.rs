//! HTTP response parsing
//!
//! Reads a raw byte stream into a structured response. The stream is
//! consumed byte by byte through the header section so no body bytes are
//! ever over-read; bodies are framed by Content-Length or read to close.
//! A first line that is not a status line demotes the whole stream to an
//! HTTP/0.9 "simple response" whose body starts with the bytes already
//! consumed.

use bytes::Bytes;
use url::Url;

use super::headers::{is_content_header, Headers};
use super::session::{HttpSession, SessionOps};
use super::{CookieStore, Error, Result, Version, DEFAULT_MAX_STATUS_LINE, HTTP_09};

/// A parsed HTTP response
#[derive(Debug)]
pub struct Response {
    version: Version,
    status: u16,
    reason: String,
    headers: Headers,
    content_headers: Headers,
    body: Bytes,
}

impl Response {
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Message headers (everything that is not a content header)
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Body/content headers (Content-Length, Content-Type, ...)
    pub fn content_headers(&self) -> &Headers {
        &self.content_headers
    }

    /// First value for a header name, searching both partitions
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .or_else(|| self.content_headers.get(name))
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Whether the server asked for the connection to be torn down
    pub fn connection_close(&self) -> bool {
        self.headers.value_contains("Connection", "close")
    }
}

/// Options for one parse run
pub struct ParseOptions<'a> {
    /// Bound on the status line; `None` means unbounded
    pub max_status_line: Option<usize>,
    /// Leave the body on the stream (CONNECT handshake: the socket goes
    /// on to carry the tunnel, so the reply must not own it)
    pub skip_body: bool,
    /// Where `Set-Cookie`/`Set-Cookie2` headers are routed, keyed by the
    /// request URI
    pub cookies: Option<(&'a dyn CookieStore, &'a Url)>,
}

impl Default for ParseOptions<'_> {
    fn default() -> Self {
        ParseOptions {
            max_status_line: Some(DEFAULT_MAX_STATUS_LINE),
            skip_body: false,
            cookies: None,
        }
    }
}

/// Read one response off the session.
///
/// A stream that ends before yielding a single byte is a closed
/// connection, not a response.
pub fn read_response<S: SessionOps>(
    session: &mut HttpSession<S>,
    opts: &ParseOptions<'_>,
) -> Result<Response> {
    let first = read_line(session, opts.max_status_line)?;
    if first.raw.is_empty() {
        return Err(Error::ConnectionClosed);
    }

    let parsed = if first.eol {
        parse_status_line(&first.text)
    } else {
        // Over-long or truncated first line cannot be a status line
        None
    };

    let (version, status, reason) = match parsed {
        Some(parts) => parts,
        None => return read_simple_response(session, first.raw),
    };

    let mut headers = Headers::new();
    let mut content_headers = Headers::new();
    let mut content_length: Option<u64> = None;

    for (name, value) in read_header_block(session)? {
        if name.eq_ignore_ascii_case("Set-Cookie") || name.eq_ignore_ascii_case("Set-Cookie2") {
            if let Some((store, url)) = opts.cookies {
                store.set_cookies(url, &value);
            }
            continue;
        }
        if name.eq_ignore_ascii_case("Content-Length") {
            // First well-formed value wins; malformed means unframed
            if content_length.is_none() {
                content_length = value.trim().parse().ok();
            }
        }
        if is_content_header(&name) {
            content_headers.insert(name, value);
        } else {
            headers.insert(name, value);
        }
    }

    let body = if opts.skip_body {
        Bytes::new()
    } else {
        match content_length {
            Some(len) => {
                let mut body = vec![0u8; len as usize];
                session.read_exact(&mut body)?;
                Bytes::from(body)
            }
            None => {
                let mut body = Vec::new();
                read_to_close(session, &mut body)?;
                Bytes::from(body)
            }
        }
    };

    Ok(Response {
        version,
        status,
        reason,
        headers,
        content_headers,
        body,
    })
}

/// Build the HTTP/0.9 fallback: no status line, no headers, the body is
/// everything on the stream including the bytes already consumed.
fn read_simple_response<S: SessionOps>(
    session: &mut HttpSession<S>,
    mut body: Vec<u8>,
) -> Result<Response> {
    read_to_close(session, &mut body)?;
    Ok(Response {
        version: HTTP_09,
        status: 200,
        reason: String::new(),
        headers: Headers::new(),
        content_headers: Headers::new(),
        body: Bytes::from(body),
    })
}

struct Line {
    /// Line content with CR bytes dropped and without the terminating LF
    text: String,
    /// Whether an LF terminated the line (false: EOF or length bound)
    eol: bool,
    /// Every byte consumed, verbatim
    raw: Vec<u8>,
}

/// Read one line byte by byte. CR bytes are skipped, LF terminates; the
/// optional bound caps how much is consumed while hunting for the LF.
fn read_line<S: SessionOps>(session: &mut HttpSession<S>, max: Option<usize>) -> Result<Line> {
    let mut raw = Vec::new();
    let mut text = Vec::new();
    let mut eol = false;

    loop {
        if let Some(max) = max {
            if raw.len() >= max {
                break;
            }
        }
        match session.read_byte()? {
            None => break,
            Some(b) => {
                raw.push(b);
                match b {
                    b'\n' => {
                        eol = true;
                        break;
                    }
                    b'\r' => {}
                    _ => text.push(b),
                }
            }
        }
    }

    Ok(Line {
        text: String::from_utf8_lossy(&text).into_owned(),
        eol,
        raw,
    })
}

/// `HTTP/<d>.<d> <3 digits>[ <reason>]`
fn parse_status_line(line: &str) -> Option<(Version, u16, String)> {
    let rest = line.strip_prefix("HTTP/")?;
    let bytes = rest.as_bytes();

    if bytes.len() < 7 {
        return None;
    }
    if !bytes[0].is_ascii_digit() || bytes[1] != b'.' || !bytes[2].is_ascii_digit() {
        return None;
    }
    if !bytes[3].is_ascii_whitespace() {
        return None;
    }
    if !bytes[4..7].iter().all(u8::is_ascii_digit) {
        return None;
    }

    let reason = match bytes.len() {
        7 => String::new(),
        _ => {
            if !bytes[7].is_ascii_whitespace() {
                return None;
            }
            rest[8..].to_string()
        }
    };

    let version = Version {
        major: bytes[0] - b'0',
        minor: bytes[2] - b'0',
    };
    let status: u16 = rest[4..7].parse().ok()?;

    Some((version, status, reason))
}

/// Read header lines until the blank line (or EOF), folding
/// continuations (leading SP/HT) into the previous header.
fn read_header_block<S: SessionOps>(session: &mut HttpSession<S>) -> Result<Vec<(String, String)>> {
    let mut parsed = Vec::new();
    let mut pending: Option<String> = None;

    loop {
        let line = read_line(session, None)?;
        if line.text.is_empty() {
            // Blank line ends the block; so does EOF mid-headers
            break;
        }

        if line.text.starts_with(' ') || line.text.starts_with('\t') {
            if let Some(prev) = &mut pending {
                prev.push(' ');
                prev.push_str(line.text.trim());
                continue;
            }
            // A continuation with nothing to continue starts a header
        }

        if let Some(prev) = pending.take() {
            parsed.push(Headers::parse_line(&prev)?);
        }
        pending = Some(line.text);
    }

    if let Some(prev) = pending.take() {
        parsed.push(Headers::parse_line(&prev)?);
    }

    Ok(parsed)
}

/// Read until end of stream. On an unframed body a read timeout counts
/// as the end; the connection is not reusable either way.
fn read_to_close<S: SessionOps>(session: &mut HttpSession<S>, body: &mut Vec<u8>) -> Result<()> {
    let mut chunk = [0u8; 4096];
    loop {
        match session.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => body.extend_from_slice(&chunk[..n]),
            Err(Error::Timeout) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// In-memory session for parser tests across the crate
#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use crate::http::session::PollEvents;
    use std::time::Duration;

    pub(crate) struct MemorySession {
        data: Vec<u8>,
        pos: usize,
    }

    impl MemorySession {
        pub(crate) fn new(data: &[u8]) -> Self {
            MemorySession {
                data: data.to_vec(),
                pos: 0,
            }
        }

        pub(crate) fn remaining(&self) -> &[u8] {
            &self.data[self.pos..]
        }
    }

    impl SessionOps for MemorySession {
        fn poll(&self, _events: PollEvents, _timeout: Duration) -> crate::http::Result<bool> {
            Ok(true)
        }

        fn read(&mut self, buf: &mut [u8]) -> crate::http::Result<usize> {
            let n = buf.len().min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }

        fn write(&mut self, buf: &[u8]) -> crate::http::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> crate::http::Result<()> {
            Ok(())
        }

        fn close(&mut self) -> crate::http::Result<()> {
            Ok(())
        }
    }

    /// Parse a canned wire image into a response
    pub(crate) fn parse_bytes(input: &[u8]) -> Response {
        let mut session = HttpSession::new(MemorySession::new(input));
        read_response(&mut session, &ParseOptions::default()).unwrap()
    }
}
