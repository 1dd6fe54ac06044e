//! Shared helpers for integration tests

use std::collections::HashMap;
use std::io::Read;
use std::net::TcpStream;
use std::sync::Mutex;

use httpwire::CookieStore;
use url::Url;

/// One parsed inbound request as a test server sees it
pub struct ReceivedRequest {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ReceivedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Read one HTTP request off a stream: request line, headers, then a
/// Content-Length framed body if one is declared.
pub fn read_request<S: Read>(stream: &mut S) -> std::io::Result<ReceivedRequest> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte)?;
        if n == 0 {
            break;
        }
        head.push(byte[0]);
    }

    let text = String::from_utf8_lossy(&head);
    let mut lines = text.split("\r\n").filter(|l| !l.is_empty());
    let request_line = lines.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| {
            line.split_once(':')
                .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
        })
        .collect();

    let content_length = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("Content-Length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        stream.read_exact(&mut body)?;
    }

    Ok(ReceivedRequest {
        request_line,
        headers,
        body,
    })
}

pub fn read_tcp_request(stream: &mut TcpStream) -> ReceivedRequest {
    read_request(stream).expect("request read failed")
}

/// Minimal cookie store keyed by host
#[derive(Default)]
pub struct MemoryCookies {
    jar: Mutex<HashMap<String, Vec<String>>>,
}

impl CookieStore for MemoryCookies {
    fn cookie_header(&self, url: &Url) -> Option<String> {
        let host = url.host_str()?.to_string();
        let jar = self.jar.lock().unwrap();
        let cookies = jar.get(&host)?;
        if cookies.is_empty() {
            return None;
        }
        Some(cookies.join("; "))
    }

    fn set_cookies(&self, url: &Url, header_value: &str) {
        let Some(host) = url.host_str() else {
            return;
        };
        // Keep only the name=value pair ahead of any attributes
        let pair = header_value
            .split(';')
            .next()
            .unwrap_or(header_value)
            .trim()
            .to_string();
        self.jar
            .lock()
            .unwrap()
            .entry(host.to_string())
            .or_default()
            .push(pair);
    }
}
