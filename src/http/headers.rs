//! HTTP header collection
//!
//! Ordered, multi-valued headers with case-insensitive name lookups,
//! plus the fixed partition between message headers and body/content
//! headers that response parsing relies on.

use super::{Error, Result, MAX_HEADERS};
use std::fmt;

/// Header names that describe the body rather than the message.
///
/// The set mirrors the classic content-header partition; everything not
/// listed here is a message header.
const CONTENT_HEADERS: &[&str] = &[
    "Allow",
    "Content-Disposition",
    "Content-Encoding",
    "Content-Language",
    "Content-Length",
    "Content-Location",
    "Content-MD5",
    "Content-Range",
    "Content-Type",
    "Expires",
    "Last-Modified",
];

/// Whether a header belongs to the body/content partition
pub fn is_content_header(name: &str) -> bool {
    CONTENT_HEADERS.iter().any(|c| c.eq_ignore_ascii_case(name))
}

/// Ordered multi-valued header collection
///
/// Insertion order is preserved; a name inserted twice keeps both values
/// in arrival order. Lookups are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Headers {
            entries: Vec::new(),
        }
    }

    /// Append a header value.
    ///
    /// An existing header with the same name keeps its values; the new
    /// one is added after them in arrival order. Beyond `MAX_HEADERS`
    /// entries additional headers are dropped silently.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if self.entries.len() >= MAX_HEADERS {
            return;
        }
        self.entries.push((name.into(), value.into()));
    }

    /// First value for a name, if any
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for a name, in arrival order
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Whether any value of `name` contains `needle`, case-insensitively.
    ///
    /// Used for `Connection: close` / `Connection: Keep-Alive` probing
    /// where the header is a comma list of tokens.
    pub fn value_contains(&self, name: &str, needle: &str) -> bool {
        self.get_all(name).any(|v| {
            v.split(',')
                .any(|token| token.trim().eq_ignore_ascii_case(needle))
        })
    }

    /// Remove all values for a name, returning how many were removed
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Parse one `name: value` line
    pub fn parse_line(line: &str) -> Result<(String, String)> {
        let colon = line
            .find(':')
            .ok_or_else(|| Error::InvalidHeader(format!("No colon in header: {}", line)))?;
        let name = line[..colon].trim_end().to_string();
        if name.is_empty() {
            return Err(Error::InvalidHeader("Empty header name".to_string()));
        }
        let value = line[colon + 1..].trim().to_string();
        Ok((name, value))
    }

    /// Parse comma-separated `key=value` directives, as used by the
    /// `Keep-Alive` header. Keys are lowercased; a bare key maps to an
    /// empty value; unknown keys are the caller's concern.
    pub fn parse_directives(value: &str) -> Vec<(String, String)> {
        value
            .split(',')
            .map(|token| {
                let token = token.trim();
                match token.find('=') {
                    Some(eq) => (
                        token[..eq].trim().to_ascii_lowercase(),
                        token[eq + 1..].trim().to_string(),
                    ),
                    None => (token.to_ascii_lowercase(), String::new()),
                }
            })
            .filter(|(k, _)| !k.is_empty())
            .collect()
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/plain");
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/plain"));
        assert_eq!(headers.get("Missing"), None);
    }

    #[test]
    fn test_multi_value_order() {
        let mut headers = Headers::new();
        headers.insert("Warning", "first");
        headers.insert("Warning", "second");
        let all: Vec<_> = headers.get_all("warning").collect();
        assert_eq!(all, vec!["first", "second"]);
        assert_eq!(headers.get("Warning"), Some("first"));
    }

    #[test]
    fn test_remove() {
        let mut headers = Headers::new();
        headers.insert("X-A", "1");
        headers.insert("X-B", "2");
        headers.insert("x-a", "3");
        assert_eq!(headers.remove("X-A"), 2);
        assert!(!headers.contains("X-A"));
        assert!(headers.contains("X-B"));
    }

    #[test]
    fn test_value_contains_token() {
        let mut headers = Headers::new();
        headers.insert("Connection", "keep-alive, Upgrade");
        assert!(headers.value_contains("Connection", "Keep-Alive"));
        assert!(headers.value_contains("Connection", "upgrade"));
        assert!(!headers.value_contains("Connection", "close"));
    }

    #[test]
    fn test_parse_line() {
        let (name, value) = Headers::parse_line("Content-Length: 42").unwrap();
        assert_eq!(name, "Content-Length");
        assert_eq!(value, "42");

        let (name, value) = Headers::parse_line("X-Padded :  spaced  ").unwrap();
        assert_eq!(name, "X-Padded");
        assert_eq!(value, "spaced");

        assert!(Headers::parse_line("no colon here").is_err());
        assert!(Headers::parse_line(": empty name").is_err());
    }

    #[test]
    fn test_parse_directives() {
        let directives = Headers::parse_directives("timeout=15, max=100");
        assert_eq!(
            directives,
            vec![
                ("timeout".to_string(), "15".to_string()),
                ("max".to_string(), "100".to_string()),
            ]
        );

        // Unknown and bare keys survive; the caller filters
        let directives = Headers::parse_directives("FOO=bar, flag");
        assert_eq!(
            directives,
            vec![
                ("foo".to_string(), "bar".to_string()),
                ("flag".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_content_header_partition() {
        assert!(is_content_header("Content-Length"));
        assert!(is_content_header("content-type"));
        assert!(is_content_header("Last-Modified"));
        assert!(!is_content_header("Connection"));
        assert!(!is_content_header("Keep-Alive"));
    }

    #[test]
    fn test_max_headers_cap() {
        let mut headers = Headers::new();
        for i in 0..MAX_HEADERS + 5 {
            headers.insert(format!("X-{}", i), "v");
        }
        assert_eq!(headers.len(), MAX_HEADERS);
    }
}
