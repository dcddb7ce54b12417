//! HTTP header cache
//!
//! This module provides the multi-map used for request headers (and chunked
//! trailers) with case-insensitive lookups and support for multiple values
//! per header name.
//!
//! Names beginning with [`PRIVATE_PREFIX`] are internal annotations. They can
//! be looked up like any other field but are never enumerated or echoed back
//! to a client.

use super::{Error, Result};
use std::fmt;

/// Header names starting with this character are hidden from enumeration
pub const PRIVATE_PREFIX: char = ':';

/// HTTP header cache
///
/// Headers are stored in arrival order and support:
/// - Case-insensitive header name lookups
/// - Multiple values for the same header name, in arrival order
/// - Iteration over all public headers
#[derive(Debug, Clone, Default)]
pub struct Headers {
    headers: Vec<(String, String)>,
}

impl Headers {
    /// Create a new empty header cache
    pub fn new() -> Self {
        Headers {
            headers: Vec::new(),
        }
    }

    /// Insert a header
    ///
    /// If a header with the same name (case-insensitive) already exists,
    /// this adds another value rather than replacing it.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// Get the first value for a header (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get all values for a header (case-insensitive), in arrival order
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Iterate over the comma-separated tokens of every value of a header
    ///
    /// Tokens are trimmed and empty list elements are skipped.
    pub fn tokens<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .flat_map(|(_, v)| v.split(','))
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Count how many times a header appears
    pub fn count(&self, name: &str) -> usize {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .count()
    }

    /// Check if a header exists
    pub fn contains(&self, name: &str) -> bool {
        self.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Append folded continuation text to the most recently inserted header
    ///
    /// Returns false if there is no header to continue.
    pub fn continue_last(&mut self, text: &str) -> bool {
        match self.headers.last_mut() {
            Some((_, value)) => {
                let text = text.trim();
                if !text.is_empty() {
                    if !value.is_empty() {
                        value.push(' ');
                    }
                    value.push_str(text);
                }
                true
            }
            None => false,
        }
    }

    /// Get the number of headers
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Check if there are no headers
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Clear all headers
    pub fn clear(&mut self) {
        self.headers.clear();
    }

    /// Iterate over all public headers in arrival order
    ///
    /// Private annotations are skipped.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .filter(|(n, _)| !n.starts_with(PRIVATE_PREFIX))
            .map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Parse a header line into name and value
    pub fn parse_header_line(line: &str) -> Result<(String, String)> {
        if let Some(colon_pos) = line.find(':') {
            let name = &line[..colon_pos];
            let value = line[colon_pos + 1..].trim().to_string();

            if name.is_empty() {
                return Err(Error::InvalidHeader("Empty header name".to_string()));
            }
            if name.bytes().any(|b| b <= b' ' || b >= 0x7f) {
                return Err(Error::InvalidHeader(format!("Invalid header name: {}", name)));
            }

            Ok((name.to_string(), value))
        } else {
            Err(Error::InvalidHeader(format!("No colon in header: {}", line)))
        }
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.iter() {
            write!(f, "{}: {}\r\n", name, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/html");
        headers.insert("Content-Length", "42");

        assert_eq!(headers.get("Content-Type"), Some("text/html"));
        assert_eq!(headers.get("Content-Length"), Some("42"));
        assert_eq!(headers.get("Missing"), None);
    }

    #[test]
    fn test_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/html");

        assert_eq!(headers.get("content-type"), Some("text/html"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/html"));
        assert_eq!(headers.get("CoNtEnT-TyPe"), Some("text/html"));
    }

    #[test]
    fn test_multiple_values_keep_arrival_order() {
        let mut headers = Headers::new();
        headers.insert("Accept", "text/html");
        headers.insert("Host", "example.com");
        headers.insert("accept", "text/plain");

        assert_eq!(headers.get_all("ACCEPT"), vec!["text/html", "text/plain"]);
        assert_eq!(headers.count("Accept"), 2);
        assert!(headers.get_all("Missing").is_empty());
    }

    #[test]
    fn test_tokens() {
        let mut headers = Headers::new();
        headers.insert("Connection", "keep-alive, Upgrade");
        headers.insert("Connection", " close ,,");

        let tokens: Vec<_> = headers.tokens("connection").collect();
        assert_eq!(tokens, vec!["keep-alive", "Upgrade", "close"]);
    }

    #[test]
    fn test_private_headers_hidden() {
        let mut headers = Headers::new();
        headers.insert("Host", "example.com");
        headers.insert(":version", "HTTP/1.1");

        assert_eq!(headers.get(":version"), Some("HTTP/1.1"));
        let collected: Vec<_> = headers.iter().collect();
        assert_eq!(collected, vec![("Host", "example.com")]);
        assert_eq!(headers.to_string(), "Host: example.com\r\n");
    }

    #[test]
    fn test_continue_last() {
        let mut headers = Headers::new();
        assert!(!headers.continue_last("orphan"));

        headers.insert("X-Folded", "first");
        assert!(headers.continue_last("   second"));
        assert_eq!(headers.get("X-Folded"), Some("first second"));
    }

    #[test]
    fn test_parse_header_line() {
        let (name, value) = Headers::parse_header_line("Content-Type: text/html").unwrap();
        assert_eq!(name, "Content-Type");
        assert_eq!(value, "text/html");

        let (name, value) = Headers::parse_header_line("X-Custom:  value  ").unwrap();
        assert_eq!(name, "X-Custom");
        assert_eq!(value, "value");

        assert!(Headers::parse_header_line("Invalid").is_err());
        assert!(Headers::parse_header_line(": value").is_err());
        assert!(Headers::parse_header_line("Bad Name: value").is_err());
    }
}
