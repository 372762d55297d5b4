//! Header-block parsing for entry and category files.
//!
//! Content files are RFC 822 style messages: a block of `Name: value` lines,
//! a blank line, then the payload.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

static HEADER_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([!-9;-~]+):[ \t]*(.*)$").unwrap());

/// A parsed content file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    headers: Vec<(String, String)>,
    body: String,
}

impl Message {
    /// Parse a message from text
    ///
    /// ```
    /// use publ_core::headers::Message;
    ///
    /// let msg = Message::parse("Title: Hello\nTags: a\nTags: b\n\nBody text\n");
    /// assert_eq!(msg.get("title"), Some("Hello"));
    /// assert_eq!(msg.get_all("Tags"), vec!["a", "b"]);
    /// assert_eq!(msg.body(), "Body text\n");
    /// ```
    pub fn parse(text: &str) -> Self {
        let mut headers: Vec<(String, String)> = Vec::new();
        let mut rest = text;

        loop {
            if rest.is_empty() {
                break;
            }

            let (line, remainder) = match rest.find('\n') {
                Some(pos) => (&rest[..pos], &rest[pos + 1..]),
                None => (rest, ""),
            };
            let line = line.strip_suffix('\r').unwrap_or(line);

            if line.is_empty() {
                rest = remainder;
                break;
            }

            if line.starts_with([' ', '\t']) {
                match headers.last_mut() {
                    Some((_, value)) => {
                        let continued = line.trim();
                        if !continued.is_empty() {
                            if !value.is_empty() {
                                value.push(' ');
                            }
                            value.push_str(continued);
                        }
                        rest = remainder;
                        continue;
                    }
                    // Leading whitespace with no header: this is all body
                    None => break,
                }
            }

            match HEADER_LINE.captures(line) {
                Some(caps) => {
                    headers.push((caps[1].to_string(), caps[2].trim_end().to_string()));
                    rest = remainder;
                }
                None => break,
            }
        }

        // Nothing header-like at the top: the whole file is the payload
        if headers.is_empty() {
            return Self {
                headers,
                body: text.to_string(),
            };
        }

        Self {
            headers,
            body: rest.to_string(),
        }
    }

    /// Read and parse a message from disk
    pub fn from_file(path: &Path) -> Result<Self, HeaderError> {
        let text = std::fs::read_to_string(path).map_err(|source| HeaderError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::parse(&text))
    }

    /// First value of a header, compared case-insensitively
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value of a header, in file order
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Append a header, keeping existing values
    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        self.headers.push((name.to_string(), value.into()));
    }

    /// Remove every value of a header
    pub fn remove(&mut self, name: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    /// Replace a header with a single value
    ///
    /// The first existing occurrence keeps its position; a new header is appended.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .headers
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            Some(pos) => {
                self.headers[pos].1 = value;
                let mut index = 0;
                self.headers.retain(|(k, _)| {
                    let keep = index <= pos || !k.eq_ignore_ascii_case(name);
                    index += 1;
                    keep
                });
            }
            None => self.add(name, value),
        }
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.headers {
            writeln!(f, "{}: {}", name, value)?;
        }
        if !self.headers.is_empty() {
            writeln!(f)?;
        }
        f.write_str(&self.body)
    }
}
