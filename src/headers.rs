//! Header storage shared by requests and responses.
//!
//! Names are folded to lowercase on insertion and lookup, so `Content-Length`,
//! `content-length` and `CONTENT-LENGTH` address the same entry. The wire
//! format does not define semantics for repeated keys here, so the last value
//! written wins.

use std::{
    borrow::Cow,
    collections::{BTreeMap, btree_map},
};

/// Lowercase name of the `Content-Length` header.
pub const CONTENT_LENGTH: &str = "content-length";
/// Lowercase name of the `Transfer-Encoding` header.
pub const TRANSFER_ENCODING: &str = "transfer-encoding";
/// Lowercase name of the `Connection` header.
pub const CONNECTION: &str = "connection";
/// Lowercase name of the `Content-Type` header.
pub const CONTENT_TYPE: &str = "content-type";
/// Lowercase name of the `Upgrade` header.
pub const UPGRADE: &str = "upgrade";
/// Lowercase name of the `Expect` header.
pub const EXPECT: &str = "expect";
/// Lowercase name of the `Host` header.
pub const HOST: &str = "host";
/// Lowercase name of the `X-Forwarded-For` header.
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
/// Lowercase name of the `X-Forwarded-Proto` header.
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
/// Lowercase name of the `X-Forwarded-Port` header.
pub const X_FORWARDED_PORT: &str = "x-forwarded-port";

/// Case-insensitive header map with last-write-wins semantics.
///
/// # Examples
///
/// ```
/// use httpwire::headers::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Content-Length", "10");
/// headers.insert("CONTENT-LENGTH", "12");
/// assert_eq!(headers.get("content-length"), Some("12"));
/// assert_eq!(headers.len(), 1);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers {
    entries: BTreeMap<String, String>,
}

fn fold(name: &str) -> Cow<'_, str> {
    if name.bytes().any(|b| b.is_ascii_uppercase()) {
        Cow::Owned(name.to_ascii_lowercase())
    } else {
        Cow::Borrowed(name)
    }
}

impl Headers {
    /// Create an empty header map.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Insert a header, returning the value it replaced.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) -> Option<String> {
        self.entries.insert(fold(name).into_owned(), value.into())
    }

    /// Builder-style variant of [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Look up a header by name, ignoring case.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(fold(name).as_ref()).map(String::as_str)
    }

    /// Returns `true` when the header is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool { self.entries.contains_key(fold(name).as_ref()) }

    /// Remove a header, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries.remove(fold(name).as_ref())
    }

    /// Number of distinct header names.
    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    /// Returns `true` when no headers are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Remove every header.
    pub fn clear(&mut self) { self.entries.clear(); }

    /// Iterate over `(lowercase name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns `true` when the comma-separated header value contains `token`,
    /// compared case-insensitively.
    ///
    /// ```
    /// use httpwire::headers::Headers;
    ///
    /// let headers = Headers::new().with("Connection", "keep-alive, Upgrade");
    /// assert!(headers.has_token("connection", "upgrade"));
    /// assert!(!headers.has_token("connection", "close"));
    /// ```
    #[must_use]
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get(name).is_some_and(|value| {
            value
                .split(',')
                .any(|part| part.trim().eq_ignore_ascii_case(token))
        })
    }

    /// Returns `true` when the final transfer coding is `chunked`.
    #[must_use]
    pub fn is_chunked(&self) -> bool {
        self.get(TRANSFER_ENCODING)
            .and_then(|value| value.rsplit(',').next())
            .is_some_and(|last| last.trim().eq_ignore_ascii_case("chunked"))
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a String, &'a String);
    type IntoIter = btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter { self.entries.iter() }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        headers.extend(iter);
        headers
    }
}

impl<K: AsRef<str>, V: Into<String>> Extend<(K, V)> for Headers {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (name, value) in iter {
            self.insert(name.as_ref(), value);
        }
    }
}

/// Split a raw header line at its first `:` into trimmed name and value.
///
/// Returns `None` when the line has no colon or an empty name.
#[must_use]
pub fn split_header_line(line: &str) -> Option<(&str, &str)> {
    let (name, value) = line.split_once(':')?;
    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }
    Some((name, value.trim()))
}

/// Convert a lowercase header name into its conventional wire casing.
///
/// ```
/// use httpwire::headers::canonical_name;
///
/// assert_eq!(canonical_name("content-type"), "Content-Type");
/// assert_eq!(canonical_name("x-forwarded-for"), "X-Forwarded-For");
/// ```
#[must_use]
pub fn canonical_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for ch in name.chars() {
        if upper {
            out.push(ch.to_ascii_uppercase());
        } else {
            out.push(ch.to_ascii_lowercase());
        }
        upper = ch == '-';
    }
    out
}
