//! Decoded HTTP messages.
//!
//! A [`Message`] is produced by [`MessageDecoder`](crate::codec::MessageDecoder)
//! once a request or response has been fully read. The same type carries both
//! directions; the [`Head`] distinguishes them.

use bytes::Bytes;
use http::{Method, StatusCode, Version};

use crate::headers::{self, Headers};

/// Start line of a request: `METHOD target VERSION`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestHead {
    pub method: Method,
    pub target: String,
    pub version: Version,
}

/// Status line of a response: `VERSION code reason`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseHead {
    pub version: Version,
    pub status: StatusCode,
    pub reason: String,
}

/// The parsed initial line of either message kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Head {
    Request(RequestHead),
    Response(ResponseHead),
}

impl Head {
    /// Protocol version named on the initial line.
    #[must_use]
    pub fn version(&self) -> Version {
        match self {
            Head::Request(head) => head.version,
            Head::Response(head) => head.version,
        }
    }
}

/// A complete HTTP message: initial line, headers and body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    head: Head,
    headers: Headers,
    body: Bytes,
}

impl Message {
    #[must_use]
    pub fn new(head: Head, headers: Headers, body: Bytes) -> Self {
        Self {
            head,
            headers,
            body,
        }
    }

    #[must_use]
    pub fn head(&self) -> &Head { &self.head }

    #[must_use]
    pub fn headers(&self) -> &Headers { &self.headers }

    pub fn headers_mut(&mut self) -> &mut Headers { &mut self.headers }

    #[must_use]
    pub fn body(&self) -> &Bytes { &self.body }

    #[must_use]
    pub fn into_body(self) -> Bytes { self.body }

    #[must_use]
    pub fn into_parts(self) -> (Head, Headers, Bytes) { (self.head, self.headers, self.body) }

    #[must_use]
    pub fn version(&self) -> Version { self.head.version() }

    /// Request method, or `None` for responses.
    #[must_use]
    pub fn method(&self) -> Option<&Method> {
        match &self.head {
            Head::Request(head) => Some(&head.method),
            Head::Response(_) => None,
        }
    }

    /// Raw request target including any query string.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        match &self.head {
            Head::Request(head) => Some(&head.target),
            Head::Response(_) => None,
        }
    }

    /// Request path with the query string removed.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.target()
            .map(|target| target.split_once('?').map_or(target, |(path, _)| path))
    }

    /// Query string following the first `?`, if any.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.target()
            .and_then(|target| target.split_once('?').map(|(_, query)| query))
    }

    /// Response status, or `None` for requests.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match &self.head {
            Head::Request(_) => None,
            Head::Response(head) => Some(head.status),
        }
    }

    /// Whether the connection may carry another message after this one.
    ///
    /// HTTP/1.1 defaults to persistent unless `Connection: close` is sent;
    /// HTTP/1.0 is persistent only with an explicit `Connection: keep-alive`.
    #[must_use]
    pub fn keep_alive(&self) -> bool {
        if self.headers.has_token(headers::CONNECTION, "close") {
            return false;
        }
        self.version() == Version::HTTP_11
            || self.headers.has_token(headers::CONNECTION, "keep-alive")
    }

    /// Whether this request asks to switch to the WebSocket protocol.
    #[must_use]
    pub fn is_websocket_upgrade(&self) -> bool {
        self.headers.has_token(headers::UPGRADE, "websocket")
    }

    /// Whether the sender waits for `100 Continue` before sending a body.
    #[must_use]
    pub fn expects_continue(&self) -> bool {
        expects_continue(self.version(), &self.headers)
    }

    /// `Host` header value.
    #[must_use]
    pub fn host(&self) -> Option<&str> { self.headers.get(headers::HOST) }

    /// Media type portion of `Content-Type`, without parameters.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(headers::CONTENT_TYPE)
            .map(|value| value.split(';').next().unwrap_or(value).trim())
    }

    /// `charset` parameter of `Content-Type`.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.headers.get(headers::CONTENT_TYPE).and_then(|value| {
            value.split(';').skip(1).find_map(|param| {
                let (key, val) = param.split_once('=')?;
                key.trim()
                    .eq_ignore_ascii_case("charset")
                    .then(|| val.trim().trim_matches('"'))
            })
        })
    }
}

pub(crate) fn expects_continue(version: Version, headers: &Headers) -> bool {
    version == Version::HTTP_11 && headers.has_token(headers::EXPECT, "100-continue")
}
