//! Outgoing request description.

use std::{
    net::{SocketAddr, ToSocketAddrs},
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use http::Method;
use url::Url;

use super::ClientError;
use crate::{
    codec::{BodyFraming, encode_request_head},
    headers::{self, Headers},
};

/// A request to be executed by [`HttpClient`](super::HttpClient).
///
/// ```
/// use http::Method;
/// use httpwire::client::ClientRequest;
///
/// let req = ClientRequest::new(Method::POST, "http://example.com/items?x=1")
///     .unwrap()
///     .with_header("Content-Type", "application/json")
///     .with_body("{}");
/// assert_eq!(req.target(), "/items?x=1");
/// ```
#[derive(Clone, Debug)]
pub struct ClientRequest {
    method: Method,
    url: Url,
    headers: Headers,
    body: Bytes,
    timeout: Option<Duration>,
}

impl ClientRequest {
    /// Build a request for `url`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidUrl`] if `url` does not parse.
    pub fn new(method: Method, url: &str) -> Result<Self, ClientError> {
        Ok(Self {
            method,
            url: Url::parse(url)?,
            headers: Headers::new(),
            body: Bytes::new(),
            timeout: None,
        })
    }

    /// Shorthand for a `GET`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidUrl`] if `url` does not parse.
    pub fn get(url: &str) -> Result<Self, ClientError> { Self::new(Method::GET, url) }

    /// Add or replace a header. `Content-Length` is always derived from the
    /// body.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Override the client's idle timeout for this exchange.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn method(&self) -> &Method { &self.method }

    #[must_use]
    pub fn url(&self) -> &Url { &self.url }

    #[must_use]
    pub fn headers(&self) -> &Headers { &self.headers }

    #[must_use]
    pub fn body(&self) -> &Bytes { &self.body }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> { self.timeout }

    /// Request target: the path plus any query string.
    #[must_use]
    pub fn target(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{query}", self.url.path()),
            None => self.url.path().to_owned(),
        }
    }

    /// Resolve the URL's host to a socket address.
    pub(crate) fn resolve(&self) -> Result<SocketAddr, ClientError> {
        if self.url.scheme() != "http" {
            return Err(ClientError::UnsupportedScheme(self.url.scheme().to_owned()));
        }
        let host = self.url.host_str().ok_or_else(|| ClientError::Resolve {
            host: String::new(),
            source: None,
        })?;
        let port = self.url.port_or_known_default().unwrap_or(80);
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let mut addrs = (host, port)
            .to_socket_addrs()
            .map_err(|source| ClientError::Resolve {
                host: host.to_owned(),
                source: Some(source),
            })?;
        addrs.next().ok_or_else(|| ClientError::Resolve {
            host: host.to_owned(),
            source: None,
        })
    }

    fn host_header(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        }
    }

    /// Serialise head and body, filling in `Host`, `Accept`, `User-Agent`
    /// and `Connection` where the caller did not.
    pub(crate) fn encode(&self, user_agent: &str, keep_alive: bool) -> Vec<Bytes> {
        let mut headers = self.headers.clone();
        if !headers.contains(headers::HOST) {
            headers.insert(headers::HOST, self.host_header());
        }
        if !headers.contains("accept") {
            headers.insert("accept", "*/*");
        }
        if !user_agent.is_empty() && !headers.contains("user-agent") {
            headers.insert("user-agent", user_agent);
        }
        if !keep_alive && !headers.contains(headers::CONNECTION) {
            headers.insert(headers::CONNECTION, "close");
        }
        let framing = if self.body.is_empty() && !method_expects_body(&self.method) {
            BodyFraming::UntilClose
        } else {
            BodyFraming::Length(self.body.len() as u64)
        };
        let mut head = BytesMut::new();
        encode_request_head(&mut head, &self.method, &self.target(), &headers, framing);
        let mut out = vec![head.freeze()];
        if !self.body.is_empty() {
            out.push(self.body.clone());
        }
        out
    }

    /// Whether the caller asked for the connection to close.
    pub(crate) fn wants_close(&self) -> bool { self.headers.has_token(headers::CONNECTION, "close") }
}

fn method_expects_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}
