//! Application-facing request, response and handler types.

use std::{
    fmt,
    fs,
    io::{self, Read},
    net::SocketAddr,
    ops::Deref,
    path::PathBuf,
};

use bytes::Bytes;
use http::StatusCode;

use super::sink::ResponseSink;
use crate::{
    headers::{self, Headers},
    message::Message,
};

/// A decoded request together with connection details.
#[derive(Debug)]
pub struct Request {
    message: Message,
    peer_addr: SocketAddr,
}

impl Request {
    pub(crate) fn new(message: Message, peer_addr: SocketAddr) -> Self {
        Self { message, peer_addr }
    }

    /// Address of the TCP peer.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr { self.peer_addr }

    /// Client address, preferring the first `X-Forwarded-For` entry over the
    /// TCP peer.
    #[must_use]
    pub fn remote_addr(&self) -> String {
        self.message
            .headers()
            .get(headers::X_FORWARDED_FOR)
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .map_or_else(|| self.peer_addr.ip().to_string(), str::to_owned)
    }

    #[must_use]
    pub fn into_message(self) -> Message { self.message }
}

impl Deref for Request {
    type Target = Message;

    fn deref(&self) -> &Message { &self.message }
}

/// Response body source.
///
/// Files and readers are consumed on the worker thread before anything is
/// queued for writing, so a read error still produces a `500`.
pub enum Body {
    Empty,
    Bytes(Bytes),
    File(PathBuf),
    Reader(Box<dyn Read + Send>),
}

impl Body {
    pub(crate) fn into_bytes(self) -> io::Result<Bytes> {
        match self {
            Body::Empty => Ok(Bytes::new()),
            Body::Bytes(bytes) => Ok(bytes),
            Body::File(path) => fs::read(path).map(Bytes::from),
            Body::Reader(mut reader) => {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf)?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            Body::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Body::File(path) => f.debug_tuple("File").field(path).finish(),
            Body::Reader(_) => f.write_str("Reader"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self { Body::Bytes(bytes) }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self { Body::Bytes(bytes.into()) }
}

impl From<String> for Body {
    fn from(text: String) -> Self { Body::Bytes(text.into()) }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self { Body::Bytes(Bytes::from_static(text.as_bytes())) }
}

/// Status, headers and body produced by a handler.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: Headers,
    pub body: Body,
}

impl Response {
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Body::Empty,
        }
    }

    /// `200 OK` with the given body.
    #[must_use]
    pub fn ok(body: impl Into<Body>) -> Self { Self::new(StatusCode::OK).with_body(body) }

    /// Plain-text response.
    #[must_use]
    pub fn text(status: StatusCode, text: impl Into<String>) -> Self {
        Self::new(status)
            .with_header(headers::CONTENT_TYPE, "text/plain; charset=utf-8")
            .with_body(text.into())
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }
}

/// Application entry point, called on a worker thread for each request.
///
/// The handler owns the [`ResponseSink`] and may answer immediately or keep
/// it and answer later from another thread. Dropping the sink unanswered
/// sends `404`; a panic while holding it sends `500`.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: Request, sink: ResponseSink);
}

impl<F> Handler for F
where
    F: Fn(Request, ResponseSink) + Send + Sync + 'static,
{
    fn handle(&self, request: Request, sink: ResponseSink) { self(request, sink); }
}

/// Handler built from a function returning the response directly.
pub struct Respond<F>(F);

/// Wrap a synchronous function as a [`Handler`]. Returning `None` yields
/// `404 Not Found`.
///
/// ```no_run
/// use httpwire::server::{HttpServer, Response, respond};
///
/// let server = HttpServer::new(respond(|req| {
///     (req.path() == Some("/")).then(|| Response::ok("hello"))
/// }));
/// ```
pub fn respond<F>(f: F) -> Respond<F>
where
    F: Fn(&Request) -> Option<Response> + Send + Sync + 'static,
{
    Respond(f)
}

impl<F> Handler for Respond<F>
where
    F: Fn(&Request) -> Option<Response> + Send + Sync + 'static,
{
    fn handle(&self, request: Request, sink: ResponseSink) {
        if let Some(response) = (self.0)(&request) {
            sink.send(response);
        }
    }
}
