//! Handles through which application code answers requests and talks on
//! upgraded WebSocket connections.
//!
//! All of these may be moved to and used from any thread.

use std::{fmt, net::SocketAddr, sync::Arc, thread};

use bytes::{Bytes, BytesMut};
use http::{StatusCode, Version};

use super::{
    command::{Command, ConnRef, ReactorHandle},
    handler::{Body, Response},
};
use crate::{
    codec::{BodyFraming, LAST_CHUNK, ResponseContext, encode_response, encode_response_head},
    headers::Headers,
    websocket::{Endpoint, Frame, FrameEncoder},
};

/// One-shot channel for the response to a single request.
///
/// Consuming methods guarantee at most one response. Dropping the sink
/// without answering sends `404 Not Found`, or `500` when the drop happens
/// while the worker is unwinding from a panic.
pub struct ResponseSink {
    conn: ConnRef,
    seq: u64,
    reactor: ReactorHandle,
    version: Version,
    keep_alive: bool,
    head_request: bool,
    server_name: Arc<str>,
    upgrade_key: Option<String>,
    answered: bool,
}

pub(crate) struct SinkParts {
    pub(crate) conn: ConnRef,
    pub(crate) seq: u64,
    pub(crate) version: Version,
    pub(crate) keep_alive: bool,
    pub(crate) head_request: bool,
    pub(crate) upgrade_key: Option<String>,
}

impl ResponseSink {
    pub(crate) fn new(parts: SinkParts, reactor: ReactorHandle, server_name: Arc<str>) -> Self {
        Self {
            conn: parts.conn,
            seq: parts.seq,
            reactor,
            version: parts.version,
            keep_alive: parts.keep_alive,
            head_request: parts.head_request,
            server_name,
            upgrade_key: parts.upgrade_key,
            answered: false,
        }
    }

    /// Whether the connection will stay open after this response.
    #[must_use]
    pub fn keep_alive(&self) -> bool { self.keep_alive }

    /// Whether the request asked to switch to WebSocket.
    #[must_use]
    pub fn is_upgrade(&self) -> bool { self.upgrade_key.is_some() }

    /// Send a complete response.
    pub fn send(mut self, response: Response) {
        self.answered = true;
        let Response {
            status,
            headers,
            body,
        } = response;
        let body = match body.into_bytes() {
            Ok(body) => body,
            Err(err) => {
                tracing::error!(error = %err, "failed to read response body");
                self.keep_alive = false;
                self.write_complete(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &Headers::new(),
                    Bytes::from_static(b"Internal Server Error"),
                );
                return;
            }
        };
        self.write_complete(status, &headers, body);
    }

    /// Shorthand for [`send`](Self::send).
    pub fn run(self, status: StatusCode, headers: Headers, body: impl Into<Body>) {
        self.send(Response {
            status,
            headers,
            body: body.into(),
        });
    }

    /// Send the head now and stream the body in pieces.
    ///
    /// HTTP/1.1 peers receive a chunked body. HTTP/1.0 peers receive the raw
    /// bytes and the connection closes when the stream finishes.
    #[must_use]
    pub fn stream(mut self, status: StatusCode, headers: &Headers) -> ResponseStream {
        self.answered = true;
        let chunked = self.version == Version::HTTP_11;
        let keep_alive = self.keep_alive && chunked;
        let framing = if chunked {
            BodyFraming::Chunked
        } else {
            BodyFraming::UntilClose
        };
        let mut head = BytesMut::new();
        encode_response_head(
            &mut head,
            status,
            headers,
            framing,
            &ResponseContext {
                version: self.version,
                keep_alive,
                server_name: &self.server_name,
            },
        );
        self.submit(vec![head.freeze()], false, keep_alive);
        ResponseStream {
            conn: self.conn,
            seq: self.seq,
            reactor: self.reactor.clone(),
            chunked: chunked && !self.head_request,
            discard: self.head_request,
            keep_alive,
            finished: false,
        }
    }

    /// Accept a WebSocket upgrade and hand the connection to `handler`.
    ///
    /// Returns `false` and answers `400` if the request was not a valid
    /// upgrade.
    pub fn upgrade(mut self, handler: impl WebSocketHandler) -> bool {
        let Some(key) = self.upgrade_key.take() else {
            self.send(Response::text(
                StatusCode::BAD_REQUEST,
                "Not a WebSocket upgrade",
            ));
            return false;
        };
        self.answered = true;
        self.reactor.send(Command::Upgrade {
            conn: self.conn,
            seq: self.seq,
            key,
            handler: Arc::new(handler),
        })
    }

    fn write_complete(&self, status: StatusCode, headers: &Headers, body: Bytes) {
        let ctx = ResponseContext {
            version: self.version,
            keep_alive: self.keep_alive,
            server_name: &self.server_name,
        };
        let mut buffers = encode_response(status, headers, body, &ctx);
        if self.head_request {
            buffers.truncate(1);
        }
        self.submit(buffers, true, self.keep_alive);
    }

    fn submit(&self, buffers: Vec<Bytes>, last: bool, keep_alive: bool) {
        self.reactor.send(Command::Respond {
            conn: self.conn,
            seq: self.seq,
            buffers,
            last,
            keep_alive,
        });
    }
}

impl Drop for ResponseSink {
    fn drop(&mut self) {
        if self.answered {
            return;
        }
        self.answered = true;
        let (status, text): (_, &'static [u8]) = if thread::panicking() {
            (StatusCode::INTERNAL_SERVER_ERROR, b"Internal Server Error")
        } else {
            (StatusCode::NOT_FOUND, b"Not Found")
        };
        self.write_complete(status, &Headers::new(), Bytes::from_static(text));
    }
}

impl fmt::Debug for ResponseSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseSink")
            .field("seq", &self.seq)
            .field("version", &self.version)
            .field("keep_alive", &self.keep_alive)
            .finish_non_exhaustive()
    }
}

/// Body writer returned by [`ResponseSink::stream`].
///
/// Dropping the stream finishes the response.
pub struct ResponseStream {
    conn: ConnRef,
    seq: u64,
    reactor: ReactorHandle,
    chunked: bool,
    discard: bool,
    keep_alive: bool,
    finished: bool,
}

impl ResponseStream {
    /// Queue `data` as the next piece of the body. Empty pieces are skipped.
    ///
    /// Returns `false` once the server has stopped.
    pub fn send(&self, data: impl Into<Bytes>) -> bool {
        let data = data.into();
        if data.is_empty() || self.discard {
            return true;
        }
        let buffers = if self.chunked {
            vec![
                Bytes::from(format!("{:x}\r\n", data.len())),
                data,
                Bytes::from_static(b"\r\n"),
            ]
        } else {
            vec![data]
        };
        self.reactor.send(Command::Respond {
            conn: self.conn,
            seq: self.seq,
            buffers,
            last: false,
            keep_alive: self.keep_alive,
        })
    }

    /// Terminate the body.
    pub fn finish(mut self) { self.close(); }

    fn close(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let buffers = if self.chunked {
            vec![Bytes::from_static(LAST_CHUNK)]
        } else {
            Vec::new()
        };
        self.reactor.send(Command::Respond {
            conn: self.conn,
            seq: self.seq,
            buffers,
            last: true,
            keep_alive: self.keep_alive,
        });
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) { self.close(); }
}

/// A complete WebSocket data message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WsMessage {
    Text(String),
    Binary(Bytes),
}

/// Callbacks for an upgraded connection.
///
/// Calls for one connection run one at a time, in arrival order, on the
/// worker pool.
pub trait WebSocketHandler: Send + Sync + 'static {
    fn on_open(&self, channel: &WebSocketChannel) { let _ = channel; }

    fn on_message(&self, channel: &WebSocketChannel, message: WsMessage);

    /// Called once, after the connection is closed. `code` is the one the
    /// peer sent, or [`CloseCode::ABNORMAL`](crate::websocket::CloseCode::ABNORMAL)
    /// if the connection ended without a close frame from the peer. When the
    /// worker pool is full the call is retried on the next idle sweep.
    fn on_close(&self, channel: &WebSocketChannel, code: u16) { let _ = (channel, code); }
}

/// Outgoing side of an upgraded connection.
#[derive(Clone)]
pub struct WebSocketChannel {
    conn: ConnRef,
    reactor: ReactorHandle,
    peer_addr: SocketAddr,
}

impl WebSocketChannel {
    pub(crate) fn new(conn: ConnRef, reactor: ReactorHandle, peer_addr: SocketAddr) -> Self {
        Self {
            conn,
            reactor,
            peer_addr,
        }
    }

    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr { self.peer_addr }

    pub fn send_text(&self, text: impl Into<String>) -> bool { self.send(&Frame::text(text)) }

    pub fn send_binary(&self, data: impl Into<Bytes>) -> bool { self.send(&Frame::binary(data)) }

    /// Queue an arbitrary frame. Returns `false` once the server has stopped.
    pub fn send(&self, frame: &Frame) -> bool { self.write(frame, false) }

    /// Send a close frame; the connection closes once it is written.
    pub fn close(&self, code: u16) -> bool { self.write(&Frame::close(code, ""), true) }

    fn write(&self, frame: &Frame, close: bool) -> bool {
        let mut buf = BytesMut::new();
        FrameEncoder::new(Endpoint::Server).encode_into(frame, &mut buf);
        self.reactor.send(Command::Frame {
            conn: self.conn,
            frame: buf.freeze(),
            close,
        })
    }
}

impl fmt::Debug for WebSocketChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketChannel")
            .field("peer_addr", &self.peer_addr)
            .finish_non_exhaustive()
    }
}
