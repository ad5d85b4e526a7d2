//! Helpers shared by the integration tests.
//!
//! Responses are read back with the crate's own [`MessageDecoder`] over a
//! blocking socket, so tests assert on parsed messages rather than raw text.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::{
    io::{self, Read, Write},
    net::{Ipv4Addr, SocketAddr, TcpStream},
    time::Duration,
};

use bytes::BytesMut;
use httpwire::{
    codec::{DecodeState, MessageDecoder, Role},
    message::Message,
    server::{Handler, HttpServer, ServerHandle},
};

pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

pub fn loopback() -> SocketAddr { SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0) }

/// Bind `server` to an ephemeral loopback port and start it.
pub fn start(server: HttpServer) -> ServerHandle {
    server
        .bind(loopback())
        .expect("bind loopback")
        .start()
        .expect("start server")
}

/// Start a server with test-friendly defaults around `handler`.
pub fn serve(handler: impl Handler) -> ServerHandle {
    start(HttpServer::new(handler).workers(4))
}

/// Blocking connection that reads responses with [`MessageDecoder`].
pub struct RawConn {
    stream: TcpStream,
    buf: BytesMut,
    decoder: MessageDecoder,
}

impl RawConn {
    pub fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("connect");
        stream
            .set_read_timeout(Some(READ_TIMEOUT))
            .expect("set read timeout");
        Self {
            stream,
            buf: BytesMut::new(),
            decoder: MessageDecoder::new(Role::Response, 8192, 1 << 20),
        }
    }

    pub fn send(&mut self, bytes: impl AsRef<[u8]>) {
        self.stream.write_all(bytes.as_ref()).expect("write request");
    }

    pub fn get(&mut self, path: &str) -> Message {
        self.send(format!("GET {path} HTTP/1.1\r\nHost: test\r\n\r\n"));
        self.response()
    }

    /// Read the next response.
    pub fn response(&mut self) -> Message { self.read_message(false) }

    /// Read the next response, which answers a `HEAD` request.
    pub fn head_response(&mut self) -> Message { self.read_message(true) }

    fn read_message(&mut self, head: bool) -> Message {
        self.decoder.reset();
        self.decoder.expect_no_body(head);
        loop {
            if !self.buf.is_empty() {
                let state = self.decoder.decode(&mut self.buf).expect("valid response");
                if state == DecodeState::AllRead {
                    return self.decoder.take_message().expect("complete message");
                }
            }
            let mut chunk = [0_u8; 4096];
            let n = self.stream.read(&mut chunk).expect("read response");
            if n == 0 {
                let state = self.decoder.decode_eof().expect("complete response");
                assert_eq!(state, DecodeState::AllRead, "connection closed early");
                return self.decoder.take_message().expect("complete message");
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Returns `true` if the server closed the connection with no further
    /// bytes.
    pub fn is_closed(&mut self) -> bool {
        if !self.buf.is_empty() {
            return false;
        }
        let mut chunk = [0_u8; 64];
        match self.stream.read(&mut chunk) {
            Ok(n) => n == 0,
            Err(err) => err.kind() == io::ErrorKind::ConnectionReset,
        }
    }

    pub fn stream(&mut self) -> &mut TcpStream { &mut self.stream }
}

pub fn status(message: &Message) -> u16 {
    message.status().expect("response status").as_u16()
}

pub fn body_text(message: &Message) -> String {
    String::from_utf8_lossy(message.body()).into_owned()
}
