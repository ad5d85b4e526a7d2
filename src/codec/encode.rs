//! Serialisation of outgoing HTTP/1.x heads and chunked bodies.

use std::{fmt::Write as _, io, time::SystemTime};

use bytes::{BufMut, Bytes, BytesMut};
use http::{Method, StatusCode, Version};
use tokio_util::codec::Encoder;

use crate::headers::{self, Headers, canonical_name};

/// Terminating zero-length chunk with an empty trailer section.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// How an outgoing body is delimited on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyFraming {
    /// `Content-Length` with the given byte count.
    Length(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// No length header; the body ends when the connection closes.
    UntilClose,
}

/// Connection details that shape a response head.
#[derive(Clone, Copy, Debug)]
pub struct ResponseContext<'a> {
    /// Version of the request being answered.
    pub version: Version,
    /// Whether the connection stays open after this response.
    pub keep_alive: bool,
    /// Value for the `Server` header; empty to omit it.
    pub server_name: &'a str,
}

fn put_header(dst: &mut BytesMut, name: &str, value: &str) {
    dst.put_slice(canonical_name(name).as_bytes());
    dst.put_slice(b": ");
    dst.put_slice(value.as_bytes());
    dst.put_slice(b"\r\n");
}

fn put_user_headers(dst: &mut BytesMut, headers: &Headers) {
    for (name, value) in headers.iter() {
        if name == headers::CONTENT_LENGTH || name == headers::TRANSFER_ENCODING {
            continue;
        }
        put_header(dst, name, value);
    }
}

fn put_framing(dst: &mut BytesMut, framing: BodyFraming) {
    match framing {
        BodyFraming::Length(len) => {
            let mut digits = String::with_capacity(20);
            let _ = write!(digits, "{len}");
            put_header(dst, headers::CONTENT_LENGTH, &digits);
        }
        BodyFraming::Chunked => put_header(dst, headers::TRANSFER_ENCODING, "chunked"),
        BodyFraming::UntilClose => {}
    }
}

/// Append a response head to `dst`.
///
/// Adds `Content-Length` or `Transfer-Encoding`, plus `Server`, `Date` and
/// `Connection` unless the caller already set them.
pub fn encode_response_head(
    dst: &mut BytesMut,
    status: StatusCode,
    headers: &Headers,
    framing: BodyFraming,
    ctx: &ResponseContext<'_>,
) {
    let reason = status.canonical_reason().unwrap_or("Unknown");
    dst.reserve(128 + headers.len() * 32);
    dst.put_slice(b"HTTP/1.1 ");
    dst.put_slice(status.as_str().as_bytes());
    dst.put_u8(b' ');
    dst.put_slice(reason.as_bytes());
    dst.put_slice(b"\r\n");

    put_user_headers(dst, headers);
    if !(status.is_informational() || status == StatusCode::NO_CONTENT) {
        put_framing(dst, framing);
    }
    if !ctx.server_name.is_empty() && !headers.contains("server") {
        put_header(dst, "server", ctx.server_name);
    }
    if !headers.contains("date") {
        put_header(dst, "date", &httpdate::fmt_http_date(SystemTime::now()));
    }
    if !headers.contains(headers::CONNECTION) {
        if !ctx.keep_alive {
            put_header(dst, headers::CONNECTION, "close");
        } else if ctx.version == Version::HTTP_10 {
            put_header(dst, headers::CONNECTION, "Keep-Alive");
        }
    }
    dst.put_slice(b"\r\n");
}

/// Encode a complete response with an in-memory body.
///
/// The head and body are returned as separate buffers so the body is never
/// copied.
#[must_use]
pub fn encode_response(
    status: StatusCode,
    headers: &Headers,
    body: Bytes,
    ctx: &ResponseContext<'_>,
) -> Vec<Bytes> {
    let mut head = BytesMut::new();
    encode_response_head(
        &mut head,
        status,
        headers,
        BodyFraming::Length(body.len() as u64),
        ctx,
    );
    let mut out = vec![head.freeze()];
    if !body.is_empty() {
        out.push(body);
    }
    out
}

/// Encode a short plain-text error response that closes the connection.
#[must_use]
pub fn error_response(status: StatusCode, message: &str, server_name: &str) -> Vec<Bytes> {
    let headers = Headers::new().with(headers::CONTENT_TYPE, "text/plain; charset=utf-8");
    let ctx = ResponseContext {
        version: Version::HTTP_11,
        keep_alive: false,
        server_name,
    };
    encode_response(status, &headers, Bytes::copy_from_slice(message.as_bytes()), &ctx)
}

/// Append a request head to `dst`.
pub fn encode_request_head(
    dst: &mut BytesMut,
    method: &Method,
    target: &str,
    headers: &Headers,
    framing: BodyFraming,
) {
    dst.reserve(64 + target.len() + headers.len() * 32);
    dst.put_slice(method.as_str().as_bytes());
    dst.put_u8(b' ');
    dst.put_slice(target.as_bytes());
    dst.put_slice(b" HTTP/1.1\r\n");
    put_user_headers(dst, headers);
    put_framing(dst, framing);
    dst.put_slice(b"\r\n");
}

/// Append one chunk in `size CRLF data CRLF` form. Empty input writes
/// nothing, since a zero-size chunk would end the body.
pub fn encode_chunk(data: &[u8], dst: &mut BytesMut) {
    if data.is_empty() {
        return;
    }
    let mut size = String::with_capacity(16);
    let _ = write!(size, "{:x}", data.len());
    dst.reserve(size.len() + data.len() + 4);
    dst.put_slice(size.as_bytes());
    dst.put_slice(b"\r\n");
    dst.put_slice(data);
    dst.put_slice(b"\r\n");
}

/// Encode `body` as a sequence of chunks no larger than `chunk_size`,
/// followed by the terminating chunk.
pub fn encode_chunked(body: &[u8], chunk_size: usize, dst: &mut BytesMut) {
    for piece in body.chunks(chunk_size.max(1)) {
        encode_chunk(piece, dst);
    }
    dst.put_slice(LAST_CHUNK);
}

/// Streaming chunked body writer.
///
/// ```
/// use bytes::{Bytes, BytesMut};
/// use httpwire::codec::ChunkedEncoder;
/// use tokio_util::codec::Encoder;
///
/// let mut encoder = ChunkedEncoder::default();
/// let mut wire = BytesMut::new();
/// encoder.encode(Bytes::from_static(b"hello"), &mut wire).unwrap();
/// encoder.finish(&mut wire);
/// assert_eq!(&wire[..], b"5\r\nhello\r\n0\r\n\r\n");
/// ```
#[derive(Debug, Default)]
pub struct ChunkedEncoder {
    finished: bool,
}

impl ChunkedEncoder {
    /// Write the terminating chunk. Subsequent calls do nothing.
    pub fn finish(&mut self, dst: &mut BytesMut) {
        if !self.finished {
            dst.put_slice(LAST_CHUNK);
            self.finished = true;
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool { self.finished }
}

impl Encoder<Bytes> for ChunkedEncoder {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), io::Error> {
        if self.finished {
            return Err(io::Error::other("chunked body already finished"));
        }
        encode_chunk(&item, dst);
        Ok(())
    }
}
