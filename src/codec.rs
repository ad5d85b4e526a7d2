//! HTTP/1.x wire codec.
//!
//! The decoding side is a resumable push parser built from two layers:
//! [`LineReader`] splits the byte stream into lines and [`MessageDecoder`]
//! drives the request/response state machine on top of it. Both accept any
//! [`bytes::Buf`], so a reactor can hand them a slice of its read buffer
//! without copying, while [`MessageDecoder`] also implements
//! [`tokio_util::codec::Decoder`] for use with `FramedRead`.
//!
//! The encoding side writes response and request heads, adding framing
//! headers, and produces chunked transfer coding for streamed bodies.
//!
//! # Error Handling
//!
//! Decoding failures are reported as [`DecodeError`]. Each variant maps to the
//! status a server should answer with via [`DecodeError::status`]; see the
//! [`error`] module for the full taxonomy.

pub mod decoder;
pub mod encode;
pub mod error;
pub mod line;

pub use decoder::{BodyMode, DecodeState, MessageDecoder, ProxyPreface, Role};
pub use encode::{
    BodyFraming,
    ChunkedEncoder,
    LAST_CHUNK,
    ResponseContext,
    encode_chunk,
    encode_chunked,
    encode_request_head,
    encode_response,
    encode_response_head,
    error_response,
};
pub use error::{DecodeError, ProtocolError};
pub use line::LineReader;
