//! Opening handshake helpers.

use base64::prelude::*;
use bytes::{BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::message::Message;

/// GUID appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Request header carrying the client nonce.
pub const SEC_WEBSOCKET_KEY: &str = "sec-websocket-key";

/// Request header naming the protocol version.
pub const SEC_WEBSOCKET_VERSION: &str = "sec-websocket-version";

/// Reasons an upgrade request cannot be accepted.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("request does not ask for a websocket upgrade")]
    NotUpgrade,
    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,
    #[error("unsupported websocket version {0:?}")]
    UnsupportedVersion(String),
}

/// Compute `Sec-WebSocket-Accept` for a client key.
///
/// ```
/// use httpwire::websocket::accept_key;
///
/// assert_eq!(
///     accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
#[must_use]
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.trim().as_bytes());
    sha1.update(WS_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Check an upgrade request and return its client key.
///
/// # Errors
///
/// Returns a [`HandshakeError`] when the request is not a version 13
/// WebSocket upgrade with a key.
pub fn validate_upgrade(request: &Message) -> Result<&str, HandshakeError> {
    if !request.is_websocket_upgrade() {
        return Err(HandshakeError::NotUpgrade);
    }
    let headers = request.headers();
    if let Some(version) = headers.get(SEC_WEBSOCKET_VERSION)
        && version.trim() != "13"
    {
        return Err(HandshakeError::UnsupportedVersion(version.to_owned()));
    }
    headers
        .get(SEC_WEBSOCKET_KEY)
        .filter(|key| !key.trim().is_empty())
        .ok_or(HandshakeError::MissingKey)
}

/// Build the `101 Switching Protocols` response for `key`.
#[must_use]
pub fn upgrade_response(key: &str) -> Bytes {
    let accept = accept_key(key);
    let mut dst = BytesMut::with_capacity(160);
    dst.put_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
    dst.put_slice(b"Upgrade: websocket\r\n");
    dst.put_slice(b"Connection: Upgrade\r\n");
    dst.put_slice(b"Sec-WebSocket-Accept: ");
    dst.put_slice(accept.as_bytes());
    dst.put_slice(b"\r\n\r\n");
    dst.freeze()
}
