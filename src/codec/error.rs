//! Error types for the HTTP codec layer.
//!
//! Errors are split by origin:
//!
//! - [`ProtocolError`]: the peer sent bytes that do not form a valid message (bad initial line,
//!   bad PROXY preface, unparsable length).
//! - [`DecodeError`]: top-level decoder failure wrapping protocol errors together with size limits,
//!   premature end of stream and transport I/O.
//!
//! A server maps each variant to a response status via [`DecodeError::status`].

use std::io;

use http::StatusCode;
use thiserror::Error;

use super::DecodeState;

/// The peer violated HTTP/1.x message syntax.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Initial line did not split into three tokens.
    #[error("malformed initial line: {line:?}")]
    MalformedInitialLine {
        /// The offending line, lossily decoded.
        line: String,
    },

    /// Initial line contained bytes that are not UTF-8.
    #[error("initial line is not valid UTF-8")]
    InvalidEncoding,

    /// Request method token is not a valid HTTP token.
    #[error("invalid method: {method:?}")]
    InvalidMethod {
        /// Method token as received.
        method: String,
    },

    /// Status code is not a three digit number in range.
    #[error("invalid status code: {status:?}")]
    InvalidStatus {
        /// Status token as received.
        status: String,
    },

    /// A line starting with `PROXY` was not a valid v1 TCP4 preface.
    #[error("malformed proxy header: {line:?}")]
    MalformedProxyHeader {
        /// The offending line, lossily decoded.
        line: String,
    },

    /// A PROXY preface was required but the connection began with
    /// something else.
    #[error("expected proxy header, got: {line:?}")]
    MissingProxyHeader {
        /// The first line received.
        line: String,
    },

    /// `Content-Length` was not a non-negative integer.
    #[error("invalid content-length: {value:?}")]
    InvalidContentLength {
        /// Header value as received.
        value: String,
    },

    /// Chunk-size line was not hexadecimal.
    #[error("invalid chunk size: {value:?}")]
    InvalidChunkSize {
        /// Chunk-size line as received.
        value: String,
    },

    /// Chunk data was not followed by an empty line.
    #[error("missing CRLF after chunk data")]
    MissingChunkDelimiter,

    /// The decoder already failed and must be discarded.
    #[error("decoder is in a failed state")]
    Poisoned,
}

/// Top-level message decoder failure.
///
/// # Examples
///
/// ```
/// use http::StatusCode;
/// use httpwire::codec::DecodeError;
///
/// let err = DecodeError::LineTooLarge { max: 8192 };
/// assert_eq!(err.status(), StatusCode::URI_TOO_LONG);
/// assert_eq!(err.error_type(), "line_too_large");
/// ```
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Syntax violation.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A single line exceeded the configured maximum.
    #[error("line exceeds max length {max}")]
    LineTooLarge {
        /// Configured line limit in bytes.
        max: usize,
    },

    /// The declared or accumulated body exceeded the configured maximum.
    #[error("body of {attempted} bytes exceeds max {max}")]
    BodyTooLarge {
        /// Body size that would have been reached.
        attempted: u64,
        /// Configured body limit in bytes.
        max: usize,
    },

    /// The stream ended before the message was complete.
    #[error("connection closed while in state {state:?}")]
    UnexpectedEof {
        /// Decoder state at the time of closure.
        state: DecodeState,
    },

    /// Transport I/O error surfaced through a framed reader.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DecodeError {
    /// Status code a server answers with before closing the connection.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::LineTooLarge { .. } => StatusCode::URI_TOO_LONG,
            Self::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Protocol(_) | Self::UnexpectedEof { .. } | Self::Io(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Short label used for logs and metrics.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "protocol",
            Self::LineTooLarge { .. } => "line_too_large",
            Self::BodyTooLarge { .. } => "body_too_large",
            Self::UnexpectedEof { .. } => "unexpected_eof",
            Self::Io(_) => "io",
        }
    }
}

impl From<DecodeError> for io::Error {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Io(e) => e,
            DecodeError::UnexpectedEof { .. } => io::Error::new(io::ErrorKind::UnexpectedEof, err),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
