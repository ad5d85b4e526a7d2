//! WebSocket frame model and error taxonomy.

use std::{io, str::Utf8Error};

use bytes::Bytes;
use thiserror::Error;

/// Frame opcode from the low nibble of the first header byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    /// Parse an opcode nibble, rejecting reserved values.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            0x2 => Self::Binary,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            _ => return None,
        })
    }

    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    /// Control frames may interleave with fragments and are never fragmented
    /// themselves.
    #[must_use]
    pub fn is_control(self) -> bool { self.as_u8() & 0x8 != 0 }
}

/// Status codes carried by close frames.
pub struct CloseCode;

impl CloseCode {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const PROTOCOL_ERROR: u16 = 1002;
    /// Reported to handlers when the connection dropped without a close
    /// frame. Never sent on the wire.
    pub const ABNORMAL: u16 = 1006;
    pub const INVALID_PAYLOAD: u16 = 1007;
    pub const MESSAGE_TOO_BIG: u16 = 1009;
    pub const SERVER_ERROR: u16 = 1011;
    pub const TRY_AGAIN_LATER: u16 = 1013;
}

/// A complete data message or a single control frame.
///
/// Fragmented messages are reassembled before a `Frame` is produced, so
/// `opcode` is never [`Opcode::Continuation`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub opcode: Opcode,
    pub payload: Bytes,
}

impl Frame {
    #[must_use]
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    #[must_use]
    pub fn text(text: impl Into<String>) -> Self { Self::new(Opcode::Text, text.into()) }

    #[must_use]
    pub fn binary(data: impl Into<Bytes>) -> Self { Self::new(Opcode::Binary, data) }

    /// Close frame with a status code and optional reason.
    #[must_use]
    pub fn close(code: u16, reason: &str) -> Self {
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        Self::new(Opcode::Close, payload)
    }

    /// Payload as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns the UTF-8 error if the payload is not valid text.
    pub fn as_text(&self) -> Result<&str, Utf8Error> { std::str::from_utf8(&self.payload) }

    /// Status code of a close frame. A close frame without a body reports
    /// [`CloseCode::NORMAL`].
    #[must_use]
    pub fn close_code(&self) -> Option<u16> {
        if self.opcode != Opcode::Close {
            return None;
        }
        match self.payload.as_ref() {
            [hi, lo, ..] => Some(u16::from_be_bytes([*hi, *lo])),
            _ => Some(CloseCode::NORMAL),
        }
    }
}

/// WebSocket framing violation.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Opcode nibble is reserved.
    #[error("reserved opcode {0:#x}")]
    ReservedOpcode(u8),

    /// A client frame arrived without a mask, or a server frame with one.
    #[error("frame masking does not match endpoint")]
    MaskMismatch,

    /// Extended length used where a shorter encoding was required.
    #[error("non-minimal length encoding: {length}")]
    NonMinimalLength {
        /// Decoded payload length.
        length: u64,
    },

    /// Continuation frame without a preceding data frame, or a new data
    /// frame while a fragmented message is open.
    #[error("unexpected {found:?} frame while expecting {expected}")]
    OpcodeMismatch {
        /// Opcode received.
        found: Opcode,
        /// Human-readable expectation.
        expected: &'static str,
    },

    /// Control frame fragmented or longer than 125 bytes.
    #[error("invalid control frame")]
    InvalidControlFrame,

    /// Reassembled message would exceed the configured maximum.
    #[error("message of {attempted} bytes exceeds max {max}")]
    MessageTooLarge {
        /// Size the message would reach.
        attempted: u64,
        /// Configured limit.
        max: usize,
    },

    /// Transport I/O error surfaced through a framed reader.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// Close code to send before dropping the connection.
    #[must_use]
    pub fn close_code(&self) -> u16 {
        match self {
            Self::MessageTooLarge { .. } => CloseCode::MESSAGE_TOO_BIG,
            Self::Io(_) => CloseCode::GOING_AWAY,
            _ => CloseCode::PROTOCOL_ERROR,
        }
    }
}
