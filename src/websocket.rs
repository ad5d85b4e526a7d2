//! RFC 6455 WebSocket framing.
//!
//! [`FrameDecoder`] parses frames incrementally, enforces masking rules for
//! the receiving [`Endpoint`] and reassembles fragmented messages.
//! [`FrameEncoder`] writes frames for the sending side. The [`handshake`]
//! module derives the `Sec-WebSocket-Accept` value for an upgrade response.

mod decoder;
mod encoder;
mod frame;
pub mod handshake;

pub use decoder::{FrameDecoder, FrameState, MAX_CONTROL_PAYLOAD, apply_mask};
pub use encoder::{FrameEncoder, encode_frame};
pub use frame::{CloseCode, Frame, FrameError, Opcode};
pub use handshake::{HandshakeError, accept_key, upgrade_response, validate_upgrade};

/// Side of the connection a decoder or encoder acts for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endpoint {
    /// The accepting side. Receives masked frames, sends unmasked ones.
    Server,
    /// The connecting side. Receives unmasked frames, sends masked ones.
    Client,
}

impl Endpoint {
    /// Whether frames arriving at this endpoint must be masked.
    #[must_use]
    pub fn expects_mask(self) -> bool { self == Endpoint::Server }

    /// The opposite side.
    #[must_use]
    pub fn peer(self) -> Self {
        match self {
            Endpoint::Server => Endpoint::Client,
            Endpoint::Client => Endpoint::Server,
        }
    }
}

#[cfg(test)]
mod tests;
