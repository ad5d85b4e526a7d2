//! WebSocket frame serialisation.

use std::io;

use bytes::{BufMut, BytesMut};
use tokio_util::codec::Encoder;

use super::{Endpoint, Frame, Opcode, decoder::apply_mask};

/// Append a single frame to `dst`.
///
/// Payload lengths up to 125 use the short form, up to `u16::MAX` the 16-bit
/// extended form, and anything larger the 64-bit form.
pub fn encode_frame(
    opcode: Opcode,
    fin: bool,
    payload: &[u8],
    mask: Option<[u8; 4]>,
    dst: &mut BytesMut,
) {
    encode_frame_at(opcode, fin, payload, mask, 0, dst);
}

/// Like [`encode_frame`] for a fragment starting `offset` bytes into its
/// message.
pub(super) fn encode_frame_at(
    opcode: Opcode,
    fin: bool,
    payload: &[u8],
    mask: Option<[u8; 4]>,
    offset: u64,
    dst: &mut BytesMut,
) {
    let len = payload.len();
    dst.reserve(len + 14);
    let first = (if fin { 0x80 } else { 0x00 }) | opcode.as_u8();
    dst.put_u8(first);
    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    if len < 126 {
        // Fits in the seven-bit length field.
        dst.put_u8(mask_bit | len as u8);
    } else if let Ok(short) = u16::try_from(len) {
        dst.put_u8(mask_bit | 126);
        dst.put_u16(short);
    } else {
        dst.put_u8(mask_bit | 127);
        dst.put_u64(len as u64);
    }
    match mask {
        Some(key) => {
            dst.put_slice(&key);
            let start = dst.len();
            dst.put_slice(payload);
            apply_mask(&mut dst[start..], key, offset);
        }
        None => dst.put_slice(payload),
    }
}

/// Frame writer for one side of a connection.
///
/// Frames sent by a client are masked with a fresh random key; frames sent by
/// a server are not.
#[derive(Clone, Copy, Debug)]
pub struct FrameEncoder {
    endpoint: Endpoint,
}

impl FrameEncoder {
    /// Encoder for frames sent from `endpoint`.
    #[must_use]
    pub fn new(endpoint: Endpoint) -> Self { Self { endpoint } }

    fn mask(self) -> Option<[u8; 4]> {
        match self.endpoint {
            Endpoint::Client => Some(rand::random()),
            Endpoint::Server => None,
        }
    }

    /// Append `frame` as a single final frame.
    pub fn encode_into(self, frame: &Frame, dst: &mut BytesMut) {
        encode_frame(frame.opcode, true, &frame.payload, self.mask(), dst);
    }

    /// Append a data frame split into fragments of at most `fragment_size`
    /// bytes. Control frames are never fragmented.
    pub fn encode_fragmented(self, frame: &Frame, fragment_size: usize, dst: &mut BytesMut) {
        if frame.opcode.is_control() || frame.payload.len() <= fragment_size {
            self.encode_into(frame, dst);
            return;
        }
        let mut pieces = frame.payload.chunks(fragment_size.max(1)).peekable();
        let mut opcode = frame.opcode;
        let mut offset = 0;
        while let Some(piece) = pieces.next() {
            let fin = pieces.peek().is_none();
            encode_frame_at(opcode, fin, piece, self.mask(), offset, dst);
            opcode = Opcode::Continuation;
            offset += piece.len() as u64;
        }
    }
}

impl Encoder<Frame> for FrameEncoder {
    type Error = io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), io::Error> {
        self.encode_into(&frame, dst);
        Ok(())
    }
}
