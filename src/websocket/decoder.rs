//! Resumable WebSocket frame decoder.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

use super::{Endpoint, Frame, FrameError, Opcode};

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: u64 = 125;

/// Position of the decoder within a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    /// Expecting the FIN/opcode byte.
    FrameStart,
    /// Expecting the MASK/length byte.
    ReadLength,
    /// Reading a 16-bit extended length.
    ReadExtendedLength16,
    /// Reading a 64-bit extended length.
    ReadExtendedLength64,
    /// Reading the four-byte masking key.
    MaskingKey,
    /// Reading payload bytes.
    Payload,
}

/// Incremental frame parser with fragment reassembly.
///
/// Data frames are accumulated until a frame with FIN set completes the
/// message; control frames may arrive between fragments and are returned on
/// their own without disturbing the partial message.
#[derive(Debug)]
pub struct FrameDecoder {
    endpoint: Endpoint,
    max_message: usize,
    state: FrameState,
    scratch: [u8; 8],
    scratch_len: usize,
    fin: bool,
    opcode: Opcode,
    masked: bool,
    mask: [u8; 4],
    frame_len: u64,
    frame_read: u64,
    message_opcode: Option<Opcode>,
    message: BytesMut,
    control: BytesMut,
}

impl FrameDecoder {
    /// Create a decoder for frames arriving at `endpoint`.
    #[must_use]
    pub fn new(endpoint: Endpoint, max_message: usize) -> Self {
        Self {
            endpoint,
            max_message,
            state: FrameState::FrameStart,
            scratch: [0; 8],
            scratch_len: 0,
            fin: false,
            opcode: Opcode::Continuation,
            masked: false,
            mask: [0; 4],
            frame_len: 0,
            frame_read: 0,
            message_opcode: None,
            message: BytesMut::new(),
            control: BytesMut::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> FrameState { self.state }

    /// Returns `true` while a fragmented message is partially received.
    #[must_use]
    pub fn in_message(&self) -> bool { self.message_opcode.is_some() }

    /// Consume bytes until a frame completes or `src` is exhausted.
    ///
    /// # Errors
    ///
    /// Returns a [`FrameError`] on any framing violation. The decoder must
    /// be discarded afterwards.
    pub fn decode<B: Buf>(&mut self, src: &mut B) -> Result<Option<Frame>, FrameError> {
        while src.has_remaining() {
            match self.state {
                FrameState::FrameStart => {
                    let byte = src.get_u8();
                    self.fin = byte & 0x80 != 0;
                    let raw = byte & 0x0F;
                    self.opcode = Opcode::from_u8(raw).ok_or(FrameError::ReservedOpcode(raw))?;
                    self.check_sequence()?;
                    self.state = FrameState::ReadLength;
                }
                FrameState::ReadLength => {
                    let byte = src.get_u8();
                    self.masked = byte & 0x80 != 0;
                    if self.masked != self.endpoint.expects_mask() {
                        return Err(FrameError::MaskMismatch);
                    }
                    match byte & 0x7F {
                        126 => self.state = FrameState::ReadExtendedLength16,
                        127 => self.state = FrameState::ReadExtendedLength64,
                        len => {
                            if let Some(frame) = self.set_length(u64::from(len))? {
                                return Ok(Some(frame));
                            }
                        }
                    }
                }
                FrameState::ReadExtendedLength16 => {
                    if let Some(bytes) = self.gather::<2, _>(src) {
                        let len = u64::from(u16::from_be_bytes(bytes));
                        if len < 126 {
                            return Err(FrameError::NonMinimalLength { length: len });
                        }
                        if let Some(frame) = self.set_length(len)? {
                            return Ok(Some(frame));
                        }
                    }
                }
                FrameState::ReadExtendedLength64 => {
                    if let Some(bytes) = self.gather::<8, _>(src) {
                        let len = u64::from_be_bytes(bytes);
                        if len <= 0xFFFF {
                            return Err(FrameError::NonMinimalLength { length: len });
                        }
                        if let Some(frame) = self.set_length(len)? {
                            return Ok(Some(frame));
                        }
                    }
                }
                FrameState::MaskingKey => {
                    if let Some(mask) = self.gather::<4, _>(src) {
                        self.mask = mask;
                        if let Some(frame) = self.enter_payload() {
                            return Ok(Some(frame));
                        }
                    }
                }
                FrameState::Payload => {
                    self.read_payload(src);
                    if self.frame_read == self.frame_len
                        && let Some(frame) = self.complete_frame()
                    {
                        return Ok(Some(frame));
                    }
                }
            }
        }
        Ok(None)
    }

    fn check_sequence(&mut self) -> Result<(), FrameError> {
        if self.opcode.is_control() {
            if !self.fin {
                return Err(FrameError::InvalidControlFrame);
            }
            return Ok(());
        }
        match (self.opcode, self.message_opcode) {
            (Opcode::Continuation, None) => Err(FrameError::OpcodeMismatch {
                found: Opcode::Continuation,
                expected: "a text or binary frame",
            }),
            (Opcode::Continuation, Some(_)) => Ok(()),
            (opcode, Some(open)) if opcode != open => Err(FrameError::OpcodeMismatch {
                found: opcode,
                expected: "a continuation frame",
            }),
            (opcode, _) => {
                self.message_opcode = Some(opcode);
                Ok(())
            }
        }
    }

    fn set_length(&mut self, len: u64) -> Result<Option<Frame>, FrameError> {
        if self.opcode.is_control() {
            if len > MAX_CONTROL_PAYLOAD {
                return Err(FrameError::InvalidControlFrame);
            }
        } else {
            let attempted = (self.message.len() as u64).saturating_add(len);
            if attempted > self.max_message as u64 {
                return Err(FrameError::MessageTooLarge {
                    attempted,
                    max: self.max_message,
                });
            }
            // Bounded by max_message above.
            self.message.reserve(usize::try_from(len).unwrap_or(0));
        }
        self.frame_len = len;
        if self.masked {
            self.state = FrameState::MaskingKey;
            Ok(None)
        } else {
            Ok(self.enter_payload())
        }
    }

    fn enter_payload(&mut self) -> Option<Frame> {
        self.frame_read = 0;
        self.state = FrameState::Payload;
        if self.frame_len == 0 {
            self.complete_frame()
        } else {
            None
        }
    }

    fn read_payload<B: Buf>(&mut self, src: &mut B) {
        let remaining = self.frame_len - self.frame_read;
        let mut wanted = usize::try_from(remaining)
            .unwrap_or(usize::MAX)
            .min(src.remaining());
        let masked = self.masked;
        let mask = self.mask;
        let target = if self.opcode.is_control() {
            &mut self.control
        } else {
            &mut self.message
        };
        let start = target.len();
        let taken = wanted as u64;
        while wanted > 0 {
            let chunk = src.chunk();
            let n = chunk.len().min(wanted);
            target.extend_from_slice(&chunk[..n]);
            src.advance(n);
            wanted -= n;
        }
        if masked {
            // Data payload continues the mask index of earlier fragments.
            apply_mask(&mut target[start..], mask, start as u64);
        }
        self.frame_read += taken;
    }

    fn complete_frame(&mut self) -> Option<Frame> {
        self.state = FrameState::FrameStart;
        if self.opcode.is_control() {
            return Some(Frame::new(self.opcode, self.control.split().freeze()));
        }
        if !self.fin {
            return None;
        }
        let opcode = self.message_opcode.take()?;
        Some(Frame::new(opcode, self.message.split().freeze()))
    }

    fn gather<const N: usize, B: Buf>(&mut self, src: &mut B) -> Option<[u8; N]> {
        while self.scratch_len < N && src.has_remaining() {
            self.scratch[self.scratch_len] = src.get_u8();
            self.scratch_len += 1;
        }
        if self.scratch_len < N {
            return None;
        }
        self.scratch_len = 0;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.scratch[..N]);
        Some(out)
    }
}

/// XOR `data` with `mask`, where `data[0]` sits at byte `offset` of the
/// message payload.
///
/// The index runs across all fragments of one message, so the first byte of
/// a continuation frame is masked with `mask[bytes_so_far % 4]`. Control
/// frames always start at zero.
pub fn apply_mask(data: &mut [u8], mask: [u8; 4], offset: u64) {
    let shift = (offset % 4) as usize;
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[(shift + i) % 4];
    }
}

impl Decoder for FrameDecoder {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        FrameDecoder::decode(self, src)
    }
}
