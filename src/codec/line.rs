//! Resumable line reader.
//!
//! Lines end at LF. A single CR immediately before the LF is stripped; a bare
//! CR elsewhere is kept. Partial lines survive across calls so a caller can
//! feed input in arbitrarily small pieces.

use bytes::{Buf, Bytes, BytesMut};

use super::DecodeError;

/// Accumulates bytes until an LF is seen.
#[derive(Debug)]
pub struct LineReader {
    line: BytesMut,
    max_line: usize,
}

impl LineReader {
    /// Create a reader that fails once a line exceeds `max_line` bytes,
    /// not counting the terminator.
    #[must_use]
    pub fn new(max_line: usize) -> Self {
        Self {
            line: BytesMut::new(),
            max_line,
        }
    }

    /// Maximum accepted line length.
    #[must_use]
    pub fn max_line(&self) -> usize { self.max_line }

    /// Returns `true` when a partial line is buffered.
    #[must_use]
    pub fn has_partial(&self) -> bool { !self.line.is_empty() }

    /// Discard any partial line.
    pub fn reset(&mut self) { self.line.clear(); }

    /// Consume bytes from `src` until a complete line is available.
    ///
    /// Returns `Ok(None)` once `src` is exhausted without a terminator; the
    /// partial line is retained for the next call.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::LineTooLarge`] once the buffered line exceeds
    /// the limit.
    pub fn read_line<B: Buf>(&mut self, src: &mut B) -> Result<Option<Bytes>, DecodeError> {
        while src.has_remaining() {
            let chunk = src.chunk();
            if let Some(pos) = chunk.iter().position(|&b| b == b'\n') {
                self.append(&chunk[..pos])?;
                src.advance(pos + 1);
                let mut line = self.line.split().freeze();
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                return Ok(Some(line));
            }
            let len = chunk.len();
            self.append(chunk)?;
            src.advance(len);
        }
        Ok(None)
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        let total = self.line.len() + bytes.len();
        let trailing_cr = bytes
            .last()
            .or_else(|| self.line.last())
            .is_some_and(|&b| b == b'\r');
        let content = if trailing_cr { total - 1 } else { total };
        if content > self.max_line {
            return Err(DecodeError::LineTooLarge { max: self.max_line });
        }
        self.line.extend_from_slice(bytes);
        Ok(())
    }
}
