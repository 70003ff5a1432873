//! Transport frame extraction.
//!
//! The push stream is a sequence of UTF-8 text frames separated by a blank
//! line (`\n\n`). The transport chunks bytes however it likes; a delimiter
//! can land anywhere, including between its own two newlines. [`FrameBuffer`]
//! absorbs that jitter: bytes go in as they arrive, complete frames come
//! out, and a partial frame at the tail of one read is held until the next.
//!
//! The buffer is sans-io on purpose. Framing correctness is the single
//! biggest source of subtle stream bugs, and a pure push/pop core lets tests
//! replay the same bytes under every possible chunking.

use bytes::BytesMut;

use crate::error::StreamError;

/// Frame delimiter on the wire.
const DELIMITER: &[u8] = b"\n\n";

/// Default cap on bytes buffered while waiting for a delimiter.
pub const DEFAULT_MAX_PENDING_BYTES: usize = 1024 * 1024;

/// Accumulates transport chunks and yields complete frames.
///
/// One buffer serves one connection. Restarting a connection means starting
/// from a fresh buffer; partial state never crosses connections.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    max_pending: usize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::with_max_pending(DEFAULT_MAX_PENDING_BYTES)
    }

    pub fn with_max_pending(max_pending: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_pending,
        }
    }

    /// Feed one transport chunk, returning every frame it completed.
    ///
    /// Frames come back in receipt order with the delimiter stripped. A
    /// frame is returned only once both delimiter bytes have been seen, so
    /// no chunking of the input can split or merge frames.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, StreamError> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = find_delimiter(&self.buf) {
            let frame = self.buf.split_to(pos + DELIMITER.len());
            // Frames only ever split on ASCII delimiter bytes, so a frame
            // holds whole characters; lossy conversion fires only on input
            // that was never valid UTF-8.
            frames.push(String::from_utf8_lossy(&frame[..pos]).into_owned());
        }

        if self.buf.len() > self.max_pending {
            return Err(StreamError::FrameOverflow {
                limit: self.max_pending,
            });
        }

        Ok(frames)
    }

    /// Bytes currently buffered waiting for a delimiter.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// End of stream. An unterminated tail is not a frame; it is returned
    /// here only so the caller can log what was discarded.
    pub fn finish(self) -> Option<String> {
        if self.buf.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.buf).into_owned())
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.windows(DELIMITER.len()).position(|w| w == DELIMITER)
}
