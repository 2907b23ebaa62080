//! Length-delimited frame extraction
//!
//! The message and segment servers stream a sequence of protobuf messages,
//! each prefixed with its byte length encoded as a varint. HTTP chunk
//! boundaries have no relation to frame boundaries, so the extractor keeps the
//! incomplete tail between reads.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Maximum size of a single frame and of the retained remainder (16 MB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// A varint never needs more than 10 bytes for a u64.
const MAX_VARINT_LEN: usize = 10;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Buffer size exceeded limit ({limit} bytes)")]
    BufferOverflow { size: usize, limit: usize },

    #[error("Invalid length prefix: varint longer than {MAX_VARINT_LEN} bytes")]
    InvalidLengthPrefix,
}

/// Incremental splitter for varint length-prefixed frames.
///
/// Feeding the same bytes in any chunking yields the same frames in the same
/// order. Frames declaring a length above `max_frame_size` are discarded
/// without being buffered: their bytes are skipped as they arrive.
#[derive(Debug)]
pub struct FrameExtractor {
    buffer: BytesMut,
    max_frame_size: usize,
    max_buffer_size: usize,
    skip_remaining: u64,
    discarded_frames: u64,
}

impl Default for FrameExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_FRAME_SIZE)
    }

    #[must_use]
    pub fn with_limits(max_frame_size: usize, max_buffer_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_frame_size,
            max_buffer_size,
            skip_remaining: 0,
            discarded_frames: 0,
        }
    }

    /// Append `chunk` and return every frame that is now complete.
    ///
    /// Fails when the retained remainder exceeds `max_buffer_size` or when a
    /// length prefix is not a valid varint; both mean the producer is not
    /// framing its output and the stream must be abandoned. The buffer is
    /// cleared on failure.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>, FrameError> {
        let mut chunk = chunk;
        if self.skip_remaining > 0 {
            let n = self.skip_remaining.min(chunk.len() as u64) as usize;
            chunk = &chunk[n..];
            self.skip_remaining -= n as u64;
        }
        self.buffer.extend_from_slice(chunk);

        let frames = match self.drain() {
            Ok(frames) => frames,
            Err(e) => {
                self.clear();
                return Err(e);
            }
        };

        if self.buffer.len() > self.max_buffer_size {
            let size = self.buffer.len();
            self.clear();
            return Err(FrameError::BufferOverflow {
                size,
                limit: self.max_buffer_size,
            });
        }

        Ok(frames)
    }

    fn drain(&mut self) -> Result<Vec<Bytes>, FrameError> {
        let mut frames = Vec::new();

        loop {
            if self.skip_remaining > 0 {
                let n = self.skip_remaining.min(self.buffer.len() as u64) as usize;
                self.buffer.advance(n);
                self.skip_remaining -= n as u64;
                if self.skip_remaining > 0 {
                    break;
                }
            }

            let Some((length, header_len)) = peek_length(&self.buffer)? else {
                break; // Need more data for the length prefix
            };

            if length > self.max_frame_size as u64 {
                self.buffer.advance(header_len);
                self.skip_remaining = length;
                self.discarded_frames += 1;
                continue;
            }

            let length = length as usize;
            if self.buffer.len() < header_len + length {
                break; // Need more data for the frame body
            }

            self.buffer.advance(header_len);
            frames.push(self.buffer.split_to(length).freeze());
        }

        Ok(frames)
    }

    /// Bytes retained for a frame that has not fully arrived yet.
    #[must_use]
    pub fn remaining(&self) -> &[u8] {
        &self.buffer
    }

    /// Number of frames dropped for exceeding the frame size limit.
    #[must_use]
    pub fn discarded_frames(&self) -> u64 {
        self.discarded_frames
    }

    pub fn clear(&mut self) {
        self.buffer = BytesMut::new();
        self.skip_remaining = 0;
    }
}

/// Read a varint length prefix without consuming it.
///
/// Returns `Ok(None)` while the prefix itself is still incomplete.
fn peek_length(buf: &[u8]) -> Result<Option<(u64, usize)>, FrameError> {
    let mut value: u64 = 0;
    for (i, &byte) in buf.iter().take(MAX_VARINT_LEN).enumerate() {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    if buf.len() >= MAX_VARINT_LEN {
        return Err(FrameError::InvalidLengthPrefix);
    }
    Ok(None)
}
