//! Length-prefixed message framing for socket channels.
//!
//! ```text
//! ┌────────────────┬──────────────────────────┐
//! │ length (u32 BE)│ message bytes            │
//! │ 4 bytes        │ `length` bytes           │
//! └────────────────┴──────────────────────────┘
//! ```
//!
//! Reads arrive in arbitrary chunks. [`FrameDecoder`] keeps the partial
//! message between reads: it first recovers the length prefix, then waits
//! until that many bytes are buffered, yields the message and starts over.

use thiserror::Error;

/// Size of the length prefix.
pub const LENGTH_PREFIX: usize = 4;

/// Frames larger than this are rejected as corrupt.
pub const DEFAULT_MAX_FRAME: usize = 64 * 1024 * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("stream ended mid-frame: expected {expected} bytes, have {buffered}")]
    UnexpectedEof { expected: usize, buffered: usize },
}

/// Wrap `payload` in a length-prefixed frame.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(LENGTH_PREFIX + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Reassembly buffer for one inbound byte stream.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Length of the frame being assembled, once its prefix has been read
    expected: Option<usize>,
    max_frame: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME)
    }
}

impl FrameDecoder {
    pub fn new(max_frame: usize) -> Self {
        Self {
            buffer: Vec::new(),
            expected: None,
            max_frame,
        }
    }

    /// Append freshly read bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pop the next complete frame, if one is fully buffered.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FramingError> {
        let expected = match self.expected {
            Some(n) => n,
            None => {
                if self.buffer.len() < LENGTH_PREFIX {
                    return Ok(None);
                }
                let mut prefix = [0u8; LENGTH_PREFIX];
                prefix.copy_from_slice(&self.buffer[..LENGTH_PREFIX]);
                let len = u32::from_be_bytes(prefix) as usize;
                if len > self.max_frame {
                    return Err(FramingError::FrameTooLarge {
                        len,
                        max: self.max_frame,
                    });
                }
                self.buffer.drain(..LENGTH_PREFIX);
                self.expected = Some(len);
                len
            }
        };

        if self.buffer.len() < expected {
            return Ok(None);
        }
        let frame: Vec<u8> = self.buffer.drain(..expected).collect();
        self.expected = None;
        Ok(Some(frame))
    }

    /// Push `chunk` and collect every frame it completes.
    pub fn decode(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>, FramingError> {
        self.push(chunk);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Whether bytes of an incomplete frame are held.
    pub fn is_mid_frame(&self) -> bool {
        self.expected.is_some() || !self.buffer.is_empty()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Check the stream may end here.
    pub fn finish(&self) -> Result<(), FramingError> {
        if !self.is_mid_frame() {
            return Ok(());
        }
        Err(FramingError::UnexpectedEof {
            expected: self.expected.unwrap_or(LENGTH_PREFIX),
            buffered: self.buffer.len(),
        })
    }

    /// Drop any partial frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.expected = None;
    }
}
