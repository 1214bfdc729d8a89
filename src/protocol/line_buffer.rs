//! Line buffer for accumulating partial socket reads.
//!
//! Frames on the wire are JSON documents terminated by `\n`. Reads from the
//! socket can split a frame anywhere (or deliver several at once), so bytes
//! are accumulated in a `BytesMut` and complete lines are split off
//! without copying.
//!
//! # Example
//!
//! ```
//! use mutation_server_client::protocol::LineBuffer;
//!
//! let mut buffer = LineBuffer::new();
//!
//! assert!(buffer.push(br#"{"id":"1","#).unwrap().is_empty());
//! let frames = buffer.push(b"\"result\":[]}\n").unwrap();
//! assert_eq!(&frames[0][..], br#"{"id":"1","result":[]}"#);
//! ```

use bytes::{Bytes, BytesMut};

use crate::error::{MutationServerError, Result};

/// Default maximum frame size (64 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Initial buffer capacity.
const INITIAL_CAPACITY: usize = 64 * 1024;

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct LineBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Bytes already scanned for a newline (avoids rescanning on each push).
    scanned: usize,
    /// Maximum allowed frame size, excluding the terminator.
    max_frame_size: usize,
}

impl LineBuffer {
    /// Create a new line buffer with default settings.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new line buffer with a custom maximum frame size.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            scanned: 0,
            max_frame_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// A trailing `\r` is stripped and blank lines are skipped. Incomplete
    /// data is kept for the next push.
    ///
    /// # Errors
    ///
    /// Returns `Protocol` if a frame (complete or still accumulating)
    /// exceeds the maximum frame size.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();

        while let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
            let line_end = self.scanned + offset;
            let mut line = self.buffer.split_to(line_end + 1);
            self.scanned = 0;

            line.truncate(line_end);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }

            if line.len() > self.max_frame_size {
                return Err(self.oversized(line.len()));
            }

            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            frames.push(line.freeze());
        }

        self.scanned = self.buffer.len();
        if self.buffer.len() > self.max_frame_size {
            return Err(self.oversized(self.buffer.len()));
        }

        Ok(frames)
    }

    fn oversized(&self, size: usize) -> MutationServerError {
        MutationServerError::Protocol(format!(
            "Frame size {} exceeds maximum {}",
            size, self.max_frame_size
        ))
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}
