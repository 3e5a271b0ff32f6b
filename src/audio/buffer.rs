//! # Paced Relay Buffer
//!
//! Append-only byte buffer with a read cursor that is drained one fixed-size
//! frame per pacing tick. Synthesis chunks arrive in irregular, network-sized
//! bursts; the cursor turns them into an even stream of frames in strict FIFO
//! byte order.
//!
//! ## Key Features:
//! - **Append-only**: consumed bytes are never removed during a call; calls
//!   are short, so the buffer simply grows until the session ends
//! - **Cursor rollback**: a tick that finds less than a full frame undoes its
//!   cursor advance, so a partial frame is retried whole on a later tick
//! - **Single owner**: the buffer lives inside one session actor, so appends
//!   and cursor advances never race and no lock is needed

/// Result of reading one frame from the buffer.
///
/// ## Rust Concepts:
/// - **Lifetime `'a`**: `Frame` borrows directly from the buffer, so no copy is
///   made until the caller decides to send it
#[derive(Debug, PartialEq, Eq)]
pub enum FrameRead<'a> {
    /// Nothing has ever been appended
    Empty,

    /// A full frame was read and the cursor advanced past it
    Frame(&'a [u8]),

    /// Fewer than a frame's worth of unsent bytes; cursor unchanged
    Underrun {
        /// Unsent bytes waiting for more data
        available: usize,
    },
}

/// Byte buffer drained in fixed-size frames.
#[derive(Debug, Clone)]
pub struct PacedRelayBuffer {
    /// Every byte appended since the session started
    data: Vec<u8>,

    /// Offset of the next unsent byte
    stream_index: usize,

    /// Bytes per frame (640 for 16kHz 16-bit mono 20ms)
    frame_size: usize,
}

impl PacedRelayBuffer {
    /// Create an empty buffer that yields frames of `frame_size` bytes.
    pub fn new(frame_size: usize) -> Self {
        assert!(frame_size > 0, "frame size must be non-zero");
        Self {
            data: Vec::new(),
            stream_index: 0,
            frame_size,
        }
    }

    /// Append decoded audio to the tail of the buffer.
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Read the next frame, following the tick algorithm:
    ///
    /// 1. Empty buffer → `Empty`
    /// 2. Slice `[cursor, cursor + frame_size)` and advance the cursor
    /// 3. Full slice → `Frame`
    /// 4. Short or empty slice → roll the cursor back → `Underrun`
    ///
    /// The cursor therefore either moves forward by exactly one frame or ends
    /// the call where it started.
    pub fn next_frame(&mut self) -> FrameRead<'_> {
        if self.data.is_empty() {
            return FrameRead::Empty;
        }

        let start = self.stream_index;
        let end = (start + self.frame_size).min(self.data.len());
        let read_len = end.saturating_sub(start);
        self.stream_index += self.frame_size;

        if read_len == self.frame_size {
            FrameRead::Frame(&self.data[start..end])
        } else {
            self.stream_index -= self.frame_size;
            FrameRead::Underrun { available: read_len }
        }
    }

    /// Bytes appended but not yet read as part of a full frame.
    pub fn pending(&self) -> usize {
        self.data.len().saturating_sub(self.stream_index)
    }

    /// Whether a full frame is ready for the next tick.
    pub fn has_full_frame(&self) -> bool {
        self.pending() >= self.frame_size
    }

    /// Total bytes appended over the buffer's lifetime.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing has ever been appended.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current read cursor.
    #[cfg(test)]
    pub fn stream_index(&self) -> usize {
        self.stream_index
    }
}
