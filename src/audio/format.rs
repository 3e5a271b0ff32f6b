//! # Wire Format
//!
//! Describes the fixed PCM format spoken on the telephony leg and derives the
//! per-tick frame size from it.
//!
//! ## Audio Format Requirements:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Bit Depth**: 16-bit PCM, little-endian
//! - **Channels**: Mono (1 channel)
//! - **Frame Duration**: 20ms per packet
//!
//! 16000 samples/s × 2 bytes × 1 channel × 0.020 s = **640 bytes per frame**.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bytes in one outbound frame (20ms of 16kHz 16-bit mono audio).
pub const FRAME_SIZE: usize = 640;

/// Real playback duration of one frame, and the pacing period.
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Delay between observing end-of-content during an underrun and closing the
/// downstream connection.
pub const CLOSE_DELAY: Duration = Duration::from_secs(4);

/// PCM format of the relayed stream.
///
/// ## Rust Concepts:
/// - **Copy**: The struct is four small integers, so it is passed by value
/// - **serde**: Serializable so it can appear in the metrics endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireFormat {
    /// Samples per second (16000 for the telephony leg)
    pub sample_rate: u32,

    /// Number of interleaved channels (1 for mono)
    pub channels: u8,

    /// Bits per sample (16 for linear PCM)
    pub bit_depth: u8,

    /// Duration of one frame in milliseconds
    pub frame_duration_ms: u32,
}

impl Default for WireFormat {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            bit_depth: 16,
            frame_duration_ms: FRAME_DURATION.as_millis() as u32,
        }
    }
}

impl WireFormat {
    /// Bytes produced per second of audio.
    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.channels as usize * (self.bit_depth as usize / 8)
    }

    /// Bytes in one frame of `frame_duration_ms`.
    ///
    /// ## Example:
    /// 32,000 bytes/s × 20ms / 1000 = 640 bytes
    pub fn frame_size(&self) -> usize {
        self.bytes_per_second() * self.frame_duration_ms as usize / 1000
    }

    /// Playback duration of one frame.
    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.frame_duration_ms as u64)
    }

    /// Playback duration of `bytes` of audio in this format.
    pub fn duration_of(&self, bytes: usize) -> Duration {
        let bps = self.bytes_per_second();
        if bps == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros((bytes as u64 * 1_000_000) / bps as u64)
    }

    /// Check that this is the only format the relay speaks.
    ///
    /// The relay does no transcoding, so anything other than 16kHz 16-bit mono
    /// with a frame of exactly `FRAME_SIZE` bytes is rejected.
    pub fn validate(&self) -> Result<(), String> {
        if self.bit_depth != 16 {
            return Err(format!("Unsupported bit depth: {} (expected 16)", self.bit_depth));
        }
        if self.channels != 1 {
            return Err(format!("Unsupported channel count: {} (expected mono)", self.channels));
        }
        if self.frame_size() != FRAME_SIZE {
            return Err(format!(
                "Frame size mismatch: format yields {} bytes, wire expects {}",
                self.frame_size(),
                FRAME_SIZE
            ));
        }
        Ok(())
    }
}
