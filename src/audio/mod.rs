//! # Audio Relay Module
//!
//! The pacing core of the relay: synthesized PCM goes in as irregular chunks
//! and comes out as evenly spaced 640-byte frames for the telephony leg.
//!
//! ## Key Components:
//! - **Wire Format**: 16kHz 16-bit mono PCM and the frame/tick constants
//! - **Pacing Clock**: deadline-anchored tick schedule at the frame duration
//! - **Paced Relay Buffer**: append-only buffer drained one frame per tick
//! - **Relay Session**: per-call flags and the tick state machine
//! - **Recorder**: optional best-effort copy of the outbound stream

pub mod buffer;       // Append-only buffer with a frame cursor
pub mod format;       // Wire format constants and frame size derivation
pub mod pacing;       // Deadline-anchored tick schedule
pub mod recorder;     // Best-effort outbound recording
pub mod session;      // Per-call pacing state machine
