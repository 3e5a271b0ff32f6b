//! # Relay Session State
//!
//! Per-call state behind the relay: the paced buffer, the three lifecycle
//! flags and the optional recorder. The websocket actor owns exactly one
//! `RelaySession` and calls into it from its mailbox, so every method here runs
//! on a single logical thread and takes `&mut self` without locking.
//!
//! ## Pacing States:
//! 1. **Idle**: nothing appended yet
//! 2. **Draining**: at least one full frame is waiting
//! 3. **Underrun**: less than a full frame waiting, more data or end-of-content expected
//! 4. **Closing**: end-of-content seen during an underrun, delayed close scheduled
//! 5. **Closed**: downstream connection gone

use crate::audio::buffer::{FrameRead, PacedRelayBuffer};
use crate::audio::recorder::Recorder;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Transcript used when the call does not supply one.
pub const DEFAULT_TRANSCRIPT: &str = "Hello, how are you today?";

/// Observable pacing state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PacingState {
    Idle,
    Draining,
    Underrun,
    Closing,
    Closed,
}

impl PacingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PacingState::Idle => "idle",
            PacingState::Draining => "draining",
            PacingState::Underrun => "underrun",
            PacingState::Closing => "closing",
            PacingState::Closed => "closed",
        }
    }
}

/// What the caller must do after one pacing tick.
#[derive(Debug, PartialEq, Eq)]
pub enum TickAction {
    /// Buffer empty, nothing to do
    Idle,

    /// Send this frame to the downstream connection
    Frame(Vec<u8>),

    /// A full frame was consumed but the downstream is no longer writable
    Discarded,

    /// Not enough data for a frame this tick
    Underrun,

    /// End of content reached: close the downstream after this delay.
    /// Returned at most once per session.
    ScheduleClose(Duration),
}

/// Counters reported when the session ends.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub started_at: DateTime<Utc>,
    pub chunks_received: u64,
    pub bytes_received: u64,
    pub bytes_dropped: u64,
    pub frames_sent: u64,
}

/// State of one relayed call.
pub struct RelaySession {
    /// Opaque telephony call identifier
    pub call_id: String,

    /// Text sent to the synthesis backend
    pub transcript: String,

    buffer: PacedRelayBuffer,

    /// Downstream still accepts audio
    downstream_writable: bool,

    /// Synthesis reported end-of-content
    pending_close: bool,

    /// Delayed close already scheduled
    closing: bool,

    close_delay: Duration,

    recorder: Option<Recorder>,

    stats: SessionStats,
}

impl RelaySession {
    /// Create a session for `call_id`.
    ///
    /// ## Parameters:
    /// - **call_id**: identifier supplied by the telephony platform
    /// - **transcript**: already-normalized text (see `normalize_transcript`)
    /// - **frame_size**: bytes per outbound frame
    /// - **close_delay**: wait between end-of-playback and closing downstream
    pub fn new(call_id: String, transcript: String, frame_size: usize, close_delay: Duration) -> Self {
        Self {
            call_id,
            transcript,
            buffer: PacedRelayBuffer::new(frame_size),
            downstream_writable: true,
            pending_close: false,
            closing: false,
            close_delay,
            recorder: None,
            stats: SessionStats {
                started_at: Utc::now(),
                chunks_received: 0,
                bytes_received: 0,
                bytes_dropped: 0,
                frames_sent: 0,
            },
        }
    }

    /// Attach a recorder that receives every delivered frame.
    pub fn with_recorder(mut self, recorder: Recorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Turn the raw `tts_text` query value into the synthesis transcript.
    ///
    /// Callers encode spaces as `_` to keep the URL simple. A missing or blank
    /// value falls back to `default`.
    pub fn normalize_transcript(raw: Option<&str>, default: &str) -> String {
        let text = raw.map(|t| t.replace('_', " ")).unwrap_or_default();
        if text.trim().is_empty() {
            default.to_string()
        } else {
            text
        }
    }

    /// Append a decoded synthesis chunk.
    ///
    /// Dropped when the downstream is gone so the buffer stops growing after a
    /// hang-up. Returns whether the bytes were kept.
    pub fn append_audio(&mut self, audio: &[u8]) -> bool {
        self.stats.chunks_received += 1;
        self.stats.bytes_received += audio.len() as u64;

        if !self.downstream_writable {
            self.stats.bytes_dropped += audio.len() as u64;
            return false;
        }

        self.buffer.append(audio);
        true
    }

    /// Synthesis backend has delivered everything for this transcript.
    pub fn mark_end_of_content(&mut self) {
        self.pending_close = true;
    }

    /// Downstream connection closed: stop accepting and sending audio.
    pub fn on_downstream_close(&mut self) {
        self.downstream_writable = false;
    }

    /// Run the drain algorithm once.
    pub fn tick(&mut self) -> TickAction {
        match self.buffer.next_frame() {
            FrameRead::Empty => TickAction::Idle,
            FrameRead::Frame(frame) => {
                if !self.downstream_writable {
                    return TickAction::Discarded;
                }
                if let Some(recorder) = &self.recorder {
                    recorder.record(frame);
                }
                self.stats.frames_sent += 1;
                TickAction::Frame(frame.to_vec())
            }
            FrameRead::Underrun { .. } => {
                if self.pending_close && !self.closing {
                    self.closing = true;
                    TickAction::ScheduleClose(self.close_delay)
                } else {
                    TickAction::Underrun
                }
            }
        }
    }

    /// End-of-content with nothing ever buffered. Ticks stay `Idle` in that
    /// case, so the caller schedules the close from here instead. Shares the
    /// once-only guard with `tick`.
    pub fn close_without_playback(&mut self) -> Option<Duration> {
        if self.pending_close && !self.closing && self.buffer.is_empty() {
            self.closing = true;
            Some(self.close_delay)
        } else {
            None
        }
    }

    pub fn state(&self) -> PacingState {
        if !self.downstream_writable {
            PacingState::Closed
        } else if self.closing {
            PacingState::Closing
        } else if self.buffer.is_empty() {
            PacingState::Idle
        } else if self.buffer.has_full_frame() {
            PacingState::Draining
        } else {
            PacingState::Underrun
        }
    }

    pub fn is_pending_close(&self) -> bool {
        self.pending_close
    }

    #[cfg(test)]
    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// Unsent bytes, used for upstream backpressure.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.pending()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Detach the recorder so it can be finished off the actor.
    pub fn take_recorder(&mut self) -> Option<Recorder> {
        self.recorder.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::{CLOSE_DELAY, FRAME_SIZE};

    fn session() -> RelaySession {
        RelaySession::new("call-test".to_string(), DEFAULT_TRANSCRIPT.to_string(), FRAME_SIZE, CLOSE_DELAY)
    }

    fn frames_until_quiet(session: &mut RelaySession, ticks: usize) -> Vec<TickAction> {
        (0..ticks).map(|_| session.tick()).collect()
    }

    #[test]
    fn test_normalize_transcript() {
        assert_eq!(
            RelaySession::normalize_transcript(Some("Your_appointment_is_at_noon"), DEFAULT_TRANSCRIPT),
            "Your appointment is at noon"
        );
        assert_eq!(RelaySession::normalize_transcript(None, DEFAULT_TRANSCRIPT), DEFAULT_TRANSCRIPT);
        assert_eq!(RelaySession::normalize_transcript(Some("___"), DEFAULT_TRANSCRIPT), DEFAULT_TRANSCRIPT);
        assert_eq!(RelaySession::normalize_transcript(Some("Hi there"), DEFAULT_TRANSCRIPT), "Hi there");
    }

    #[test]
    fn test_idle_until_first_chunk() {
        let mut session = session();
        assert_eq!(session.state(), PacingState::Idle);
        assert_eq!(session.tick(), TickAction::Idle);
        assert_eq!(session.state(), PacingState::Idle);
    }

    #[test]
    fn test_scenario_two_frames_in_one_chunk() {
        let mut session = session();
        session.append_audio(&[7u8; 1280]);
        assert_eq!(session.state(), PacingState::Draining);

        let actions = frames_until_quiet(&mut session, 6);
        let sent: Vec<_> = actions
            .iter()
            .filter_map(|a| match a {
                TickAction::Frame(f) => Some(f.len()),
                _ => None,
            })
            .collect();
        assert_eq!(sent, vec![FRAME_SIZE, FRAME_SIZE]);
        assert!(actions[2..].iter().all(|a| *a == TickAction::Underrun));
        assert_eq!(session.state(), PacingState::Underrun);
    }

    #[test]
    fn test_scenario_leftover_held_back() {
        let mut session = session();
        session.append_audio(&[1u8; 900]);

        assert!(matches!(session.tick(), TickAction::Frame(_)));
        assert_eq!(session.tick(), TickAction::Underrun);
        assert_eq!(session.pending_bytes(), 260);

        session.append_audio(&[2u8; 380]);
        match session.tick() {
            TickAction::Frame(frame) => {
                assert_eq!(frame.len(), FRAME_SIZE);
                assert!(frame[..260].iter().all(|b| *b == 1));
                assert!(frame[260..].iter().all(|b| *b == 2));
            }
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn test_scenario_end_of_content_schedules_close_once() {
        let mut session = session();
        session.append_audio(&[0u8; 640]);
        session.mark_end_of_content();

        assert!(matches!(session.tick(), TickAction::Frame(_)));
        assert_eq!(session.tick(), TickAction::ScheduleClose(CLOSE_DELAY));
        assert_eq!(session.state(), PacingState::Closing);

        // 4 seconds of ticks while the close timer is pending
        let later = frames_until_quiet(&mut session, 200);
        assert!(later.iter().all(|a| *a == TickAction::Underrun));
        assert!(session.is_closing());
    }

    #[test]
    fn test_close_waits_for_buffer_to_drain() {
        let mut session = session();
        session.append_audio(&[0u8; FRAME_SIZE * 3]);
        session.mark_end_of_content();

        let actions = frames_until_quiet(&mut session, 5);
        assert!(matches!(actions[0], TickAction::Frame(_)));
        assert!(matches!(actions[1], TickAction::Frame(_)));
        assert!(matches!(actions[2], TickAction::Frame(_)));
        assert_eq!(actions[3], TickAction::ScheduleClose(CLOSE_DELAY));
        assert_eq!(actions[4], TickAction::Underrun);
    }

    #[test]
    fn test_end_of_content_before_any_audio_stays_idle() {
        let mut session = session();
        session.mark_end_of_content();
        assert_eq!(session.tick(), TickAction::Idle);
        assert!(!session.is_closing());

        assert_eq!(session.close_without_playback(), Some(CLOSE_DELAY));
        assert_eq!(session.close_without_playback(), None);
        assert_eq!(session.tick(), TickAction::Idle);
    }

    #[test]
    fn test_close_without_playback_ignored_once_audio_arrived() {
        let mut session = session();
        session.append_audio(&[0u8; 100]);
        session.mark_end_of_content();
        assert_eq!(session.close_without_playback(), None);
        assert_eq!(session.tick(), TickAction::ScheduleClose(CLOSE_DELAY));
    }

    #[test]
    fn test_configured_close_delay_is_reported() {
        let delay = Duration::from_millis(250);
        let mut session = RelaySession::new("c".into(), "t".into(), FRAME_SIZE, delay);
        session.append_audio(&[0u8; 10]);
        session.mark_end_of_content();
        assert_eq!(session.tick(), TickAction::ScheduleClose(delay));
    }

    #[test]
    fn test_scenario_disconnect_before_delivery() {
        let mut session = session();
        session.on_downstream_close();
        assert_eq!(session.state(), PacingState::Closed);

        assert!(!session.append_audio(&[9u8; 6400]));
        assert_eq!(session.buffered_bytes(), 0);
        assert_eq!(session.stats().bytes_dropped, 6400);

        let actions = frames_until_quiet(&mut session, 20);
        assert!(actions.iter().all(|a| *a == TickAction::Idle));
        assert_eq!(session.stats().frames_sent, 0);
    }

    #[test]
    fn test_no_frames_after_disconnect_mid_stream() {
        let mut session = session();
        session.append_audio(&[3u8; FRAME_SIZE * 4]);
        assert!(matches!(session.tick(), TickAction::Frame(_)));

        session.on_downstream_close();
        assert!(!session.append_audio(&[3u8; FRAME_SIZE]));
        assert_eq!(session.buffered_bytes(), FRAME_SIZE * 4);

        let actions = frames_until_quiet(&mut session, 10);
        assert!(actions.iter().all(|a| !matches!(a, TickAction::Frame(_))));
        assert_eq!(session.stats().frames_sent, 1);
    }

    #[tokio::test]
    async fn test_recording_matches_delivered_frames() {
        let dir = std::env::temp_dir().join(format!("tts-relay-session-{}", uuid::Uuid::new_v4()));
        let recorder = Recorder::start(&dir, "call-rec", chrono::Local::now());
        let path = recorder.path().to_path_buf();
        let mut session = session().with_recorder(recorder);

        let audio: Vec<u8> = (0..FRAME_SIZE * 4).map(|i| (i / FRAME_SIZE + 1) as u8).collect();
        session.append_audio(&audio);

        let mut delivered = Vec::new();
        for _ in 0..2 {
            match session.tick() {
                TickAction::Frame(frame) => delivered.extend_from_slice(&frame),
                other => panic!("expected frame, got {:?}", other),
            }
        }

        // Hang-up: the remaining two frames are consumed but never delivered
        session.on_downstream_close();
        assert_eq!(session.tick(), TickAction::Discarded);
        assert_eq!(session.tick(), TickAction::Discarded);

        session.take_recorder().unwrap().finish().await;
        let recorded = tokio::fs::read(&path).await.unwrap();
        assert_eq!(recorded, delivered);
        assert_eq!(recorded, audio[..FRAME_SIZE * 2].to_vec());
        assert_eq!(session.stats().frames_sent, 2);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[test]
    fn test_stats_track_received_bytes() {
        let mut session = session();
        session.append_audio(&[0u8; 100]);
        session.append_audio(&[0u8; 1000]);
        assert_eq!(session.stats().chunks_received, 2);
        assert_eq!(session.stats().bytes_received, 1100);
        assert_eq!(session.pending_bytes(), 1100);
    }
}
