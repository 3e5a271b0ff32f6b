//! # Telephony Relay WebSocket
//!
//! The telephony platform connects to `/socket` once per call and expects a
//! stream of binary PCM frames back. Each connection is one actor that owns
//! the call's `RelaySession`, so every state change (appending synthesis
//! audio, pacing ticks, close scheduling, hang-up) runs one at a time in the
//! actor's mailbox.
//!
//! ## Connection Lifecycle:
//! 1. **Upgrade**: `GET /socket?peer_uuid=<call id>&tts_text=<words_with_underscores>`
//! 2. **Synthesis**: a pump task opens the upstream TTS socket and feeds
//!    decoded audio chunks to this actor
//! 3. **Pacing**: one 640-byte frame is sent downstream per frame duration,
//!    on deadlines anchored to the session start so the stream keeps real time
//! 4. **End of playback**: once synthesis is done and the buffer has no full
//!    frame left, the socket is closed after the close delay
//! 5. **Teardown**: on any stop the timers are cancelled, the upstream socket
//!    is closed and the recording is flushed
//!
//! ## Message Format:
//! - **Server → Client**: binary frames of 16-bit little-endian PCM, 16kHz mono
//! - **Client → Server**: text is logged, binary is ignored

use crate::audio::pacing::PacingClock;
use crate::audio::session::{RelaySession, TickAction};
use crate::audio::recorder::Recorder;
use crate::config::AppConfig;
use crate::error::RelayError;
use crate::state::AppState;
use crate::synthesis::client::SynthesisPump;
use crate::synthesis::protocol::SynthesisRequest;
use crate::synthesis::{PendingBytes, SessionLink, SynthesisDelivered, SynthesisStatus};

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use chrono::Local;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Query parameters on the relay upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct RelayQuery {
    /// Call identifier assigned by the telephony platform
    pub peer_uuid: Option<String>,

    /// Transcript with `_` standing in for spaces
    pub tts_text: Option<String>,
}

/// Use the platform's call id, or make one up so logs and recordings still
/// have something to key on.
fn resolve_call_id(peer_uuid: Option<String>) -> String {
    match peer_uuid.filter(|id| !id.trim().is_empty()) {
        Some(id) => id,
        None => {
            let id = Uuid::new_v4().to_string();
            warn!(call_id = %id, "Relay request has no peer_uuid, using a generated call id");
            id
        }
    }
}

/// WebSocket actor relaying one call.
///
/// ## Actor Model:
/// The upstream pump runs as a separate task and only talks to this actor
/// through messages, so the session needs no locks.
pub struct RelayWebSocket {
    session: RelaySession,

    app_state: web::Data<AppState>,

    config: Arc<AppConfig>,

    /// Tick deadlines
    clock: PacingClock,

    /// Next pending tick
    ticker: Option<SpawnHandle>,

    /// Delayed close after end of playback
    close_timer: Option<SpawnHandle>,

    /// Tells the pump to close the upstream socket
    upstream_shutdown: Option<oneshot::Sender<()>>,

    /// Session ended because of an upstream failure
    failed: bool,
}

impl RelayWebSocket {
    pub fn new(session: RelaySession, app_state: web::Data<AppState>) -> Self {
        let config = app_state.config();
        Self {
            session,
            app_state,
            clock: PacingClock::new(config.pacing_interval()),
            config,
            ticker: None,
            close_timer: None,
            upstream_shutdown: None,
            failed: false,
        }
    }

    /// Spawn the pump that streams synthesis audio into this actor.
    fn start_synthesis(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let context_id = Uuid::new_v4().to_string();
        let request = SynthesisRequest::new(
            &self.config.synthesis,
            &self.config.relay.wire_format,
            &self.session.transcript,
            &context_id,
        );

        let pump = SynthesisPump::new(
            self.session.call_id.clone(),
            self.config.synthesis.clone(),
            request,
            SessionLink::to(&ctx.address()),
            self.config.relay.max_pending_bytes,
            self.config.relay.wire_format.frame_duration(),
        );

        let (tx, rx) = oneshot::channel();
        self.upstream_shutdown = Some(tx);
        tokio::spawn(pump.run(rx));
    }

    /// Arm the timer for the next tick deadline. Each tick re-arms it until
    /// teardown takes the handle.
    fn schedule_tick(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let wait = self.clock.advance(Instant::now());
        self.ticker = Some(ctx.run_later(wait, |act, ctx| {
            act.on_tick(ctx);
            if act.ticker.is_some() && ctx.state().alive() {
                act.schedule_tick(ctx);
            }
        }));
    }

    /// One pacing tick.
    fn on_tick(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        match self.session.tick() {
            TickAction::Frame(frame) => ctx.binary(frame),
            TickAction::ScheduleClose(delay) => self.schedule_close(delay, ctx),
            TickAction::Idle | TickAction::Underrun | TickAction::Discarded => {}
        }
    }

    fn schedule_close(&mut self, delay: Duration, ctx: &mut ws::WebsocketContext<Self>) {
        info!(
            call_id = %self.session.call_id,
            delay_ms = delay.as_millis() as u64,
            "End of TTS playback, closing WebSocket after delay"
        );

        self.close_timer = Some(ctx.run_later(delay, |act, ctx| {
            act.close_timer = None;
            info!(call_id = %act.session.call_id, "Closing WebSocket to telephony side");
            ctx.close(Some(ws::CloseReason {
                code: ws::CloseCode::Normal,
                description: Some("end of playback".to_string()),
            }));
            ctx.stop();
        }));
    }

    /// Synthesis is over; close straight away if nothing was ever buffered,
    /// otherwise the ticker closes once the buffer drains.
    fn end_of_content(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        self.session.mark_end_of_content();
        if let Some(delay) = self.session.close_without_playback() {
            self.schedule_close(delay, ctx);
        }
    }

    /// Cancel timers and release the upstream socket. Safe to call twice.
    fn teardown(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        self.session.on_downstream_close();

        if let Some(handle) = self.ticker.take() {
            ctx.cancel_future(handle);
        }
        if let Some(handle) = self.close_timer.take() {
            ctx.cancel_future(handle);
        }
        if let Some(tx) = self.upstream_shutdown.take() {
            // Err means the pump already finished
            let _ = tx.send(());
        }
    }
}

impl Actor for RelayWebSocket {
    type Context = ws::WebsocketContext<Self>;

    /// Called when the WebSocket connection starts.
    fn started(&mut self, ctx: &mut Self::Context) {
        info!(
            call_id = %self.session.call_id,
            transcript = %self.session.transcript,
            "Relay WebSocket connection started"
        );
        self.app_state.session_started();

        self.clock = PacingClock::new(self.config.pacing_interval());
        self.schedule_tick(ctx);

        self.start_synthesis(ctx);
    }

    fn stopping(&mut self, ctx: &mut Self::Context) -> Running {
        self.teardown(ctx);
        Running::Stop
    }

    /// Called when the WebSocket connection stops.
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(recorder) = self.session.take_recorder() {
            tokio::spawn(recorder.finish());
        }

        let stats = self.session.stats();
        let wire_format = &self.config.relay.wire_format;
        let audio_sent = wire_format.duration_of(stats.frames_sent as usize * wire_format.frame_size());
        self.app_state
            .session_ended(self.failed, stats.frames_sent, stats.bytes_received);

        info!(
            call_id = %self.session.call_id,
            failed = self.failed,
            frames_sent = stats.frames_sent,
            chunks_received = stats.chunks_received,
            bytes_received = stats.bytes_received,
            bytes_dropped = stats.bytes_dropped,
            audio_sent_ms = audio_sent.as_millis() as u64,
            duration_ms = (chrono::Utc::now() - stats.started_at).num_milliseconds(),
            "Relay WebSocket connection stopped"
        );
    }
}

/// Decoded synthesis audio. Replies with the unsent byte count.
impl Handler<SynthesisDelivered> for RelayWebSocket {
    type Result = usize;

    fn handle(&mut self, msg: SynthesisDelivered, ctx: &mut Self::Context) -> usize {
        let chunk = msg.0;

        if let Some(audio) = chunk.audio {
            if !self.session.append_audio(&audio) {
                debug!(call_id = %self.session.call_id, bytes = audio.len(), "Dropped audio after hang-up");
            }
        }

        if chunk.done {
            debug!(
                call_id = %self.session.call_id,
                buffered = self.session.buffered_bytes(),
                state = self.session.state().as_str(),
                "Synthesis signalled end of content"
            );
            self.end_of_content(ctx);
        }

        self.session.pending_bytes()
    }
}

impl Handler<PendingBytes> for RelayWebSocket {
    type Result = usize;

    fn handle(&mut self, _msg: PendingBytes, _ctx: &mut Self::Context) -> usize {
        self.session.pending_bytes()
    }
}

impl Handler<SynthesisStatus> for RelayWebSocket {
    type Result = ();

    fn handle(&mut self, msg: SynthesisStatus, ctx: &mut Self::Context) {
        let call_id = self.session.call_id.clone();

        match msg {
            SynthesisStatus::Connected => {
                debug!(call_id = %call_id, "Synthesis stream open");
            }
            SynthesisStatus::Completed => {
                debug!(call_id = %call_id, "Synthesis stream complete");
            }
            SynthesisStatus::Closed => {
                if !self.session.is_pending_close() {
                    warn!(call_id = %call_id, "Synthesis closed before end of content, playing what arrived");
                    self.end_of_content(ctx);
                }
            }
            SynthesisStatus::Failed(err) => {
                error!(call_id = %call_id, error = %err, kind = err.kind(), "Synthesis failed, ending call");
                self.failed = true;
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Error,
                    description: Some(err.kind().to_string()),
                }));
                ctx.stop();
            }
        }
    }
}

/// Handle incoming WebSocket messages.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RelayWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                info!(call_id = %self.session.call_id, text = %text, "Telephony WebSocket message");
            }
            Ok(ws::Message::Binary(data)) => {
                // Inbound caller audio is not used
                debug!(call_id = %self.session.call_id, bytes = data.len(), "Ignoring inbound audio");
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Close(reason)) => {
                info!(call_id = %self.session.call_id, reason = ?reason, "Telephony WebSocket closed");
                self.session.on_downstream_close();
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(call_id = %self.session.call_id, "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(call_id = %self.session.call_id, error = %err, "WebSocket protocol error");
                self.session.on_downstream_close();
                ctx.stop();
            }
        }
    }
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// Builds the call's session from the query string and hands the connection
/// to a `RelayWebSocket` actor.
pub async fn relay_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let query = web::Query::<RelayQuery>::from_query(req.query_string())
        .map_err(|e| RelayError::BadRequest(format!("Invalid relay query: {}", e)))?
        .into_inner();

    let config = app_state.config();
    let call_id = resolve_call_id(query.peer_uuid);
    let transcript =
        RelaySession::normalize_transcript(query.tts_text.as_deref(), &config.relay.default_transcript);

    info!(
        call_id = %call_id,
        peer = ?req.connection_info().peer_addr(),
        "New relay WebSocket request"
    );

    let mut session = RelaySession::new(
        call_id,
        transcript,
        config.relay.wire_format.frame_size(),
        config.close_delay(),
    );

    if config.recording.enabled {
        let recorder = Recorder::start(&config.recording.directory, &session.call_id, Local::now());
        debug!(call_id = %session.call_id, path = %recorder.path().display(), "Recording outbound audio");
        session = session.with_recorder(recorder);
    }

    ws::start(RelayWebSocket::new(session, app_state), &req, stream)
}
