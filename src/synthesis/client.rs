//! # Synthesis Pump
//!
//! Owns one call's upstream WebSocket to the TTS backend.
//!
//! ## Lifecycle:
//! 1. **Connect**: open the socket (bounded by a timeout, no retry)
//! 2. **Request**: send the generation request for the call's transcript
//! 3. **Pump**: decode each response and deliver it to the session actor,
//!    pausing reads while the session holds too much unsent audio
//! 4. **Close**: after end-of-content, when the session goes away, or when
//!    the shutdown signal fires, send a close frame upstream
//!
//! Failures are reported to the session as `SynthesisStatus::Failed` and only
//! end that session.

use super::protocol::{SynthesisChunk, SynthesisMessage, SynthesisRequest};
use super::{PendingBytes, SessionLink, SynthesisDelivered, SynthesisStatus};
use crate::config::SynthesisConfig;
use crate::error::{RelayError, RelayResult};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

/// Upper bound on the upstream handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the read loop should do after handling one message.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Finished,
    SessionGone,
}

/// Build the connect URL with credentials as query parameters.
///
/// ## Example:
/// `wss://api.cartesia.ai/tts/websocket?api_key=sk-...&cartesia_version=2024-06-10`
pub fn connect_url(config: &SynthesisConfig) -> RelayResult<Url> {
    let url = Url::parse_with_params(
        &config.url,
        &[
            ("api_key", config.api_key.as_str()),
            ("cartesia_version", config.api_version.as_str()),
        ],
    )?;
    Ok(url)
}

/// Open the upstream socket. Any failure is fatal to the session.
pub async fn connect(config: &SynthesisConfig) -> RelayResult<UpstreamSocket> {
    let url = connect_url(config)?;

    match tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url.as_str())).await {
        Ok(Ok((socket, response))) => {
            debug!(status = %response.status(), "Synthesis WebSocket handshake complete");
            Ok(socket)
        }
        Ok(Err(e)) => Err(RelayError::SynthesisConnect(e.to_string())),
        Err(_) => Err(RelayError::SynthesisConnect(format!(
            "timed out after {}s",
            CONNECT_TIMEOUT.as_secs()
        ))),
    }
}

/// Per-call upstream pump.
pub struct SynthesisPump {
    call_id: String,
    config: SynthesisConfig,
    request: SynthesisRequest,
    link: SessionLink,

    /// Unsent bytes at which reads pause
    max_pending_bytes: usize,

    /// How often to re-check the backlog while paused
    backpressure_poll: Duration,
}

impl SynthesisPump {
    pub fn new(
        call_id: String,
        config: SynthesisConfig,
        request: SynthesisRequest,
        link: SessionLink,
        max_pending_bytes: usize,
        backpressure_poll: Duration,
    ) -> Self {
        Self {
            call_id,
            config,
            request,
            link,
            max_pending_bytes,
            backpressure_poll,
        }
    }

    /// Run until the content is complete, the upstream fails, the session
    /// stops, or `shutdown` fires.
    pub async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        let call_id = self.call_id.clone();

        let socket = tokio::select! {
            result = connect(&self.config) => match result {
                Ok(socket) => socket,
                Err(e) => {
                    self.link.status.do_send(SynthesisStatus::Failed(e));
                    return;
                }
            },
            _ = &mut shutdown => {
                debug!(call_id = %call_id, "Session ended before synthesis connected");
                return;
            }
        };

        let (mut write, mut read) = socket.split();

        let request = match serde_json::to_string(&self.request) {
            Ok(json) => json,
            Err(e) => {
                self.link.status.do_send(SynthesisStatus::Failed(e.into()));
                return;
            }
        };
        if let Err(e) = write.send(Message::Text(request)).await {
            self.link.status.do_send(SynthesisStatus::Failed(e.into()));
            return;
        }

        info!(call_id = %call_id, context_id = %self.request.context_id, "Connected to synthesis backend");
        self.link.status.do_send(SynthesisStatus::Connected);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(call_id = %call_id, "Session ended, closing synthesis WebSocket");
                    break;
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => match self.forward(&text).await {
                        Flow::Continue => {}
                        Flow::Finished => {
                            info!(call_id = %call_id, "Synthesis complete, closing synthesis WebSocket");
                            self.link.status.do_send(SynthesisStatus::Completed);
                            break;
                        }
                        Flow::SessionGone => {
                            debug!(call_id = %call_id, "Session mailbox closed, closing synthesis WebSocket");
                            break;
                        }
                    },
                    Some(Ok(Message::Binary(data))) => {
                        debug!(call_id = %call_id, bytes = data.len(), "Ignoring binary synthesis message");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        warn!(call_id = %call_id, frame = ?frame, "Synthesis backend closed the connection");
                        self.link.status.do_send(SynthesisStatus::Closed);
                        return;
                    }
                    Some(Ok(_)) => {
                        // Ping/pong handled by tungstenite
                    }
                    Some(Err(e)) => {
                        self.link.status.do_send(SynthesisStatus::Failed(e.into()));
                        return;
                    }
                    None => {
                        self.link.status.do_send(SynthesisStatus::Closed);
                        return;
                    }
                }
            }
        }

        if let Err(e) = write.send(Message::Close(None)).await {
            debug!(call_id = %call_id, error = %e, "Error closing synthesis WebSocket");
        }
    }

    /// Decode one response and hand it to the session.
    async fn forward(&self, text: &str) -> Flow {
        let message = match SynthesisMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(call_id = %self.call_id, error = %e, "Skipping unparseable synthesis message");
                return Flow::Continue;
            }
        };

        if !message.belongs_to(&self.request.context_id) {
            warn!(
                call_id = %self.call_id,
                context_id = message.context_id.as_deref().unwrap_or_default(),
                "Skipping synthesis message for another context"
            );
            return Flow::Continue;
        }

        if message.is_error() {
            warn!(
                call_id = %self.call_id,
                error = message.error.as_deref().unwrap_or("unknown"),
                status_code = ?message.status_code,
                "Synthesis backend reported an error"
            );
        }

        let audio = match message.decode_audio() {
            Ok(audio) => audio,
            Err(e) => {
                warn!(call_id = %self.call_id, error = %e, "Skipping undecodable audio payload");
                None
            }
        };

        let chunk = SynthesisChunk {
            audio,
            done: message.ends_content(),
        };
        let done = chunk.done;

        let mut pending = match self.link.chunks.send(SynthesisDelivered(chunk)).await {
            Ok(pending) => pending,
            Err(_) => return Flow::SessionGone,
        };

        if done {
            return Flow::Finished;
        }

        // Pause upstream reads until the session drains below the threshold
        while pending > self.max_pending_bytes {
            debug!(call_id = %self.call_id, pending, "Backpressure: pausing synthesis reads");
            tokio::time::sleep(self.backpressure_poll).await;
            pending = match self.link.pending.send(PendingBytes).await {
                Ok(pending) => pending,
                Err(_) => return Flow::SessionGone,
            };
        }

        Flow::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::synthesis::testing::{fake_backend, refused_url};
    use actix::prelude::*;
    use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
    use serde_json::json;

    /// Stand-in session that records what the pump delivers.
    #[derive(Default)]
    struct Collector {
        chunks: Vec<SynthesisChunk>,
        statuses: Vec<String>,
        /// Pending bytes reported back, consumed one per reply
        pending_script: Vec<usize>,
        pending_queries: usize,
    }

    impl Actor for Collector {
        type Context = Context<Self>;
    }

    impl Collector {
        fn next_pending(&mut self) -> usize {
            if self.pending_script.is_empty() {
                0
            } else {
                self.pending_script.remove(0)
            }
        }
    }

    impl Handler<SynthesisDelivered> for Collector {
        type Result = usize;

        fn handle(&mut self, msg: SynthesisDelivered, _ctx: &mut Self::Context) -> usize {
            self.chunks.push(msg.0);
            self.next_pending()
        }
    }

    impl Handler<PendingBytes> for Collector {
        type Result = usize;

        fn handle(&mut self, _msg: PendingBytes, _ctx: &mut Self::Context) -> usize {
            self.pending_queries += 1;
            self.next_pending()
        }
    }

    impl Handler<SynthesisStatus> for Collector {
        type Result = ();

        fn handle(&mut self, msg: SynthesisStatus, _ctx: &mut Self::Context) {
            let label = match msg {
                SynthesisStatus::Connected => "connected".to_string(),
                SynthesisStatus::Completed => "completed".to_string(),
                SynthesisStatus::Closed => "closed".to_string(),
                SynthesisStatus::Failed(e) => format!("failed:{}", e.kind()),
            };
            self.statuses.push(label);
        }
    }

    #[derive(MessageResponse)]
    struct Collected {
        chunks: Vec<SynthesisChunk>,
        statuses: Vec<String>,
        pending_queries: usize,
    }

    #[derive(Message)]
    #[rtype(result = "Collected")]
    struct Snapshot;

    impl Handler<Snapshot> for Collector {
        type Result = Collected;

        fn handle(&mut self, _msg: Snapshot, _ctx: &mut Self::Context) -> Collected {
            Collected {
                chunks: self.chunks.clone(),
                statuses: self.statuses.clone(),
                pending_queries: self.pending_queries,
            }
        }
    }

    fn pump_for(url: String, collector: &Addr<Collector>, max_pending_bytes: usize) -> SynthesisPump {
        let mut config = AppConfig::default();
        config.synthesis.url = url;
        config.synthesis.api_key = "sk-test".to_string();
        let request = SynthesisRequest::new(&config.synthesis, &config.relay.wire_format, "hi there", "ctx-test");

        SynthesisPump::new(
            "call-test".to_string(),
            config.synthesis,
            request,
            SessionLink::to(collector),
            max_pending_bytes,
            Duration::from_millis(1),
        )
    }

    #[test]
    fn test_connect_url_carries_credentials() {
        let mut config = AppConfig::default();
        config.synthesis.api_key = "sk-abc".to_string();
        let url = connect_url(&config.synthesis).unwrap();

        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.host_str(), Some("api.cartesia.ai"));
        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(query.contains(&("api_key".to_string(), "sk-abc".to_string())));
        assert!(query.contains(&("cartesia_version".to_string(), "2024-06-10".to_string())));
    }

    #[actix_web::test]
    async fn test_pump_delivers_chunks_then_closes_upstream() {
        let audio = BASE64_STANDARD.encode([5u8; 900]);
        let (url, server) = fake_backend("hi there", vec![
            json!({"type": "chunk", "data": audio, "done": false}),
            json!({"type": "timestamps", "word_timestamps": {"words": ["hi"]}}),
            json!({"type": "done", "done": true}),
        ])
        .await;

        let collector = Collector::default().start();
        let (_shutdown_tx, shutdown_rx) = oneshot::channel();
        pump_for(url, &collector, usize::MAX).run(shutdown_rx).await;

        assert!(server.await.unwrap(), "relay should close the upstream socket");

        let collected = collector.send(Snapshot).await.unwrap();
        assert_eq!(collected.chunks.len(), 3);
        assert_eq!(collected.chunks[0].audio.as_deref(), Some(&[5u8; 900][..]));
        assert!(!collected.chunks[0].done);
        assert_eq!(collected.chunks[1].audio, None);
        assert!(collected.chunks[2].done);
        assert_eq!(collected.statuses, vec!["connected", "completed"]);
    }

    #[actix_web::test]
    async fn test_skips_messages_for_other_contexts() {
        let (url, server) = fake_backend("hi there", vec![
            json!({"type": "chunk", "data": BASE64_STANDARD.encode([7u8; 640]), "context_id": "ctx-other"}),
            json!({"type": "done", "done": true, "context_id": "ctx-other"}),
            json!({"type": "chunk", "data": BASE64_STANDARD.encode([3u8; 640]), "context_id": "ctx-test"}),
            json!({"type": "chunk", "data": "not base64!", "context_id": "ctx-test"}),
            json!({"type": "done", "done": true, "context_id": "ctx-test"}),
        ])
        .await;

        let collector = Collector::default().start();
        let (_shutdown_tx, shutdown_rx) = oneshot::channel();
        pump_for(url, &collector, usize::MAX).run(shutdown_rx).await;

        assert!(server.await.unwrap());
        let collected = collector.send(Snapshot).await.unwrap();
        // The foreign done does not end this call; a bad payload is skipped
        assert_eq!(collected.chunks.len(), 3);
        assert_eq!(collected.chunks[0].audio.as_deref(), Some(&[3u8; 640][..]));
        assert_eq!(collected.chunks[1].audio, None);
        assert!(!collected.chunks[1].done);
        assert!(collected.chunks[2].done);
        assert_eq!(collected.statuses, vec!["connected", "completed"]);
    }

    #[actix_web::test]
    async fn test_shutdown_closes_upstream() {
        let audio = BASE64_STANDARD.encode([1u8; 640]);
        let (url, server) = fake_backend("hi there", vec![json!({"type": "chunk", "data": audio, "done": false})]).await;

        let collector = Collector::default().start();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let pump = tokio::spawn(pump_for(url, &collector, usize::MAX).run(shutdown_rx));

        // Let the first chunk arrive, then hang up the call
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();
        pump.await.unwrap();

        assert!(server.await.unwrap());
        let collected = collector.send(Snapshot).await.unwrap();
        assert_eq!(collected.chunks.len(), 1);
        assert_eq!(collected.statuses, vec!["connected"]);
    }

    #[actix_web::test]
    async fn test_backpressure_pauses_until_drained() {
        let audio = BASE64_STANDARD.encode([2u8; 640]);
        let (url, server) = fake_backend("hi there", vec![
            json!({"type": "chunk", "data": audio.clone(), "done": false}),
            json!({"type": "chunk", "data": audio, "done": false}),
            json!({"type": "done", "done": true}),
        ])
        .await;

        // First delivery reports a big backlog that drains over three polls
        let collector = Collector {
            pending_script: vec![10_000, 8_000, 4_000, 500],
            ..Collector::default()
        }
        .start();
        let (_shutdown_tx, shutdown_rx) = oneshot::channel();
        pump_for(url, &collector, 1_000).run(shutdown_rx).await;

        assert!(server.await.unwrap());
        let collected = collector.send(Snapshot).await.unwrap();
        assert_eq!(collected.pending_queries, 3);
        assert_eq!(collected.chunks.len(), 3);
    }

    #[actix_web::test]
    async fn test_connect_failure_is_reported() {
        let collector = Collector::default().start();
        let (_shutdown_tx, shutdown_rx) = oneshot::channel();
        pump_for(refused_url().await, &collector, usize::MAX)
            .run(shutdown_rx)
            .await;

        let collected = collector.send(Snapshot).await.unwrap();
        assert!(collected.chunks.is_empty());
        assert_eq!(collected.statuses, vec!["failed:synthesis_connect_error"]);
    }
}
