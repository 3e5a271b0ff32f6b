//! # Synthesis Wire Protocol
//!
//! JSON messages exchanged with the Cartesia TTS WebSocket.
//!
//! ## Message Format:
//! - **Relay → Cartesia**: one generation request per call
//! - **Cartesia → Relay**: a sequence of JSON objects, each optionally
//!   carrying base64-encoded PCM in `data` and/or `done: true`
//!
//! ```json
//! {"type":"chunk","data":"AAECAw==","done":false,"status_code":206,"context_id":"..."}
//! {"type":"done","done":true,"status_code":200,"context_id":"..."}
//! ```

use crate::audio::format::WireFormat;
use crate::config::SynthesisConfig;
use crate::error::{RelayError, RelayResult};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use serde::{Deserialize, Serialize};

/// Generation request sent once after connecting.
#[derive(Debug, Clone, Serialize)]
pub struct SynthesisRequest {
    pub model_id: String,
    pub transcript: String,
    pub voice: VoiceSelector,
    pub output_format: OutputFormat,
    pub context_id: String,
    /// No further transcript will follow on this context
    #[serde(rename = "continue")]
    pub continue_context: bool,
}

/// Voice chosen by id.
#[derive(Debug, Clone, Serialize)]
pub struct VoiceSelector {
    pub mode: String,
    pub id: String,
}

/// Audio container requested from the backend; matches the telephony leg so
/// no transcoding is needed.
#[derive(Debug, Clone, Serialize)]
pub struct OutputFormat {
    pub container: String,
    pub encoding: String,
    pub sample_rate: u32,
}

impl SynthesisRequest {
    /// Build the request for one call.
    pub fn new(config: &SynthesisConfig, format: &WireFormat, transcript: &str, context_id: &str) -> Self {
        Self {
            model_id: config.model_id.clone(),
            transcript: transcript.to_string(),
            voice: VoiceSelector {
                mode: "id".to_string(),
                id: config.voice_id.clone(),
            },
            output_format: OutputFormat {
                container: "raw".to_string(),
                encoding: "pcm_s16le".to_string(),
                sample_rate: format.sample_rate,
            },
            context_id: context_id.to_string(),
            continue_context: false,
        }
    }
}

/// One response message from the backend.
///
/// Every field is optional on the wire; unknown fields (word timestamps,
/// step times) are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SynthesisMessage {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,

    /// Base64-encoded PCM
    #[serde(default)]
    pub data: Option<String>,

    /// All audio for the context has been sent
    #[serde(default)]
    pub done: bool,

    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub status_code: Option<u16>,

    #[serde(default)]
    pub context_id: Option<String>,
}

/// Decoded form of a response handed to the session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SynthesisChunk {
    /// Raw PCM, if the message carried any
    pub audio: Option<Vec<u8>>,

    /// End-of-content for this call
    pub done: bool,
}

impl SynthesisMessage {
    pub fn parse(text: &str) -> RelayResult<Self> {
        serde_json::from_str(text).map_err(|e| RelayError::InvalidPayload(format!("Malformed message: {}", e)))
    }

    /// Whether the message is for `context_id`. Messages that carry no
    /// context id are accepted.
    pub fn belongs_to(&self, context_id: &str) -> bool {
        self.context_id.as_deref().map_or(true, |id| id == context_id)
    }

    pub fn is_error(&self) -> bool {
        self.kind.as_deref() == Some("error") || self.error.is_some()
    }

    /// Decode the audio payload, if any. An empty string counts as no audio.
    pub fn decode_audio(&self) -> RelayResult<Option<Vec<u8>>> {
        match self.data.as_deref() {
            None | Some("") => Ok(None),
            Some(encoded) => BASE64_STANDARD
                .decode(encoded)
                .map(Some)
                .map_err(|e| RelayError::InvalidPayload(format!("Invalid base64 audio: {}", e))),
        }
    }

    /// Whether this message ends the call's content. Backend errors also end
    /// it: nothing more will arrive for the context.
    pub fn ends_content(&self) -> bool {
        self.done || self.is_error()
    }
}
