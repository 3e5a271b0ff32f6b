//! # Configuration Management
//!
//! This module handles loading the relay's configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - The environment names used by hosting platforms and older deployments
//!   (`CARTESIA_API_KEY`, `RECORD_ALL_AUDIO`, `VCR_PORT`, `PORT`, `HOST`)
//! - Default values (built into the code)
//!
//! Configuration is loaded once at process start and never changes afterwards;
//! every session sees the same values.
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Platform/legacy environment variables
//! 2. `APP_` environment variables (`APP_RELAY__CLOSE_DELAY_MS=3000`)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use crate::audio::format::{WireFormat, CLOSE_DELAY};
use crate::audio::session::DEFAULT_TRANSCRIPT;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// ## Rust Concepts:
/// - **#[derive(...)]**: `Serialize` lets the defaults seed the config builder,
///   `Deserialize` turns the merged sources back into this struct
/// - **Nested structs**: one struct per TOML table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub synthesis: SynthesisConfig,
    pub relay: RelayConfig,
    pub recording: RecordingConfig,
    pub calibration: CalibrationConfig,
}

/// Where the HTTP/WebSocket server listens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Upstream text-to-speech backend (Cartesia WebSocket API).
///
/// ## Fields:
/// - `api_key`: secret credential, sent as a query parameter on connect
/// - `url`: WebSocket endpoint
/// - `api_version`: value of the `cartesia_version` query parameter
/// - `model_id` / `voice_id`: model and voice selectors for every request
#[derive(Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    pub api_key: String,
    pub url: String,
    pub api_version: String,
    pub model_id: String,
    pub voice_id: String,
}

/// Keep the API key out of logs.
impl std::fmt::Debug for SynthesisConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisConfig")
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("url", &self.url)
            .field("api_version", &self.api_version)
            .field("model_id", &self.model_id)
            .field("voice_id", &self.voice_id)
            .finish()
    }
}

/// Pacing and teardown tuning.
///
/// Frames are paced at the wire format's frame duration.
///
/// ## Fields:
/// - `close_delay_ms`: wait after end-of-playback before closing the call leg
/// - `max_pending_bytes`: unsent bytes at which upstream reads pause
/// - `default_transcript`: spoken when the call supplies no text
/// - `wire_format`: PCM format of both legs (no transcoding is done)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub close_delay_ms: u64,
    pub max_pending_bytes: usize,
    pub default_transcript: String,
    pub wire_format: WireFormat,
}

/// Optional recording of the outbound stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    pub enabled: bool,
    pub directory: PathBuf,
}

/// Startup measurement of the interval scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    pub enabled: bool,
    pub cycles: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),   // Telephony platform connects from outside
                port: 6000,
            },
            synthesis: SynthesisConfig {
                api_key: String::new(),
                url: "wss://api.cartesia.ai/tts/websocket".to_string(),
                api_version: "2024-06-10".to_string(),
                model_id: "sonic-2".to_string(),
                voice_id: "a0e99841-438c-4a64-b679-ae501e7d6091".to_string(),
            },
            relay: RelayConfig {
                close_delay_ms: CLOSE_DELAY.as_millis() as u64,
                max_pending_bytes: 1_920_000,   // One minute of 16kHz 16-bit mono
                default_transcript: DEFAULT_TRANSCRIPT.to_string(),
                wire_format: WireFormat::default(),
            },
            recording: RecordingConfig {
                enabled: false,
                directory: PathBuf::from("./recordings"),
            },
            calibration: CalibrationConfig {
                enabled: true,
                cycles: 2000,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=7000`: Override server port
    /// - `APP_RELAY__CLOSE_DELAY_MS=3000`: Override the close delay
    /// - `CARTESIA_API_KEY=...`: Synthesis credential
    /// - `RECORD_ALL_AUDIO=true`: Record every call's outbound stream
    /// - `VCR_PORT=3000` / `PORT=3000`: Port assigned by the hosting platform
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        for (key, value) in legacy_overrides(|name| env::var(name).ok()) {
            settings = settings.set_override(key, value)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - A synthesis API key is present
    /// - Close delay is non-zero
    /// - The backpressure threshold holds at least one frame
    /// - The wire format is the one the relay speaks
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.synthesis.api_key.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "Synthesis API key is missing (set CARTESIA_API_KEY or synthesis.api_key)"
            ));
        }

        if self.relay.close_delay_ms == 0 {
            return Err(anyhow::anyhow!("Close delay must be greater than 0"));
        }

        if self.relay.max_pending_bytes < self.relay.wire_format.frame_size() {
            return Err(anyhow::anyhow!(
                "max_pending_bytes must hold at least one frame ({} bytes)",
                self.relay.wire_format.frame_size()
            ));
        }

        self.relay.wire_format.validate().map_err(|e| anyhow::anyhow!(e))?;

        if self.calibration.enabled && self.calibration.cycles == 0 {
            return Err(anyhow::anyhow!("Calibration cycles must be greater than 0"));
        }

        Ok(())
    }

    /// Spacing between outbound frames: one frame's playback duration.
    pub fn pacing_interval(&self) -> Duration {
        self.relay.wire_format.frame_duration()
    }

    pub fn close_delay(&self) -> Duration {
        Duration::from_millis(self.relay.close_delay_ms)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Map platform/legacy environment variables onto config keys.
///
/// `VCR_PORT` (Vonage Cloud Runtime) wins over `PORT`. `RECORD_ALL_AUDIO` only
/// enables recording for the exact value `true`.
fn legacy_overrides<F>(lookup: F) -> Vec<(&'static str, String)>
where
    F: Fn(&str) -> Option<String>,
{
    let mut overrides = Vec::new();

    if let Some(key) = lookup("CARTESIA_API_KEY") {
        overrides.push(("synthesis.api_key", key));
    }

    if let Some(record) = lookup("RECORD_ALL_AUDIO") {
        let enabled = record == "true";
        overrides.push(("recording.enabled", enabled.to_string()));
    }

    if let Some(host) = lookup("HOST") {
        overrides.push(("server.host", host));
    }

    if let Some(port) = lookup("VCR_PORT").or_else(|| lookup("PORT")) {
        overrides.push(("server.port", port));
    }

    overrides
}
