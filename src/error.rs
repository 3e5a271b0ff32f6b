//! # Error Handling
//!
//! Error types for the relay and how they surface over HTTP.
//!
//! ## Error Categories:
//! - **Fatal to a session**: the synthesis backend cannot be reached or
//!   rejects the request. Only that call ends; other sessions are untouched.
//! - **Skipped**: one synthesis message that cannot be parsed or decoded.
//!   The pump logs it and keeps reading.
//! - **Best-effort**: recording failures. These are logged where they happen
//!   and never turned into a `RelayError` on the audio path.
//! - **Request errors**: a malformed WebSocket upgrade request.
//!
//! ## Rust Concepts:
//! - **enum**: each variant is one failure class carrying a message
//! - **From trait**: lets `?` convert library errors automatically
//! - **ResponseError trait**: converts errors to HTTP responses

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the relay.
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(RelayError::SynthesisConnect("connection refused".to_string()));
/// ```
#[derive(Debug)]
pub enum RelayError {
    /// Could not open the upstream synthesis WebSocket
    SynthesisConnect(String),

    /// Upstream connected but the exchange failed (send error, bad frame)
    SynthesisProtocol(String),

    /// A single synthesis message that cannot be parsed or decoded
    InvalidPayload(String),

    /// Client sent an invalid request
    BadRequest(String),

    /// Configuration problems, such as an unusable synthesis URL
    ConfigError(String),
}

impl RelayError {
    /// Machine-readable error type used in JSON bodies and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::SynthesisConnect(_) => "synthesis_connect_error",
            RelayError::SynthesisProtocol(_) => "synthesis_protocol_error",
            RelayError::InvalidPayload(_) => "invalid_payload",
            RelayError::BadRequest(_) => "bad_request",
            RelayError::ConfigError(_) => "config_error",
        }
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::SynthesisConnect(msg) => write!(f, "Failed to connect to synthesis backend: {}", msg),
            RelayError::SynthesisProtocol(msg) => write!(f, "Synthesis protocol error: {}", msg),
            RelayError::InvalidPayload(msg) => write!(f, "Invalid synthesis payload: {}", msg),
            RelayError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            RelayError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for RelayError {}

/// HTTP mapping for errors raised before a WebSocket upgrade completes.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "bad_request",
///     "message": "...",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for RelayError {
    fn error_response(&self) -> HttpResponse {
        let status = match self {
            RelayError::BadRequest(_) => actix_web::http::StatusCode::BAD_REQUEST,
            RelayError::SynthesisConnect(_)
            | RelayError::SynthesisProtocol(_)
            | RelayError::InvalidPayload(_) => actix_web::http::StatusCode::BAD_GATEWAY,
            RelayError::ConfigError(_) => actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// The generation request could not be encoded.
impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::SynthesisProtocol(format!("JSON parsing error: {}", err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        RelayError::SynthesisProtocol(err.to_string())
    }
}

impl From<url::ParseError> for RelayError {
    fn from(err: url::ParseError) -> Self {
        RelayError::ConfigError(format!("Invalid synthesis URL: {}", err))
    }
}

/// Shorthand for `Result<T, RelayError>`.
pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            RelayError::BadRequest("x".into()).error_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RelayError::SynthesisConnect("x".into()).error_response().status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            RelayError::ConfigError("x".into()).error_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_json_error_maps_to_protocol_error() {
        let err: RelayError = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err().into();
        assert_eq!(err.kind(), "synthesis_protocol_error");
    }
}
