use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Liveness probe used by the hosting platform. Fixed body, no checks.
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().body("Ok")
}

pub async fn relay_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.config();
    let uptime_seconds = state.get_uptime_seconds();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": "tts-relay-backend",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "sessions": {
            "active": metrics.active_sessions,
            "started": metrics.sessions_started,
            "completed": metrics.sessions_completed,
            "failed": metrics.sessions_failed,
            "failure_rate": if metrics.sessions_started > 0 {
                metrics.sessions_failed as f64 / metrics.sessions_started as f64
            } else {
                0.0
            }
        },
        "audio": {
            "frames_sent": metrics.frames_sent,
            "bytes_received": metrics.bytes_received,
            "seconds_sent": metrics.frames_sent as f64
                * config.relay.wire_format.frame_duration().as_secs_f64()
        },
        "relay": {
            "pacing_interval_ms": config.pacing_interval().as_millis() as u64,
            "close_delay_ms": config.relay.close_delay_ms,
            "frame_size": config.relay.wire_format.frame_size(),
            "max_pending_bytes": config.relay.max_pending_bytes,
            "recording_enabled": config.recording.enabled
        },
        "calibration": metrics.calibration
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{body::to_bytes, test, App};

    #[actix_web::test]
    async fn test_health_returns_ok() {
        let app = test::init_service(App::new().route("/_/health", web::get().to(health_check))).await;
        let resp = test::call_service(&app, test::TestRequest::get().uri("/_/health").to_request()).await;

        assert!(resp.status().is_success());
        let body = to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(&body[..], b"Ok");
    }

    #[actix_web::test]
    async fn test_metrics_snapshot() {
        let state = AppState::new(AppConfig::default());
        state.session_started();
        state.session_ended(false, 50, 32_000);

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/api/v1/metrics", web::get().to(relay_metrics)),
        )
        .await;
        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/v1/metrics").to_request()).await;

        assert_eq!(body["sessions"]["started"], 1);
        assert_eq!(body["sessions"]["completed"], 1);
        assert_eq!(body["audio"]["frames_sent"], 50);
        assert_eq!(body["audio"]["seconds_sent"], 1.0);
        assert_eq!(body["relay"]["frame_size"], 640);
        assert_eq!(body["relay"]["pacing_interval_ms"], 20);
        assert!(body["calibration"].is_null());
    }
}
