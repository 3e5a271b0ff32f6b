//! # TTS Relay Backend - Main Application Entry Point
//!
//! Relays synthesized speech to a telephony platform in real time.
//!
//! The telephony side opens one WebSocket per call on `/socket`. The relay
//! streams the call's transcript to a TTS backend over a second WebSocket,
//! buffers the PCM it gets back and sends it on as 640-byte frames at a
//! fixed pace, then closes the call shortly after playback ends.
//!
//! ## Key Rust Concepts Used:
//! - **actors**: each call is an actix actor, so its state needs no locks
//! - **async/await**: the upstream pump and the HTTP server share one runtime
//! - **Result<T, E>**: errors propagate with `?` up to `main`
//!
//! ## Application Architecture:
//! - **config**: configuration (defaults, config.toml, environment variables)
//! - **state**: shared configuration and relay counters
//! - **health**: liveness and metrics endpoints
//! - **websocket**: the per-call relay actor and its upgrade endpoint
//! - **audio**: wire format, paced buffer, session state and recorder
//! - **synthesis**: upstream TTS protocol and pump
//! - **calibration**: startup check of the pacing timer
//! - **error**: error types and HTTP error responses

mod audio;
mod calibration;
mod config;
mod error;
mod health;
mod state;
mod synthesis;
mod websocket;

use actix::{Actor, Addr};
use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use calibration::{CalibrationProbe, StopCalibration};
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGINT or SIGTERM arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging** and the TLS provider for the upstream connection
/// 3. **Starts the pacing calibration** in the background
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown** when receiving system signals
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    // Err only means a provider is already installed
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting tts-relay-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {} (synthesis: {}, recording: {})",
        config.bind_addr(),
        config.synthesis.url,
        config.recording.enabled
    );

    let app_state = AppState::new(config.clone());
    let bind_addr = config.bind_addr();

    let calibration = start_calibration(&config, app_state.clone());

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        // Telephony platforms and ops dashboards connect from anywhere
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .route("/socket", web::get().to(websocket::relay_websocket))
            .route("/_/health", web::get().to(health::health_check))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::relay_metrics)),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            if let Some(probe) = &calibration {
                probe.do_send(StopCalibration);
            }
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// ## Environment Variables:
/// - `RUST_LOG`: overrides the filter (e.g. "tts_relay_backend=info")
/// - If not set, defaults to "tts_relay_backend=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tts_relay_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Start the pacing calibration probe when enabled.
///
/// The probe runs on its own actor next to live sessions and its report is
/// stored for the metrics endpoint once it finishes.
fn start_calibration(config: &AppConfig, app_state: AppState) -> Option<Addr<CalibrationProbe>> {
    if !config.calibration.enabled {
        info!("Pacing calibration disabled");
        return None;
    }

    let (tx, rx) = oneshot::channel();
    let probe = CalibrationProbe::new(config.pacing_interval(), config.calibration.cycles)
        .reporting_to(tx)
        .start();

    tokio::spawn(async move {
        match rx.await {
            Ok(report) => app_state.record_calibration(&report),
            Err(_) => warn!("Pacing calibration ended without a report"),
        }
    });

    Some(probe)
}

/// Set up signal handlers for graceful shutdown.
///
/// Listens for SIGTERM and SIGINT and sets the global shutdown flag when
/// either arrives.
fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Wait for the shutdown signal to be set, checking every 100ms.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
