//! # Application State Management
//!
//! State shared by every HTTP handler and every relay session.
//!
//! Sessions share nothing with each other: each one owns its buffer, flags and
//! timers inside its own actor. The only process-wide pieces are the
//! configuration (read-only after startup) and a handful of counters that
//! feed the metrics endpoint.
//!
//! ## Key Rust Concepts:
//! - **Arc**: many handlers and session actors hold the same state
//! - **RwLock**: counters are read by the metrics endpoint while sessions
//!   update them
//! - **Clone**: cloning `AppState` only clones the `Arc`s

use crate::calibration::CalibrationReport;
use crate::config::AppConfig;
use serde::Serialize;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// Shared application state.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Immutable configuration, loaded once at startup
    pub config: Arc<AppConfig>,

    /// Relay counters, updated by sessions
    pub metrics: Arc<RwLock<RelayMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Process-wide relay counters.
///
/// ## Why these metrics matter:
/// - **active_sessions**: calls currently being relayed
/// - **sessions_failed**: upstream connect/protocol failures (session-scoped)
/// - **frames_sent**: 640-byte frames delivered to the telephony side
#[derive(Debug, Default, Clone, Serialize)]
pub struct RelayMetrics {
    pub active_sessions: u32,
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub sessions_failed: u64,
    pub frames_sent: u64,
    pub bytes_received: u64,
    pub calibration: Option<CalibrationSummary>,
}

/// Last pacing calibration result.
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationSummary {
    pub ticks: u32,
    pub average_ms: f64,
    pub target_ms: u64,
    pub within_target: bool,
    pub completed: bool,
}

impl From<&CalibrationReport> for CalibrationSummary {
    fn from(report: &CalibrationReport) -> Self {
        Self {
            ticks: report.ticks,
            average_ms: report.average_ms(),
            target_ms: report.target.as_millis() as u64,
            within_target: report.within_target(),
            completed: report.completed,
        }
    }
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(RelayMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the configuration handle.
    pub fn config(&self) -> Arc<AppConfig> {
        Arc::clone(&self.config)
    }

    /// Counters are plain integers, so a poisoned lock still holds usable data.
    fn metrics_read(&self) -> RwLockReadGuard<'_, RelayMetrics> {
        self.metrics.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn metrics_write(&self) -> RwLockWriteGuard<'_, RelayMetrics> {
        self.metrics.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A call has been accepted.
    pub fn session_started(&self) {
        let mut metrics = self.metrics_write();
        metrics.active_sessions += 1;
        metrics.sessions_started += 1;
    }

    /// A call has ended. `failed` marks a session-fatal upstream failure.
    ///
    /// ## Safety check:
    /// Guards against decrementing below zero.
    pub fn session_ended(&self, failed: bool, frames_sent: u64, bytes_received: u64) {
        let mut metrics = self.metrics_write();
        if metrics.active_sessions > 0 {
            metrics.active_sessions -= 1;
        }
        if failed {
            metrics.sessions_failed += 1;
        } else {
            metrics.sessions_completed += 1;
        }
        metrics.frames_sent += frames_sent;
        metrics.bytes_received += bytes_received;
    }

    pub fn record_calibration(&self, report: &CalibrationReport) {
        self.metrics_write().calibration = Some(report.into());
    }

    /// Snapshot of the counters for the metrics endpoint.
    pub fn get_metrics_snapshot(&self) -> RelayMetrics {
        self.metrics_read().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_session_counters() {
        let state = AppState::new(AppConfig::default());
        state.session_started();
        state.session_started();
        assert_eq!(state.get_metrics_snapshot().active_sessions, 2);

        state.session_ended(false, 150, 96_000);
        state.session_ended(true, 0, 0);

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.active_sessions, 0);
        assert_eq!(metrics.sessions_started, 2);
        assert_eq!(metrics.sessions_completed, 1);
        assert_eq!(metrics.sessions_failed, 1);
        assert_eq!(metrics.frames_sent, 150);
        assert_eq!(metrics.bytes_received, 96_000);
    }

    #[test]
    fn test_active_sessions_never_underflow() {
        let state = AppState::new(AppConfig::default());
        state.session_ended(false, 0, 0);
        assert_eq!(state.get_metrics_snapshot().active_sessions, 0);
    }

    #[test]
    fn test_calibration_summary_recorded() {
        let state = AppState::new(AppConfig::default());
        state.record_calibration(&CalibrationReport {
            ticks: 2000,
            average: Duration::from_micros(19_980),
            target: Duration::from_millis(20),
            completed: true,
        });

        let summary = state.get_metrics_snapshot().calibration.unwrap();
        assert!(summary.within_target);
        assert_eq!(summary.target_ms, 20);
        assert!((summary.average_ms - 19.98).abs() < 1e-9);
    }
}
