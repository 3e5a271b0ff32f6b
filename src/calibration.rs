//! # Pacing Timer Calibration
//!
//! Startup diagnostic that measures how the session pacing clock actually
//! behaves on this machine.
//!
//! Each frame carries 20ms of audio, so the realized spacing between ticks has
//! to average 20ms: faster and the telephony side's jitter buffer overflows,
//! slower and playback stutters. The probe drives the same deadline-anchored
//! `PacingClock` a session uses, through the same actor timers, for a bounded
//! number of cycles, logs the average and stops itself. It shares nothing
//! with any session.

use crate::audio::pacing::PacingClock;
use actix::prelude::*;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{info, warn};

/// How far the realized average may sit from the frame duration.
pub const CALIBRATION_TOLERANCE: Duration = Duration::from_micros(100);

/// Outcome of a calibration run.
#[derive(Debug, Clone)]
pub struct CalibrationReport {
    /// Ticks observed
    pub ticks: u32,

    /// Realized mean spacing between ticks
    pub average: Duration,

    /// Spacing the stream needs (one frame's duration)
    pub target: Duration,

    /// Ran all cycles (false when stopped early)
    pub completed: bool,
}

impl CalibrationReport {
    pub fn average_ms(&self) -> f64 {
        self.average.as_secs_f64() * 1000.0
    }

    /// Average is within `CALIBRATION_TOLERANCE` of real time, either side.
    pub fn within_target(&self) -> bool {
        let drift = if self.average > self.target {
            self.average - self.target
        } else {
            self.target - self.average
        };
        self.ticks > 0 && drift <= CALIBRATION_TOLERANCE
    }
}

/// Stop the probe before it has run all its cycles.
#[derive(Message)]
#[rtype(result = "()")]
pub struct StopCalibration;

/// Self-terminating actor that samples tick spacing.
pub struct CalibrationProbe {
    period: Duration,
    cycles: u32,

    clock: PacingClock,
    count: u32,
    first_tick: Option<Instant>,
    last_tick: Option<Instant>,

    ticker: Option<SpawnHandle>,
    report_to: Option<oneshot::Sender<CalibrationReport>>,
}

impl CalibrationProbe {
    /// Probe a `period` schedule for `cycles` ticks.
    pub fn new(period: Duration, cycles: u32) -> Self {
        Self {
            period,
            cycles,
            clock: PacingClock::new(period),
            count: 0,
            first_tick: None,
            last_tick: None,
            ticker: None,
            report_to: None,
        }
    }

    /// Also deliver the final report on `tx`.
    pub fn reporting_to(mut self, tx: oneshot::Sender<CalibrationReport>) -> Self {
        self.report_to = Some(tx);
        self
    }

    fn schedule_tick(&mut self, ctx: &mut Context<Self>) {
        let wait = self.clock.advance(Instant::now());
        self.ticker = Some(ctx.run_later(wait, |act, ctx| act.on_tick(ctx)));
    }

    fn on_tick(&mut self, ctx: &mut Context<Self>) {
        let now = Instant::now();
        self.first_tick.get_or_insert(now);
        self.last_tick = Some(now);
        self.count += 1;

        if self.count >= self.cycles {
            self.finish(ctx, true);
        } else {
            self.schedule_tick(ctx);
        }
    }

    /// Mean spacing between the first and last observed tick.
    fn report(&self, completed: bool) -> CalibrationReport {
        let average = match (self.first_tick, self.last_tick) {
            (Some(first), Some(last)) if self.count > 1 => (last - first) / (self.count - 1),
            _ => Duration::ZERO,
        };

        CalibrationReport {
            ticks: self.count,
            average,
            target: self.period,
            completed,
        }
    }

    fn finish(&mut self, ctx: &mut Context<Self>, completed: bool) {
        if let Some(handle) = self.ticker.take() {
            ctx.cancel_future(handle);
        }

        let report = self.report(completed);
        if !completed {
            info!(ticks = report.ticks, "Pacing calibration stopped early");
        } else if report.within_target() {
            info!(
                average_ms = report.average_ms(),
                target_ms = report.target.as_millis() as u64,
                "Average pacing timer matches the frame duration"
            );
        } else {
            warn!(
                average_ms = report.average_ms(),
                target_ms = report.target.as_millis() as u64,
                "Average pacing timer is off target; frames will not play out in real time"
            );
        }

        if let Some(tx) = self.report_to.take() {
            let _ = tx.send(report);
        }
        ctx.stop();
    }
}

impl Actor for CalibrationProbe {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let wait = self.period * self.cycles;
        info!(
            "Wait around {} seconds to see the actual pacing timer average",
            wait.as_secs()
        );

        self.clock = PacingClock::new(self.period);
        self.schedule_tick(ctx);
    }
}

impl Handler<StopCalibration> for CalibrationProbe {
    type Result = ();

    fn handle(&mut self, _msg: StopCalibration, ctx: &mut Self::Context) {
        self.finish(ctx, false);
    }
}
