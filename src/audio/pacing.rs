//! # Pacing Clock
//!
//! Tick deadlines for the frame stream, anchored to when the stream started.
//!
//! Tick `n` is due at `anchor + n × period`. A late tick never pushes later
//! ones back, so over any stretch of the call the frames average exactly one
//! period apart, however late individual timer callbacks fire. A callback that
//! runs more than a period late gets a zero wait for the next tick, which
//! catches the stream back up.
//!
//! Times come from `tokio::time::Instant` so tests can drive the clock with
//! paused time.

use std::time::Duration;
use tokio::time::Instant;

/// Deadline-anchored tick schedule.
#[derive(Debug, Clone)]
pub struct PacingClock {
    anchor: Instant,
    period: Duration,
    ticks: u32,
}

impl PacingClock {
    /// Start a schedule at the current time.
    pub fn new(period: Duration) -> Self {
        Self::starting_at(Instant::now(), period)
    }

    pub fn starting_at(anchor: Instant, period: Duration) -> Self {
        Self {
            anchor,
            period,
            ticks: 0,
        }
    }

    /// When the next tick is due.
    pub fn next_deadline(&self) -> Instant {
        self.anchor + self.period * (self.ticks + 1)
    }

    /// Claim the next tick and return how long to wait for it from `now`.
    pub fn advance(&mut self, now: Instant) -> Duration {
        let deadline = self.next_deadline();
        self.ticks += 1;
        deadline.saturating_duration_since(now)
    }

    /// Ticks claimed so far.
    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: Duration = Duration::from_millis(20);

    #[test]
    fn test_on_time_ticks_wait_one_period() {
        let start = Instant::now();
        let mut clock = PacingClock::starting_at(start, PERIOD);

        assert_eq!(clock.advance(start), PERIOD);
        assert_eq!(clock.advance(start + PERIOD), PERIOD);
        assert_eq!(clock.ticks(), 2);
        assert_eq!(clock.next_deadline(), start + PERIOD * 3);
    }

    #[test]
    fn test_late_callback_shortens_the_next_wait() {
        let start = Instant::now();
        let mut clock = PacingClock::starting_at(start, PERIOD);
        clock.advance(start);

        // First callback ran 3ms late; the next deadline does not move
        let wait = clock.advance(start + Duration::from_millis(23));
        assert_eq!(wait, Duration::from_millis(17));
        assert_eq!(clock.next_deadline(), start + PERIOD * 3);
    }

    #[test]
    fn test_stall_catches_up_without_waiting() {
        let start = Instant::now();
        let mut clock = PacingClock::starting_at(start, PERIOD);
        clock.advance(start);

        // Stalled for three periods: the overdue ticks run back to back
        let now = start + Duration::from_millis(75);
        assert_eq!(clock.advance(now), Duration::ZERO);
        assert_eq!(clock.advance(now), Duration::ZERO);
        assert_eq!(clock.advance(now), Duration::from_millis(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_average_spacing_is_the_period() {
        let start = Instant::now();
        let mut clock = PacingClock::new(PERIOD);
        let mut fired = Vec::new();

        for i in 0..100u32 {
            let wait = clock.advance(Instant::now());
            tokio::time::sleep(wait).await;
            // Simulated callback overhead that varies per tick
            tokio::time::advance(Duration::from_micros(u64::from(i % 7) * 300)).await;
            fired.push(Instant::now());
        }

        let last = *fired.last().unwrap();
        let spacing = (last - fired[0]) / 99;
        assert!(spacing >= Duration::from_micros(19_950) && spacing <= Duration::from_micros(20_050));
        assert!(last - start < PERIOD * 100 + Duration::from_millis(2));
    }
}
