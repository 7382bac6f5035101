//! # Match Timer
//!
//! Countdown for one match. The timer itself has no side effects; the
//! bridge switches the gate when a match starts, stops or runs out.

use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Serializable timer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchStatus {
    pub running: bool,
    pub remaining_ms: u64,
    pub duration_ms: u64,
}

#[derive(Debug)]
struct TimerState {
    duration: Duration,
    started: Option<Instant>,
}

#[derive(Debug)]
pub struct MatchTimer {
    state: Mutex<TimerState>,
}

impl MatchTimer {
    pub fn new(duration: Duration) -> Self {
        Self {
            state: Mutex::new(TimerState {
                duration,
                started: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Starts the countdown. Returns false if a match is already running.
    pub fn start(&self, now: Instant) -> bool {
        let mut state = self.state();
        if state.started.is_some() {
            return false;
        }
        state.started = Some(now);
        true
    }

    /// Stops the countdown. Returns false if no match was running.
    pub fn stop(&self) -> bool {
        self.state().started.take().is_some()
    }

    pub fn reset(&self) {
        self.state().started = None;
    }

    /// Takes effect immediately, also for a running match.
    pub fn set_duration(&self, duration: Duration) {
        self.state().duration = duration;
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state().started.is_some()
    }

    /// Full duration while stopped, otherwise the time left (never negative).
    #[must_use]
    pub fn remaining(&self, now: Instant) -> Duration {
        let state = self.state();
        match state.started {
            Some(started) => state
                .duration
                .saturating_sub(now.saturating_duration_since(started)),
            None => state.duration,
        }
    }

    /// True if a match is running and its time is up.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.is_running() && self.remaining(now).is_zero()
    }

    #[must_use]
    pub fn status(&self, now: Instant) -> MatchStatus {
        MatchStatus {
            running: self.is_running(),
            remaining_ms: self.remaining(now).as_millis() as u64,
            duration_ms: self.state().duration.as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_MINUTES: Duration = Duration::from_secs(120);

    #[test]
    fn test_idle_timer_reports_full_duration() {
        let timer = MatchTimer::new(TWO_MINUTES);
        let now = Instant::now();
        assert!(!timer.is_running());
        assert_eq!(timer.remaining(now), TWO_MINUTES);
        assert!(!timer.is_expired(now));
    }

    #[test]
    fn test_countdown() {
        let timer = MatchTimer::new(TWO_MINUTES);
        let start = Instant::now();
        assert!(timer.start(start));
        assert!(!timer.start(start + Duration::from_secs(5)));

        assert_eq!(timer.remaining(start + Duration::from_secs(20)), Duration::from_secs(100));
        assert!(!timer.is_expired(start + Duration::from_secs(119)));
        assert!(timer.is_expired(start + Duration::from_secs(120)));
        assert_eq!(timer.remaining(start + Duration::from_secs(500)), Duration::ZERO);
    }

    #[test]
    fn test_stop_and_reset() {
        let timer = MatchTimer::new(TWO_MINUTES);
        let start = Instant::now();
        assert!(!timer.stop());
        timer.start(start);
        assert!(timer.stop());
        assert_eq!(timer.remaining(start + Duration::from_secs(30)), TWO_MINUTES);

        timer.start(start);
        timer.reset();
        assert!(!timer.is_running());
    }

    #[test]
    fn test_set_duration() {
        let timer = MatchTimer::new(TWO_MINUTES);
        let start = Instant::now();
        timer.set_duration(Duration::from_secs(60));
        timer.start(start);
        assert_eq!(timer.remaining(start + Duration::from_secs(10)), Duration::from_secs(50));
    }

    #[test]
    fn test_status_serializes() {
        let timer = MatchTimer::new(TWO_MINUTES);
        let json = serde_json::to_value(timer.status(Instant::now())).unwrap();
        assert_eq!(json["running"], false);
        assert_eq!(json["remainingMs"], 120_000);
        assert_eq!(json["durationMs"], 120_000);
    }
}
