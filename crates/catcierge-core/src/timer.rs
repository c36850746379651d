//! Monotonic cooperative timers.
//!
//! All timing decisions in the state machine go through these so nothing
//! depends on the camera frame rate. Wall-clock time is only used for
//! human-facing timestamps (see [`crate::timefmt`]).

use std::time::{Duration, Instant};

/// A resettable timer with an optional timeout.
///
/// The timer is inactive until [`Timer::start`] is called; an inactive
/// timer reports zero elapsed time. `has_timed_out` compares elapsed time
/// against the configured timeout, so a zero timeout times out on the
/// first check after starting.
#[derive(Debug, Clone, Default)]
pub struct Timer {
    start: Option<Instant>,
    timeout: Duration,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the timeout in seconds without touching the start time.
    pub fn set(&mut self, timeout_secs: f64) {
        self.timeout = Duration::from_secs_f64(timeout_secs.max(0.0));
    }

    pub fn timeout(&self) -> f64 {
        self.timeout.as_secs_f64()
    }

    /// Deactivate the timer. Idempotent.
    pub fn reset(&mut self) {
        self.start = None;
    }

    /// (Re)start the timer at the current instant.
    pub fn start(&mut self) {
        self.start = Some(Instant::now());
    }

    pub fn is_active(&self) -> bool {
        self.start.is_some()
    }

    /// Elapsed seconds since start, or 0.0 when inactive.
    pub fn get(&self) -> f64 {
        match self.start {
            Some(start) => start.elapsed().as_secs_f64(),
            None => 0.0,
        }
    }

    pub fn has_timed_out(&self) -> bool {
        self.get() >= self.timeout.as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_inactive_timer_reads_zero() {
        let mut t = Timer::new();
        t.set(10.0);
        assert!(!t.is_active());
        assert_eq!(t.get(), 0.0);
    }

    #[test]
    fn test_elapsed_is_monotonic() {
        let mut t = Timer::new();
        t.set(10.0);
        t.start();
        let a = t.get();
        thread::sleep(Duration::from_millis(10));
        let b = t.get();
        assert!(a >= 0.0);
        assert!(b >= a);
    }

    #[test]
    fn test_reset_then_start() {
        let mut t = Timer::new();
        t.set(0.05);
        t.start();
        thread::sleep(Duration::from_millis(60));
        assert!(t.has_timed_out());

        t.reset();
        assert!(!t.is_active());
        t.start();
        assert!(t.is_active());
        assert!(t.get() < 0.05);
    }

    #[test]
    fn test_zero_timeout_times_out_immediately() {
        let mut t = Timer::new();
        t.set(0.0);
        t.start();
        assert!(t.has_timed_out());
    }

    #[test]
    fn test_timeout_not_reached() {
        let mut t = Timer::new();
        t.set(30.0);
        t.start();
        assert!(!t.has_timed_out());
    }
}
