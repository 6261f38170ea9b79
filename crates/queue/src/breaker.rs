//! Failure-isolating circuit breaker.
//!
//! Tracks consecutive job failures. At the threshold the breaker opens
//! and the scheduler stops starting new work (queued tasks stay queued;
//! the running task is never interrupted). It closes again after a fixed
//! cooldown from the moment it opened, or immediately on manual reset.

use std::time::{Duration, Instant};

use tracing::{info, warn};

#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            consecutive_failures: 0,
            opened_at: None,
        }
    }

    /// Whether the breaker currently blocks new task starts.
    ///
    /// Purely time-based once open; [`try_close`](Self::try_close) performs
    /// the actual close transition when the cooldown has elapsed.
    pub fn is_open(&self) -> bool {
        match self.opened_at {
            Some(opened) => opened.elapsed() < self.cooldown,
            None => false,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Record a job failure. Returns `true` if this failure opened the
    /// breaker.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        if self.opened_at.is_none() && self.consecutive_failures >= self.threshold {
            warn!(
                failures = self.consecutive_failures,
                cooldown_secs = self.cooldown.as_secs(),
                "circuit breaker opened"
            );
            self.opened_at = Some(Instant::now());
            return true;
        }
        false
    }

    /// Record a successful completion, zeroing the failure streak.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Close the breaker if its cooldown has elapsed. Returns `true` on
    /// the open → closed transition.
    pub fn try_close(&mut self) -> bool {
        match self.opened_at {
            Some(opened) if opened.elapsed() >= self.cooldown => {
                info!("circuit breaker closed after cooldown");
                self.opened_at = None;
                self.consecutive_failures = 0;
                true
            }
            _ => false,
        }
    }

    /// Force-close regardless of cooldown and zero the failure streak.
    /// Returns `true` if the breaker was open.
    pub fn reset(&mut self) -> bool {
        let was_open = self.opened_at.take().is_some();
        self.consecutive_failures = 0;
        if was_open {
            info!("circuit breaker manually reset");
        }
        was_open
    }

    /// Time remaining until the breaker may close, if open.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        self.opened_at
            .map(|opened| self.cooldown.saturating_sub(opened.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(cooldown_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(3, Duration::from_millis(cooldown_ms))
    }

    #[test]
    fn opens_at_threshold() {
        let mut b = breaker(30_000);
        assert!(!b.record_failure());
        assert!(!b.record_failure());
        assert!(!b.is_open());
        assert!(b.record_failure());
        assert!(b.is_open());
        assert_eq!(b.consecutive_failures(), 3);
    }

    #[test]
    fn success_resets_streak() {
        let mut b = breaker(30_000);
        b.record_failure();
        b.record_failure();
        b.record_success();
        assert_eq!(b.consecutive_failures(), 0);
        assert!(!b.record_failure());
        assert!(!b.is_open());
    }

    #[test]
    fn auto_closes_after_cooldown() {
        let mut b = breaker(0);
        for _ in 0..3 {
            b.record_failure();
        }
        // Zero cooldown: already elapsed.
        assert!(!b.is_open());
        assert!(b.try_close());
        assert_eq!(b.consecutive_failures(), 0);
    }

    #[test]
    fn manual_reset_closes_immediately() {
        let mut b = breaker(60_000);
        for _ in 0..3 {
            b.record_failure();
        }
        assert!(b.is_open());
        assert!(b.reset());
        assert!(!b.is_open());
        assert_eq!(b.consecutive_failures(), 0);
        // Reset while closed reports no transition.
        assert!(!b.reset());
    }

    #[test]
    fn cooldown_remaining_only_while_open() {
        let mut b = breaker(60_000);
        assert!(b.cooldown_remaining().is_none());
        for _ in 0..3 {
            b.record_failure();
        }
        assert!(b.cooldown_remaining().unwrap() <= Duration::from_millis(60_000));
    }
}
