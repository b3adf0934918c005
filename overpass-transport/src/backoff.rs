//! Error backoff policy.
//!
//! Sustained broker failure must not turn into a hot retry loop. The policy
//! counts consecutive failures; once the count reaches a threshold the
//! driver starts pausing between attempts, and each further failure grows
//! the pause multiplicatively. A single success resets everything.

use std::time::{Duration, Instant};

use crate::config::TransportConfig;

/// Tracks consecutive backend failures and computes pause windows.
#[derive(Debug)]
pub struct ErrorBackoff {
    base: Duration,
    multiplier: f64,
    threshold: u32,
    consecutive_errors: u32,
    pause: Duration,
    pause_until: Option<Instant>,
}

impl ErrorBackoff {
    /// Create a backoff tracker with the given policy.
    pub fn new(base: Duration, multiplier: f64, threshold: u32) -> Self {
        Self {
            base,
            multiplier,
            threshold,
            consecutive_errors: 0,
            pause: base,
            pause_until: None,
        }
    }

    /// Create a backoff tracker from a transport configuration.
    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(
            config.error_pause_base,
            config.error_pause_multiplier,
            config.error_count_threshold,
        )
    }

    /// Record a failed backend call.
    ///
    /// Reaching the threshold starts pausing at the base duration; every
    /// failure past it multiplies the pause first.
    pub fn record_failure(&mut self, now: Instant) {
        self.consecutive_errors += 1;

        if self.consecutive_errors < self.threshold {
            return;
        }
        if self.consecutive_errors > self.threshold {
            self.pause = Duration::from_secs_f64(self.pause.as_secs_f64() * self.multiplier);
        }
        self.pause_until = Some(now + self.pause);

        tracing::warn!(
            consecutive_errors = self.consecutive_errors,
            pause_secs = self.pause.as_secs_f64(),
            "Backend failures over threshold, pausing"
        );
    }

    /// Record a successful backend call, resetting counter and pause.
    pub fn record_success(&mut self) {
        if self.consecutive_errors > 0 {
            tracing::debug!(
                after_errors = self.consecutive_errors,
                "Backend recovered, backoff reset"
            );
        }
        self.consecutive_errors = 0;
        self.pause = self.base;
        self.pause_until = None;
    }

    /// Check whether the driver should sit this tick out.
    pub fn is_paused(&self, now: Instant) -> bool {
        matches!(self.pause_until, Some(until) if now < until)
    }

    /// Remaining pause time, if paused.
    pub fn pause_remaining(&self, now: Instant) -> Option<Duration> {
        match self.pause_until {
            Some(until) if now < until => Some(until - now),
            _ => None,
        }
    }

    /// Current consecutive failure count.
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Current pause duration (the next pause to be applied).
    pub fn current_pause(&self) -> Duration {
        self.pause
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> ErrorBackoff {
        ErrorBackoff::new(Duration::from_secs(1), 2.0, 10)
    }

    #[test]
    fn test_no_pause_below_threshold() {
        let now = Instant::now();
        let mut b = backoff();

        for _ in 0..9 {
            b.record_failure(now);
        }
        assert_eq!(b.consecutive_errors(), 9);
        assert!(!b.is_paused(now));
    }

    #[test]
    fn test_pause_starts_at_threshold() {
        let now = Instant::now();
        let mut b = backoff();

        for _ in 0..10 {
            b.record_failure(now);
        }
        assert!(b.is_paused(now));
        assert_eq!(b.current_pause(), Duration::from_secs(1));
    }

    #[test]
    fn test_pause_multiplies_past_threshold() {
        let now = Instant::now();
        let mut b = backoff();

        for _ in 0..10 {
            b.record_failure(now);
        }
        let before = b.current_pause();

        b.record_failure(now);
        assert_eq!(b.current_pause(), Duration::from_secs(2));
        assert_eq!(
            b.current_pause().as_secs_f64(),
            before.as_secs_f64() * 2.0
        );

        b.record_failure(now);
        assert_eq!(b.current_pause(), Duration::from_secs(4));
    }

    #[test]
    fn test_success_resets_counter_and_pause() {
        let now = Instant::now();
        let mut b = backoff();

        for _ in 0..12 {
            b.record_failure(now);
        }
        assert!(b.is_paused(now));

        b.record_success();
        assert_eq!(b.consecutive_errors(), 0);
        assert_eq!(b.current_pause(), Duration::from_secs(1));
        assert!(!b.is_paused(now));
    }

    #[test]
    fn test_pause_expires() {
        let now = Instant::now();
        let mut b = backoff();

        for _ in 0..10 {
            b.record_failure(now);
        }
        assert!(b.is_paused(now));
        assert!(!b.is_paused(now + Duration::from_secs(2)));
        assert_eq!(b.pause_remaining(now), Some(Duration::from_secs(1)));
    }
}
