//! Reconnect backoff
//!
//! Exponential backoff with jitter for the controller link: base 1s,
//! doubling per attempt, capped at 60s, with a ±20% jitter so a fleet of
//! agents does not reconnect in lockstep.

use std::time::Duration;

use rand::Rng;

/// Exponent cap; past this the pre-jitter delay is pinned to `cap` anyway.
const MAX_ATTEMPT_SHIFT: u32 = 16;

/// Exponential backoff state for one reconnect loop.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    /// Create a backoff starting at `base` and never exceeding `cap`
    /// (before jitter).
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempt: 0,
        }
    }

    /// The delay to wait before the next attempt; advances the state.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt.min(MAX_ATTEMPT_SHIFT));
        let raw = self.base.saturating_mul(factor).min(self.cap);
        self.attempt = self.attempt.saturating_add(1);

        let jitter = rand::thread_rng().gen_range(0.8..=1.2);
        raw.mul_f64(jitter)
    }

    /// Reset after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds(expected: Duration) -> (Duration, Duration) {
        (expected.mul_f64(0.8), expected.mul_f64(1.2))
    }

    #[test]
    fn test_delays_double_within_jitter() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));

        for expected_secs in [1u64, 2, 4, 8] {
            let delay = backoff.next_delay();
            let (lo, hi) = bounds(Duration::from_secs(expected_secs));
            assert!(
                delay >= lo && delay <= hi,
                "delay {delay:?} outside [{lo:?}, {hi:?}]"
            );
        }
    }

    #[test]
    fn test_delay_caps_out() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        for _ in 0..20 {
            backoff.next_delay();
        }
        let delay = backoff.next_delay();
        let (lo, hi) = bounds(Duration::from_secs(60));
        assert!(delay >= lo && delay <= hi, "capped delay out of range: {delay:?}");
    }

    #[test]
    fn test_reset_restarts_at_base() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();

        let delay = backoff.next_delay();
        let (lo, hi) = bounds(Duration::from_secs(1));
        assert!(delay >= lo && delay <= hi);
    }

    #[test]
    fn test_no_overflow_on_many_attempts() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        for _ in 0..10_000 {
            let delay = backoff.next_delay();
            assert!(delay <= Duration::from_secs(72));
        }
    }
}
