//! Exponential backoff schedule for failed publish attempts.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;

/// Exponential backoff with jitter.
///
/// The delay for attempt `n` (1-based) is `base_delay * 2^(n-1)`, capped at
/// `max_delay`, with up to `jitter_factor` of the delay added or subtracted
/// so retries from concurrent workers spread out instead of thundering.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Fraction of the delay randomized in either direction, in `0.0..=1.0`.
    pub jitter_factor: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.1,
        }
    }
}

impl Backoff {
    /// Returns the jittered delay before retry attempt `attempt` (1-based).
    /// Attempt 0 is treated as attempt 1.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let uncapped = self
            .base_delay
            .checked_mul(2u32.saturating_pow(exponent))
            .unwrap_or(self.max_delay);
        let capped = uncapped.min(self.max_delay);

        if self.jitter_factor <= 0.0 {
            return capped;
        }

        let spread = capped.as_secs_f64() * self.jitter_factor;
        let offset = rand::rng().random_range(-spread..=spread);
        Duration::from_secs_f64((capped.as_secs_f64() + offset).max(0.0))
    }

    /// Returns the wall-clock instant at which attempt `attempt` becomes due,
    /// relative to `now`.
    #[must_use]
    pub fn next_retry_at(&self, attempt: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let delay = self.delay_for_attempt(attempt);
        let delta = TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX);
        now.checked_add_signed(delta).unwrap_or(now)
    }
}
