//! Time source seam.
//!
//! The idempotency store computes `expires_at` and cleanup cutoffs from an
//! injected clock so TTL behavior is deterministic under test; the projector
//! stamps retry schedules the same way.

use chrono::{DateTime, TimeDelta, Utc};

/// Source of the current wall-clock instant.
pub trait Clock: Send + Sync {
    /// The current instant in UTC.
    fn now(&self) -> DateTime<Utc>;

    /// The current instant shifted by `delta`, saturating at the bounds of
    /// the representable range instead of overflowing.
    fn now_plus(&self, delta: TimeDelta) -> DateTime<Utc> {
        let saturated = if delta < TimeDelta::zero() {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        };
        self.now().checked_add_signed(delta).unwrap_or(saturated)
    }
}

/// Clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PinnedClock(DateTime<Utc>);

    impl Clock for PinnedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    #[test]
    fn test_now_plus_shifts_by_the_delta() {
        let t0 = DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let clock = PinnedClock(t0);

        assert_eq!(clock.now_plus(TimeDelta::hours(2)), t0 + TimeDelta::hours(2));
        assert_eq!(clock.now_plus(TimeDelta::hours(-2)), t0 - TimeDelta::hours(2));
    }

    #[test]
    fn test_now_plus_saturates_instead_of_overflowing() {
        let clock = PinnedClock(DateTime::<Utc>::MAX_UTC);

        assert_eq!(clock.now_plus(TimeDelta::days(1)), DateTime::<Utc>::MAX_UTC);
    }
}
