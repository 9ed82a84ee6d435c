//! Deterministic clocks for TTL and retry-schedule assertions.

use chrono::{DateTime, TimeDelta, Utc};
use outpost_core::clock::Clock;

/// Clock pinned to a single instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    /// The same clock moved by `delta`; handy for building before/after-expiry
    /// pairs around one reference instant.
    #[must_use]
    pub fn shifted(self, delta: TimeDelta) -> Self {
        Self(self.0 + delta)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
