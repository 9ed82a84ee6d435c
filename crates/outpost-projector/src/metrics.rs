//! Projector counters, readable from outside the worker loop.

use std::sync::atomic::{AtomicU64, Ordering};

/// Cumulative counters maintained by a running [`crate::Projector`].
#[derive(Debug, Default)]
pub struct ProjectorMetrics {
    events_claimed: AtomicU64,
    events_published: AtomicU64,
    events_retried: AtomicU64,
    events_dead_lettered: AtomicU64,
    events_reclaimed: AtomicU64,
    batches_processed: AtomicU64,
}

/// Point-in-time copy of [`ProjectorMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub events_claimed: u64,
    pub events_published: u64,
    pub events_retried: u64,
    pub events_dead_lettered: u64,
    pub events_reclaimed: u64,
    pub batches_processed: u64,
}

impl ProjectorMetrics {
    pub(crate) fn record_claimed(&self, count: u64) {
        self.events_claimed.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retried(&self) {
        self.events_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dead_lettered(&self) {
        self.events_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reclaimed(&self, count: u64) {
        self.events_reclaimed.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_batch(&self) {
        self.batches_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_claimed: self.events_claimed.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            events_retried: self.events_retried.load(Ordering::Relaxed),
            events_dead_lettered: self.events_dead_lettered.load(Ordering::Relaxed),
            events_reclaimed: self.events_reclaimed.load(Ordering::Relaxed),
            batches_processed: self.batches_processed.load(Ordering::Relaxed),
        }
    }
}
