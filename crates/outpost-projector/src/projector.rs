//! The claim/publish/mark worker loop.

use std::collections::HashSet;
use std::sync::Arc;

use outpost_core::bus::{MessageBus, PublishError};
use outpost_core::clock::Clock;
use outpost_core::error::StoreError;
use outpost_outbox::{OutboxRecord, OutboxStore};
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::ProjectorConfig;
use crate::metrics::ProjectorMetrics;
use crate::pacing::Pacer;

/// Result of one [`Projector::run_once`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Rows claimed in this pass.
    pub claimed: usize,
    /// Rows delivered and marked `SENT`.
    pub published: usize,
    /// Rows scheduled for another attempt.
    pub retried: usize,
    /// Rows dead-lettered.
    pub dead_lettered: usize,
    /// Rows returned unattempted because an earlier event of the same
    /// aggregate failed in this batch.
    pub released: usize,
}

/// Drains the outbox: claims due events, publishes them to the bus in
/// creation order, and records the result on each row.
///
/// Events are published one at a time. When an event fails, later events of
/// the same aggregate in the batch are released unattempted so the aggregate's
/// stream is never delivered out of order.
pub struct Projector {
    store: OutboxStore,
    bus: Arc<dyn MessageBus>,
    clock: Arc<dyn Clock>,
    config: ProjectorConfig,
    metrics: Arc<ProjectorMetrics>,
}

impl Projector {
    /// Creates a projector over `store`, delivering to `bus`.
    #[must_use]
    pub fn new(
        store: OutboxStore,
        bus: Arc<dyn MessageBus>,
        clock: Arc<dyn Clock>,
        config: ProjectorConfig,
    ) -> Self {
        Self {
            store,
            bus,
            clock,
            config,
            metrics: Arc::new(ProjectorMetrics::default()),
        }
    }

    /// The counters maintained by this projector.
    #[must_use]
    pub fn metrics(&self) -> Arc<ProjectorMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Claims one batch and publishes it sequentially.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` when the claim itself or a status update fails at
    /// the database. A row that disappeared under us (reclaimed elsewhere) is
    /// logged and skipped, not an error.
    pub async fn run_once(&self) -> Result<BatchOutcome, StoreError> {
        let batch = self
            .store
            .claim_batch(self.config.batch_size, self.config.partition)
            .await?;

        let mut outcome = BatchOutcome {
            claimed: batch.len(),
            ..BatchOutcome::default()
        };
        self.metrics.record_claimed(batch.len() as u64);
        self.metrics.record_batch();

        let mut blocked: HashSet<Uuid> = HashSet::new();

        for record in batch {
            if let Some(aggregate_id) = record.aggregate_id
                && blocked.contains(&aggregate_id)
            {
                self.release_unattempted(&record).await?;
                outcome.released += 1;
                continue;
            }

            match self
                .bus
                .publish(&record.topic, &record.payload, &record.metadata)
                .await
            {
                Ok(()) => {
                    self.apply(self.store.mark_sent(record.event_id), &record)
                        .await?;
                    self.metrics.record_published();
                    outcome.published += 1;
                }
                Err(PublishError::Transient(reason)) => {
                    if self.handle_transient(&record, &reason).await? {
                        outcome.dead_lettered += 1;
                    } else {
                        outcome.retried += 1;
                    }
                    if let Some(aggregate_id) = record.aggregate_id {
                        blocked.insert(aggregate_id);
                    }
                }
                Err(PublishError::Permanent(reason)) => {
                    tracing::error!(
                        event_id = %record.event_id,
                        topic = %record.topic,
                        %reason,
                        "permanent publish failure, dead-lettering event"
                    );
                    self.apply(self.store.mark_dead(record.event_id, &reason), &record)
                        .await?;
                    self.metrics.record_dead_lettered();
                    outcome.dead_lettered += 1;
                    if let Some(aggregate_id) = record.aggregate_id {
                        blocked.insert(aggregate_id);
                    }
                }
            }
        }

        Ok(outcome)
    }

    /// Runs until `shutdown` flips to `true`. The in-flight batch always
    /// finishes; only the pacing sleeps are interruptible.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            batch_size = self.config.batch_size,
            max_retry_attempts = self.config.max_retry_attempts,
            "projector started"
        );

        let mut pacer = Pacer::new(
            self.config.sleep_busy,
            self.config.sleep_idle,
            self.config.sleep_idle_max,
        );
        let mut next_reclaim = Instant::now();

        while !*shutdown.borrow() {
            if Instant::now() >= next_reclaim {
                match self.store.reclaim_stuck(self.config.visibility_timeout).await {
                    Ok(reclaimed) => self.metrics.record_reclaimed(reclaimed),
                    Err(err) => {
                        tracing::error!(error = %err, "stuck-claim reclaim pass failed");
                    }
                }
                next_reclaim = Instant::now() + self.config.reclaim_interval;
            }

            let pause = match self.run_once().await {
                Ok(outcome) => pacer.next_pause(outcome.claimed),
                Err(err) => {
                    tracing::error!(error = %err, "projector pass failed");
                    pacer.next_pause(0)
                }
            };

            tokio::select! {
                () = tokio::time::sleep(pause) => {}
                _ = shutdown.changed() => {}
            }
        }

        let snapshot = self.metrics.snapshot();
        tracing::info!(?snapshot, "projector stopped");
    }

    /// Records a transient failure: dead-letters once the attempt budget is
    /// spent, otherwise schedules the next attempt. Returns `true` if the
    /// event was dead-lettered.
    async fn handle_transient(
        &self,
        record: &OutboxRecord,
        reason: &str,
    ) -> Result<bool, StoreError> {
        let attempts = u32::try_from(record.retry_count).unwrap_or(0) + 1;

        if attempts >= self.config.max_retry_attempts {
            tracing::error!(
                event_id = %record.event_id,
                topic = %record.topic,
                attempts,
                %reason,
                "retry budget exhausted, dead-lettering event"
            );
            self.apply(self.store.mark_dead(record.event_id, reason), record)
                .await?;
            self.metrics.record_dead_lettered();
            return Ok(true);
        }

        let retry_after = self.config.backoff.next_retry_at(attempts, self.clock.now());
        tracing::warn!(
            event_id = %record.event_id,
            topic = %record.topic,
            attempts,
            %retry_after,
            %reason,
            "transient publish failure, scheduling retry"
        );
        self.apply(
            self.store.mark_failed(record.event_id, reason, retry_after),
            record,
        )
        .await?;
        self.metrics.record_retried();
        Ok(false)
    }

    /// Releases a claimed row whose aggregate already failed in this batch,
    /// aligning its next attempt with the failing event's.
    async fn release_unattempted(&self, record: &OutboxRecord) -> Result<(), StoreError> {
        let retry_after = self
            .config
            .backoff
            .next_retry_at(u32::try_from(record.retry_count).unwrap_or(0) + 1, self.clock.now());
        self.apply(self.store.release(record.event_id, retry_after), record)
            .await
    }

    /// Applies a status update, tolerating rows that were reclaimed while we
    /// held them past the visibility timeout.
    async fn apply(
        &self,
        update: impl Future<Output = Result<(), StoreError>>,
        record: &OutboxRecord,
    ) -> Result<(), StoreError> {
        match update.await {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound(_)) => {
                tracing::warn!(
                    event_id = %record.event_id,
                    "claim lost before status update, row was reclaimed"
                );
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

impl std::fmt::Debug for Projector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Projector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
