//! Projector tuning knobs.

use std::time::Duration;

use outpost_outbox::ClaimPartition;

use crate::backoff::Backoff;

/// Configuration for a [`crate::Projector`].
#[derive(Debug, Clone)]
pub struct ProjectorConfig {
    /// Maximum number of events claimed per polling pass.
    pub batch_size: i64,
    /// Publish attempts granted to an event before it is dead-lettered.
    pub max_retry_attempts: u32,
    /// Pause after a full batch, while more work is likely queued.
    pub sleep_busy: Duration,
    /// Initial pause after an empty pass.
    pub sleep_idle: Duration,
    /// Ceiling for the idle pause as consecutive empty passes accumulate.
    pub sleep_idle_max: Duration,
    /// Age after which a PUBLISHING claim is considered abandoned.
    pub visibility_timeout: Duration,
    /// How often the stuck-claim reclaim pass runs.
    pub reclaim_interval: Duration,
    /// Restricts this projector to one slice of the aggregate hash space.
    /// `None` claims across all aggregates.
    pub partition: Option<ClaimPartition>,
    /// Retry schedule for transient publish failures.
    pub backoff: Backoff,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_retry_attempts: 5,
            sleep_busy: Duration::from_millis(50),
            sleep_idle: Duration::from_millis(500),
            sleep_idle_max: Duration::from_secs(5),
            visibility_timeout: Duration::from_secs(300),
            reclaim_interval: Duration::from_secs(60),
            partition: None,
            backoff: Backoff::default(),
        }
    }
}
