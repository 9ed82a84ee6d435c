//! Background projector that drains the transactional outbox.
//!
//! The projector claims due outbox events in batches, publishes each one to
//! a [`outpost_core::bus::MessageBus`] in creation order, and records the
//! result back on the row. Transient publish failures are retried with
//! exponential backoff until the attempt budget is exhausted, at which point
//! the event is dead-lettered for operator inspection.

mod backoff;
mod config;
mod metrics;
mod pacing;
mod projector;

pub use backoff::Backoff;
pub use config::ProjectorConfig;
pub use metrics::{MetricsSnapshot, ProjectorMetrics};
pub use projector::{BatchOutcome, Projector};
