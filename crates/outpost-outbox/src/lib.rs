//! Outpost Outbox — append events in the caller's transaction, deliver later.
//!
//! The outbox table is written together with the business state that produced
//! the event, inside one transaction, and drained asynchronously by the
//! projector. Rows move forward-only through
//! `NEW → PUBLISHING → {SENT | FAILED → PUBLISHING | DEAD}`.

pub mod record;
pub mod store;

pub use record::{NewOutboxEvent, OutboxRecord, OutboxStatus};
pub use store::{ClaimPartition, OutboxStats, OutboxStore};
