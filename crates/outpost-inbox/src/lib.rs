//! Outpost Inbox — record processed message ids for effectively-once
//! consumption.
//!
//! Deduplication rests entirely on the `message_id` primary key: the second
//! insert attempt for the same id fails at the storage layer, never in
//! application logic.

pub mod record;
pub mod store;

pub use record::{InboxRecord, NewInboxMessage};
pub use store::{InboxStore, hash_payload};
