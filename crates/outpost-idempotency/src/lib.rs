//! Outpost Idempotency — cache command outcomes under client-supplied keys.
//!
//! A key binds to one `(operation, request_hash)` pair for its lifetime;
//! replaying the same request returns the cached response, reusing the key
//! with a different request is a conflict. The lock step is a single
//! unique-constraint-backed insert, so it is safe across concurrent API
//! processes.

pub mod record;
pub mod store;

pub use record::{CachedResponse, IdempotencyState, LockOutcome};
pub use store::{IdempotencyStore, hash_request};
