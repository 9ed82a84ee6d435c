//! Store error types.

use thiserror::Error;
use uuid::Uuid;

/// Top-level error type for the outbox, inbox, and idempotency stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No row exists for the given id.
    #[error("record not found: {0}")]
    NotFound(Uuid),

    /// An inbound message id was already recorded by the inbox. Callers must
    /// treat this as "already processed": roll back their own side effect and
    /// acknowledge the redelivery.
    #[error("message {0} already processed")]
    DuplicateMessage(Uuid),

    /// An idempotency key was reused with a different operation or request
    /// body. This is a client error, not a retry.
    #[error("idempotency key {key} reused with a different request")]
    IdempotencyConflict {
        /// The reused key.
        key: String,
    },

    /// No pending row exists for the given idempotency key. Raised when a
    /// response is stored for a key that was never locked or already settled.
    #[error("no pending row for idempotency key {0}")]
    KeyNotFound(String),

    /// A stored column held a value outside its expected domain.
    #[error("invalid value {value:?} in column {column}")]
    InvalidColumn {
        /// The offending column.
        column: &'static str,
        /// The value that could not be interpreted.
        value: String,
    },

    /// Payload or metadata (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An underlying database error.
    #[error("database error: {0}")]
    Database(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
