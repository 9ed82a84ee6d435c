//! Inbox row types.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Input for [`crate::store::InboxStore::mark_processed`].
#[derive(Debug, Clone)]
pub struct NewInboxMessage {
    /// Broker message id; the sole deduplication key.
    pub message_id: Uuid,
    /// Type name of the consumed event.
    pub event_type: String,
    /// Originating service or topic, if known.
    pub source: Option<String>,
    /// SHA-256 fingerprint of the consumed payload, for audit.
    pub payload_hash: Option<String>,
    /// Free-form consumer bookkeeping.
    pub extra_data: Option<serde_json::Value>,
}

impl NewInboxMessage {
    /// Creates a new message record with the required fields.
    #[must_use]
    pub fn new(message_id: Uuid, event_type: impl Into<String>) -> Self {
        Self {
            message_id,
            event_type: event_type.into(),
            source: None,
            payload_hash: None,
            extra_data: None,
        }
    }
}

/// A persisted inbox row. Created exactly once per successfully processed
/// message, inside the same transaction as the side effect it guards; never
/// updated afterwards.
#[derive(Debug, Clone, FromRow)]
pub struct InboxRecord {
    /// Broker message id (primary key).
    pub message_id: Uuid,
    /// Opaque partition key.
    pub tenant_id: String,
    /// Type name of the consumed event.
    pub event_type: String,
    /// Originating service or topic.
    pub source: Option<String>,
    /// When the message was processed.
    pub processed_at: DateTime<Utc>,
    /// SHA-256 fingerprint of the consumed payload.
    pub payload_hash: Option<String>,
    /// Free-form consumer bookkeeping.
    pub extra_data: Option<serde_json::Value>,
}
