//! Outbox row types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use outpost_core::error::StoreError;
use sqlx::FromRow;
use uuid::Uuid;

/// Delivery state of an outbox row. Transitions are forward-only:
/// `New → Publishing → {Sent | Failed → Publishing | Dead}`; `Dead` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    /// Created by the business write, not yet claimed.
    New,
    /// Claimed by a projector worker.
    Publishing,
    /// Delivered to the bus.
    Sent,
    /// A transient publish failure; eligible again once `retry_after` passes.
    Failed,
    /// Retry budget exhausted or permanently rejected. Manual intervention.
    Dead,
}

impl OutboxStatus {
    /// The database representation of this status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Publishing => "PUBLISHING",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
            Self::Dead => "DEAD",
        }
    }
}

impl TryFrom<&str> for OutboxStatus {
    type Error = StoreError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "NEW" => Ok(Self::New),
            "PUBLISHING" => Ok(Self::Publishing),
            "SENT" => Ok(Self::Sent),
            "FAILED" => Ok(Self::Failed),
            "DEAD" => Ok(Self::Dead),
            other => Err(StoreError::InvalidColumn {
                column: "status",
                value: other.to_owned(),
            }),
        }
    }
}

/// Input for [`crate::store::OutboxStore::add`]. Only `topic` and `payload`
/// are required; everything else defaults to empty/`None`.
#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    /// Destination topic on the message bus.
    pub topic: String,
    /// Opaque event document. Interpreted only by the consumer, tagged by
    /// `schema_id`/`schema_version`.
    pub payload: serde_json::Value,
    /// Transport metadata (correlation ids, actor, ...).
    pub metadata: HashMap<String, String>,
    /// Aggregate that produced the event; drives claim partitioning.
    pub aggregate_id: Option<Uuid>,
    /// Aggregate type name.
    pub aggregate_type: Option<String>,
    /// Broker routing key, if the transport uses one.
    pub routing_key: Option<String>,
    /// Schema registry id tag.
    pub schema_id: Option<String>,
    /// Schema version tag.
    pub schema_version: Option<i32>,
    /// When the domain event occurred. Defaults to the store clock.
    pub occurred_at: Option<DateTime<Utc>>,
}

impl NewOutboxEvent {
    /// Creates a new event with the required fields.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
            metadata: HashMap::new(),
            aggregate_id: None,
            aggregate_type: None,
            routing_key: None,
            schema_id: None,
            schema_version: None,
            occurred_at: None,
        }
    }

    /// Attaches the producing aggregate.
    #[must_use]
    pub fn for_aggregate(mut self, aggregate_id: Uuid, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_id = Some(aggregate_id);
        self.aggregate_type = Some(aggregate_type.into());
        self
    }
}

/// A persisted outbox row. Payload, topic, and aggregate fields are immutable
/// after creation; only status, retry bookkeeping, and the error message
/// mutate, and exclusively through the projector.
#[derive(Debug, Clone)]
pub struct OutboxRecord {
    /// Unique event id (primary key).
    pub event_id: Uuid,
    /// Opaque partition key.
    pub tenant_id: String,
    /// Aggregate that produced the event.
    pub aggregate_id: Option<Uuid>,
    /// Aggregate type name.
    pub aggregate_type: Option<String>,
    /// Destination topic.
    pub topic: String,
    /// When the domain event occurred.
    pub occurred_at: DateTime<Utc>,
    /// Opaque event document.
    pub payload: serde_json::Value,
    /// Transport metadata.
    pub metadata: HashMap<String, String>,
    /// Broker routing key.
    pub routing_key: Option<String>,
    /// Schema registry id tag.
    pub schema_id: Option<String>,
    /// Schema version tag.
    pub schema_version: Option<i32>,
    /// Delivery state.
    pub status: OutboxStatus,
    /// Failed publish attempts so far.
    pub retry_count: i32,
    /// Earliest next delivery attempt for a `Failed` row.
    pub retry_after: Option<DateTime<Utc>>,
    /// When the current `Publishing` claim was taken.
    pub claimed_at: Option<DateTime<Utc>>,
    /// Last publish error, for operator inspection.
    pub error_message: Option<String>,
    /// Insertion time; the claim ordering key.
    pub created_at: DateTime<Utc>,
}

/// Raw database row, converted into [`OutboxRecord`] after status and
/// metadata validation.
#[derive(FromRow)]
pub(crate) struct OutboxRow {
    pub event_id: Uuid,
    pub tenant_id: String,
    pub aggregate_id: Option<Uuid>,
    pub aggregate_type: Option<String>,
    pub topic: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub metadata: serde_json::Value,
    pub routing_key: Option<String>,
    pub schema_id: Option<String>,
    pub schema_version: Option<i32>,
    pub status: String,
    pub retry_count: i32,
    pub retry_after: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<OutboxRow> for OutboxRecord {
    type Error = StoreError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        let status = OutboxStatus::try_from(row.status.as_str())?;
        let metadata: HashMap<String, String> = serde_json::from_value(row.metadata)
            .map_err(|e| StoreError::Serialization(format!("metadata column: {e}")))?;

        Ok(Self {
            event_id: row.event_id,
            tenant_id: row.tenant_id,
            aggregate_id: row.aggregate_id,
            aggregate_type: row.aggregate_type,
            topic: row.topic,
            occurred_at: row.occurred_at,
            payload: row.payload,
            metadata,
            routing_key: row.routing_key,
            schema_id: row.schema_id,
            schema_version: row.schema_version,
            status,
            retry_count: row.retry_count,
            retry_after: row.retry_after,
            claimed_at: row.claimed_at,
            error_message: row.error_message,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_db_representation() {
        for status in [
            OutboxStatus::New,
            OutboxStatus::Publishing,
            OutboxStatus::Sent,
            OutboxStatus::Failed,
            OutboxStatus::Dead,
        ] {
            assert_eq!(OutboxStatus::try_from(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let result = OutboxStatus::try_from("ARCHIVED");
        match result {
            Err(StoreError::InvalidColumn { column, value }) => {
                assert_eq!(column, "status");
                assert_eq!(value, "ARCHIVED");
            }
            other => panic!("expected InvalidColumn, got {other:?}"),
        }
    }
}
