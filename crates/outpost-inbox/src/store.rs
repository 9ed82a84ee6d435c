//! PostgreSQL inbox store.

use outpost_core::error::StoreError;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use sqlx::postgres::PgTransaction;
use uuid::Uuid;

use crate::record::{InboxRecord, NewInboxMessage};

/// SHA-256 hex fingerprint of an event payload.
#[must_use]
pub fn hash_payload(payload: &serde_json::Value) -> String {
    let digest = Sha256::digest(payload.to_string().as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// PostgreSQL-backed inbox store, scoped to one tenant.
#[derive(Debug, Clone)]
pub struct InboxStore {
    pool: PgPool,
    tenant_id: String,
}

impl InboxStore {
    /// Creates a store over `pool` for the given tenant.
    #[must_use]
    pub fn new(pool: PgPool, tenant_id: impl Into<String>) -> Self {
        Self {
            pool,
            tenant_id: tenant_id.into(),
        }
    }

    /// Pure existence check, no side effects; safe to call outside any
    /// transaction. Checked against the `message_id` primary key alone, the
    /// same key whose uniqueness `mark_processed` relies on, so the answer
    /// agrees with what an insert attempt would do.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` on storage failure.
    pub async fn is_processed(&self, message_id: Uuid) -> Result<bool, StoreError> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT message_id FROM inbox_messages WHERE message_id = $1")
                .bind(message_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(row.is_some())
    }

    /// Records a message as processed, on the caller's transaction — the same
    /// transaction as the business effect of processing the message.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DuplicateMessage` if the message id was already
    /// recorded (a redelivery race): the caller must roll back its own
    /// business effect and acknowledge the message as already processed, not
    /// surface an application error. Returns `StoreError::Database` on other
    /// storage failures.
    pub async fn mark_processed(
        &self,
        tx: &mut PgTransaction<'_>,
        message: NewInboxMessage,
    ) -> Result<InboxRecord, StoreError> {
        let row: InboxRecord = sqlx::query_as(
            "INSERT INTO inbox_messages \
             (message_id, tenant_id, event_type, source, payload_hash, extra_data) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING message_id, tenant_id, event_type, source, processed_at, \
                       payload_hash, extra_data",
        )
        .bind(message.message_id)
        .bind(&self.tenant_id)
        .bind(&message.event_type)
        .bind(&message.source)
        .bind(&message.payload_hash)
        .bind(&message.extra_data)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicateMessage(message.message_id)
            } else {
                StoreError::Database(e.to_string())
            }
        })?;

        Ok(row)
    }

    /// Deletes processed-message rows older than `older_than_days`. Run
    /// out-of-band as retention cleanup.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` on storage failure.
    pub async fn cleanup_old_records(&self, older_than_days: u32) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM inbox_messages \
             WHERE tenant_id = $1 \
               AND processed_at < NOW() - make_interval(days => $2)",
        )
        .bind(&self.tenant_id)
        .bind(i32::try_from(older_than_days).unwrap_or(i32::MAX))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        let deleted = result.rows_affected();
        tracing::debug!(tenant_id = %self.tenant_id, deleted, "cleaned up old inbox rows");
        Ok(deleted)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
