//! PostgreSQL outbox store.

use chrono::Utc;
use outpost_core::error::StoreError;
use sqlx::PgPool;
use sqlx::postgres::PgTransaction;
use uuid::Uuid;

use crate::record::{NewOutboxEvent, OutboxRecord, OutboxRow};

const COLUMNS: &str = "event_id, tenant_id, aggregate_id, aggregate_type, topic, occurred_at, \
                       payload, metadata, routing_key, schema_id, schema_version, status, \
                       retry_count, retry_after, claimed_at, error_message, created_at";

/// Restricts a claim to one slice of the aggregate-id hash space so that
/// concurrent workers never hold events of the same aggregate. The hash is
/// masked to its low 31 bits before the modulus, since `abs()` is undefined
/// for the minimum 32-bit value. Rows without an aggregate hash as the empty
/// string and carry no ordering promise.
#[derive(Debug, Clone, Copy)]
pub struct ClaimPartition {
    /// This worker's slot, `0 <= index < of`.
    pub index: i32,
    /// Total number of worker slots.
    pub of: i32,
}

/// Per-status row counts for operator-facing logs.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OutboxStats {
    /// Rows not yet claimed.
    pub new_count: i64,
    /// Rows currently claimed by a worker.
    pub publishing_count: i64,
    /// Delivered rows awaiting archival.
    pub sent_count: i64,
    /// Rows waiting for a retry.
    pub failed_count: i64,
    /// Dead-lettered rows needing manual intervention.
    pub dead_count: i64,
    /// Age in seconds of the oldest undelivered row, if any.
    pub oldest_unsent_age_seconds: Option<i64>,
}

/// PostgreSQL-backed outbox store, scoped to one tenant.
///
/// `add` runs on the caller's open transaction so the event commits or rolls
/// back together with the business write. Every other operation coordinates
/// through database primitives only, so any number of processes can share
/// the table safely.
#[derive(Debug, Clone)]
pub struct OutboxStore {
    pool: PgPool,
    tenant_id: String,
}

impl OutboxStore {
    /// Creates a store over `pool` for the given tenant.
    #[must_use]
    pub fn new(pool: PgPool, tenant_id: impl Into<String>) -> Self {
        Self {
            pool,
            tenant_id: tenant_id.into(),
        }
    }

    /// The tenant this store is scoped to.
    #[must_use]
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Appends a `NEW` row using the caller's transaction. The row becomes
    /// visible only if the caller commits; it never opens or commits a
    /// transaction of its own.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` on storage failure, which aborts the
    /// shared transaction in the caller.
    pub async fn add(
        &self,
        tx: &mut PgTransaction<'_>,
        event: NewOutboxEvent,
    ) -> Result<OutboxRecord, StoreError> {
        let event_id = Uuid::new_v4();
        let occurred_at = event.occurred_at.unwrap_or_else(Utc::now);
        let metadata = serde_json::to_value(&event.metadata)?;

        let row: OutboxRow = sqlx::query_as(&format!(
            "INSERT INTO outbox_events \
             (event_id, tenant_id, aggregate_id, aggregate_type, topic, occurred_at, \
              payload, metadata, routing_key, schema_id, schema_version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING {COLUMNS}"
        ))
        .bind(event_id)
        .bind(&self.tenant_id)
        .bind(event.aggregate_id)
        .bind(&event.aggregate_type)
        .bind(&event.topic)
        .bind(occurred_at)
        .bind(&event.payload)
        .bind(&metadata)
        .bind(&event.routing_key)
        .bind(&event.schema_id)
        .bind(event.schema_version)
        .fetch_one(&mut **tx)
        .await
        .map_err(db_err)?;

        row.try_into()
    }

    /// Atomically claims up to `limit` eligible rows: `NEW` rows and `FAILED`
    /// rows whose `retry_after` has passed, oldest first, skipping rows
    /// locked by concurrent claimers. Claimed rows are marked `PUBLISHING`
    /// with a fresh `claimed_at`; the statement autocommits, so row locks are
    /// released while the marker persists.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` on storage failure.
    pub async fn claim_batch(
        &self,
        limit: i64,
        partition: Option<ClaimPartition>,
    ) -> Result<Vec<OutboxRecord>, StoreError> {
        let rows: Vec<OutboxRow> = sqlx::query_as(&format!(
            "UPDATE outbox_events \
             SET status = 'PUBLISHING', claimed_at = NOW() \
             WHERE event_id IN ( \
                 SELECT event_id FROM outbox_events \
                 WHERE tenant_id = $1 \
                   AND (status = 'NEW' OR (status = 'FAILED' AND retry_after <= NOW())) \
                   AND ($3::INT IS NULL \
                        OR (hashtext(COALESCE(aggregate_id::TEXT, '')) & 2147483647) % $3 = $4) \
                 ORDER BY created_at \
                 LIMIT $2 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        ))
        .bind(&self.tenant_id)
        .bind(limit)
        .bind(partition.map(|p| p.of))
        .bind(partition.map(|p| p.index))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        // RETURNING does not preserve the subquery order.
        let mut claimed = rows
            .into_iter()
            .map(OutboxRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        claimed.sort_by_key(|r| r.created_at);

        tracing::debug!(tenant_id = %self.tenant_id, claimed = claimed.len(), "claimed outbox batch");
        Ok(claimed)
    }

    /// Marks a `PUBLISHING` row as delivered.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the row is gone or no longer
    /// `PUBLISHING`, `StoreError::Database` on storage failure.
    pub async fn mark_sent(&self, event_id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE outbox_events \
             SET status = 'SENT', claimed_at = NULL, error_message = NULL \
             WHERE event_id = $1 AND status = 'PUBLISHING'",
        )
        .bind(event_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        guard_updated(result.rows_affected(), event_id)
    }

    /// Marks a `PUBLISHING` row as retryable after a transient failure:
    /// increments `retry_count`, records the error, and schedules the next
    /// attempt at `retry_after`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the row is gone or no longer
    /// `PUBLISHING`, `StoreError::Database` on storage failure.
    pub async fn mark_failed(
        &self,
        event_id: Uuid,
        error: &str,
        retry_after: chrono::DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE outbox_events \
             SET status = 'FAILED', retry_count = retry_count + 1, \
                 retry_after = $2, error_message = $3, claimed_at = NULL \
             WHERE event_id = $1 AND status = 'PUBLISHING'",
        )
        .bind(event_id)
        .bind(retry_after)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        guard_updated(result.rows_affected(), event_id)
    }

    /// Dead-letters a `PUBLISHING` row. Terminal: dead rows are never claimed
    /// again and require manual intervention (reset to `NEW` or discard).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the row is gone or no longer
    /// `PUBLISHING`, `StoreError::Database` on storage failure.
    pub async fn mark_dead(&self, event_id: Uuid, error: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE outbox_events \
             SET status = 'DEAD', retry_count = retry_count + 1, \
                 retry_after = NULL, error_message = $2, claimed_at = NULL \
             WHERE event_id = $1 AND status = 'PUBLISHING'",
        )
        .bind(event_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        guard_updated(result.rows_affected(), event_id)
    }

    /// Returns a single `PUBLISHING` row to the retryable pool without
    /// charging an attempt. Used when the row could not be published for a
    /// reason outside its own delivery, such as an earlier event of the same
    /// aggregate failing first.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the row is gone or no longer
    /// `PUBLISHING`, `StoreError::Database` on storage failure.
    pub async fn release(
        &self,
        event_id: Uuid,
        retry_after: chrono::DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE outbox_events \
             SET status = 'FAILED', retry_after = $2, claimed_at = NULL \
             WHERE event_id = $1 AND status = 'PUBLISHING'",
        )
        .bind(event_id)
        .bind(retry_after)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        guard_updated(result.rows_affected(), event_id)
    }

    /// Returns `PUBLISHING` rows abandoned by a crashed worker to the
    /// retryable pool: any claim older than `visibility_timeout` becomes
    /// `FAILED` with an immediate `retry_after`. The retry count is left
    /// untouched; a crash is not a delivery failure.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` on storage failure.
    pub async fn reclaim_stuck(
        &self,
        visibility_timeout: std::time::Duration,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE outbox_events \
             SET status = 'FAILED', retry_after = NOW(), claimed_at = NULL \
             WHERE tenant_id = $1 AND status = 'PUBLISHING' \
               AND claimed_at < NOW() - make_interval(secs => $2)",
        )
        .bind(&self.tenant_id)
        .bind(visibility_timeout.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        let reclaimed = result.rows_affected();
        if reclaimed > 0 {
            tracing::warn!(
                tenant_id = %self.tenant_id,
                reclaimed,
                "reclaimed outbox rows stuck in PUBLISHING"
            );
        }
        Ok(reclaimed)
    }

    /// Deletes `SENT` rows older than `older_than`. The only deletion the
    /// core performs; everything else is retention policy elsewhere.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` on storage failure.
    pub async fn archive_sent(&self, older_than: std::time::Duration) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM outbox_events \
             WHERE tenant_id = $1 AND status = 'SENT' \
               AND created_at < NOW() - make_interval(secs => $2)",
        )
        .bind(&self.tenant_id)
        .bind(older_than.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected())
    }

    /// Per-status counts plus the age of the oldest undelivered row.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` on storage failure.
    pub async fn stats(&self) -> Result<OutboxStats, StoreError> {
        let stats: OutboxStats = sqlx::query_as(
            "SELECT \
                 COUNT(*) FILTER (WHERE status = 'NEW') AS new_count, \
                 COUNT(*) FILTER (WHERE status = 'PUBLISHING') AS publishing_count, \
                 COUNT(*) FILTER (WHERE status = 'SENT') AS sent_count, \
                 COUNT(*) FILTER (WHERE status = 'FAILED') AS failed_count, \
                 COUNT(*) FILTER (WHERE status = 'DEAD') AS dead_count, \
                 CAST(MIN(CASE WHEN status IN ('NEW', 'FAILED') \
                          THEN EXTRACT(EPOCH FROM (NOW() - created_at)) END) AS BIGINT) \
                     AS oldest_unsent_age_seconds \
             FROM outbox_events WHERE tenant_id = $1",
        )
        .bind(&self.tenant_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(stats)
    }

    /// Fetches a single row by id within this tenant.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` on storage failure.
    pub async fn get(&self, event_id: Uuid) -> Result<Option<OutboxRecord>, StoreError> {
        let row: Option<OutboxRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM outbox_events WHERE event_id = $1 AND tenant_id = $2"
        ))
        .bind(event_id)
        .bind(&self.tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(OutboxRecord::try_from).transpose()
    }
}

fn db_err(err: sqlx::Error) -> StoreError {
    StoreError::Database(err.to_string())
}

fn guard_updated(rows_affected: u64, event_id: Uuid) -> Result<(), StoreError> {
    if rows_affected == 0 {
        return Err(StoreError::NotFound(event_id));
    }
    Ok(())
}
