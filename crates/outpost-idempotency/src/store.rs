//! PostgreSQL idempotency store.

use std::sync::Arc;

use chrono::TimeDelta;
use outpost_core::clock::Clock;
use outpost_core::error::StoreError;
use sha2::{Digest, Sha256};
use sqlx::PgPool;

use crate::record::{CachedResponse, IdempotencyState, LockOutcome};

/// SHA-256 hex fingerprint of a raw request body.
#[must_use]
pub fn hash_request(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(sqlx::FromRow)]
struct KeyRow {
    operation: String,
    request_hash: String,
    state: String,
    response: Option<serde_json::Value>,
    status_code: Option<i32>,
}

/// PostgreSQL-backed idempotency store, scoped to one tenant.
///
/// The lock step relies on the `(tenant_id, idempotency_key)` primary key,
/// never on read-then-write, so concurrent API processes racing on the same
/// key resolve at the database.
#[derive(Clone)]
pub struct IdempotencyStore {
    pool: PgPool,
    tenant_id: String,
    ttl: TimeDelta,
    clock: Arc<dyn Clock>,
}

impl IdempotencyStore {
    /// Creates a store over `pool` for the given tenant. Rows expire `ttl`
    /// after their lock was taken (or re-armed).
    #[must_use]
    pub fn new(
        pool: PgPool,
        tenant_id: impl Into<String>,
        ttl: std::time::Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pool,
            tenant_id: tenant_id.into(),
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            clock,
        }
    }

    /// Returns the cached response for `key`, but only once the command
    /// completed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` on storage failure.
    pub async fn get_response(&self, key: &str) -> Result<Option<CachedResponse>, StoreError> {
        let row: Option<(serde_json::Value, i32)> = sqlx::query_as(
            "SELECT response, status_code FROM idempotency_keys \
             WHERE tenant_id = $1 AND idempotency_key = $2 AND state = 'COMPLETED'",
        )
        .bind(&self.tenant_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(|(response, status_code)| CachedResponse {
            response,
            status_code,
        }))
    }

    /// Atomically takes ownership of `key` for `(operation, request_hash)`.
    ///
    /// A fresh key inserts a `PENDING` row and returns
    /// [`LockOutcome::Acquired`]. An existing row with the same fingerprint
    /// returns its current state: [`LockOutcome::Pending`] while the original
    /// request runs, [`LockOutcome::Completed`] with the cached response once
    /// it finished, or — after a retryable failure — the row is re-armed to
    /// `PENDING` and ownership is handed to this caller.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::IdempotencyConflict` when the key exists with a
    /// different operation or request hash, `StoreError::Database` on storage
    /// failure.
    pub async fn lock(
        &self,
        key: &str,
        operation: &str,
        request_hash: &str,
    ) -> Result<LockOutcome, StoreError> {
        let now = self.clock.now();
        let expires_at = self.clock.now_plus(self.ttl);

        let inserted = sqlx::query(
            "INSERT INTO idempotency_keys \
             (idempotency_key, tenant_id, operation, request_hash, state, created_at, expires_at) \
             VALUES ($1, $2, $3, $4, 'PENDING', $5, $6) \
             ON CONFLICT (tenant_id, idempotency_key) DO NOTHING",
        )
        .bind(key)
        .bind(&self.tenant_id)
        .bind(operation)
        .bind(request_hash)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if inserted.rows_affected() == 1 {
            tracing::debug!(tenant_id = %self.tenant_id, key, operation, "idempotency lock acquired");
            return Ok(LockOutcome::Acquired);
        }

        let row: KeyRow = sqlx::query_as(
            "SELECT operation, request_hash, state, response, status_code \
             FROM idempotency_keys \
             WHERE tenant_id = $1 AND idempotency_key = $2",
        )
        .bind(&self.tenant_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        // Row deleted between insert and fetch (TTL cleanup race); the
        // caller retries the whole lock.
        .ok_or(StoreError::KeyNotFound(key.to_owned()))?;

        if row.operation != operation || row.request_hash != request_hash {
            return Err(StoreError::IdempotencyConflict {
                key: key.to_owned(),
            });
        }

        match IdempotencyState::try_from(row.state.as_str())? {
            IdempotencyState::Pending => Ok(LockOutcome::Pending),
            IdempotencyState::Completed => {
                let response = row.response.ok_or(StoreError::InvalidColumn {
                    column: "response",
                    value: "NULL".to_owned(),
                })?;
                let status_code = row.status_code.ok_or(StoreError::InvalidColumn {
                    column: "status_code",
                    value: "NULL".to_owned(),
                })?;
                Ok(LockOutcome::Completed(CachedResponse {
                    response,
                    status_code,
                }))
            }
            IdempotencyState::Failed => {
                // Guarded re-arm: only one of the racing callers can flip
                // FAILED back to PENDING; the losers observe Pending.
                let rearmed = sqlx::query(
                    "UPDATE idempotency_keys \
                     SET state = 'PENDING', created_at = $3, expires_at = $4 \
                     WHERE tenant_id = $1 AND idempotency_key = $2 AND state = 'FAILED'",
                )
                .bind(&self.tenant_id)
                .bind(key)
                .bind(now)
                .bind(expires_at)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;

                if rearmed.rows_affected() == 1 {
                    Ok(LockOutcome::Acquired)
                } else {
                    Ok(LockOutcome::Pending)
                }
            }
        }
    }

    /// Completes a locked key, caching the response for replays.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::KeyNotFound` if no `PENDING` row exists for the
    /// key, `StoreError::Database` on storage failure.
    pub async fn store_response(
        &self,
        key: &str,
        response: &serde_json::Value,
        status_code: i32,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE idempotency_keys \
             SET state = 'COMPLETED', response = $3, status_code = $4 \
             WHERE tenant_id = $1 AND idempotency_key = $2 AND state = 'PENDING'",
        )
        .bind(&self.tenant_id)
        .bind(key)
        .bind(response)
        .bind(status_code)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        guard_updated(result.rows_affected(), key)
    }

    /// Marks a locked key as retryably failed, permitting a future `lock`
    /// with the same key and fingerprint.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::KeyNotFound` if no `PENDING` row exists for the
    /// key, `StoreError::Database` on storage failure.
    pub async fn mark_failed(&self, key: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE idempotency_keys \
             SET state = 'FAILED' \
             WHERE tenant_id = $1 AND idempotency_key = $2 AND state = 'PENDING'",
        )
        .bind(&self.tenant_id)
        .bind(key)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        guard_updated(result.rows_affected(), key)
    }

    /// Deletes rows whose TTL has elapsed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` on storage failure.
    pub async fn cleanup_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM idempotency_keys WHERE tenant_id = $1 AND expires_at < $2",
        )
        .bind(&self.tenant_id)
        .bind(self.clock.now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        let deleted = result.rows_affected();
        tracing::debug!(tenant_id = %self.tenant_id, deleted, "cleaned up expired idempotency keys");
        Ok(deleted)
    }
}

impl std::fmt::Debug for IdempotencyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyStore")
            .field("tenant_id", &self.tenant_id)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

fn db_err(err: sqlx::Error) -> StoreError {
    StoreError::Database(err.to_string())
}

fn guard_updated(rows_affected: u64, key: &str) -> Result<(), StoreError> {
    if rows_affected == 0 {
        return Err(StoreError::KeyNotFound(key.to_owned()));
    }
    Ok(())
}
