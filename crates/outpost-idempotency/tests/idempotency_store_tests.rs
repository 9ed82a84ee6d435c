//! Integration tests for the idempotency store against a real PostgreSQL
//! database.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use outpost_core::clock::SystemClock;
use outpost_core::error::StoreError;
use outpost_idempotency::{IdempotencyStore, LockOutcome, hash_request};
use outpost_test_support::FixedClock;
use serde_json::json;
use sqlx::PgPool;

const TTL: Duration = Duration::from_secs(24 * 60 * 60);

fn store(pool: &PgPool) -> IdempotencyStore {
    IdempotencyStore::new(pool.clone(), "tenant-a", TTL, Arc::new(SystemClock))
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_fresh_key_is_acquired(pool: PgPool) {
    let store = store(&pool);

    let outcome = store
        .lock("key-1", "create_order", &hash_request(b"{}"))
        .await
        .unwrap();

    assert!(matches!(outcome, LockOutcome::Acquired));
    assert!(store.get_response("key-1").await.unwrap().is_none());
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_completed_key_replays_the_cached_response(pool: PgPool) {
    let store = store(&pool);
    let request_hash = hash_request(br#"{"amount": 100}"#);

    store
        .lock("key-1", "create_order", &request_hash)
        .await
        .unwrap();
    store
        .store_response("key-1", &json!({"order_id": 42}), 201)
        .await
        .unwrap();

    let outcome = store
        .lock("key-1", "create_order", &request_hash)
        .await
        .unwrap();
    match outcome {
        LockOutcome::Completed(cached) => {
            assert_eq!(cached.response, json!({"order_id": 42}));
            assert_eq!(cached.status_code, 201);
        }
        other => panic!("expected Completed, got {other:?}"),
    }

    let direct = store.get_response("key-1").await.unwrap().unwrap();
    assert_eq!(direct.status_code, 201);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_reusing_a_key_with_a_different_request_conflicts(pool: PgPool) {
    let store = store(&pool);

    store
        .lock("key-1", "create_order", &hash_request(br#"{"amount": 100}"#))
        .await
        .unwrap();

    let result = store
        .lock("key-1", "create_order", &hash_request(br#"{"amount": 999}"#))
        .await;
    assert!(matches!(result, Err(StoreError::IdempotencyConflict { key }) if key == "key-1"));

    let result = store
        .lock("key-1", "cancel_order", &hash_request(br#"{"amount": 100}"#))
        .await;
    assert!(matches!(result, Err(StoreError::IdempotencyConflict { .. })));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_concurrent_identical_request_observes_pending(pool: PgPool) {
    let store = store(&pool);
    let request_hash = hash_request(b"{}");

    store
        .lock("key-1", "create_order", &request_hash)
        .await
        .unwrap();

    let outcome = store
        .lock("key-1", "create_order", &request_hash)
        .await
        .unwrap();

    assert!(matches!(outcome, LockOutcome::Pending));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_failed_key_is_rearmed_for_a_retry(pool: PgPool) {
    let store = store(&pool);
    let request_hash = hash_request(b"{}");

    store
        .lock("key-1", "create_order", &request_hash)
        .await
        .unwrap();
    store.mark_failed("key-1").await.unwrap();

    let outcome = store
        .lock("key-1", "create_order", &request_hash)
        .await
        .unwrap();
    assert!(matches!(outcome, LockOutcome::Acquired));

    // The retry owns the key again; a third caller sees it pending.
    let outcome = store
        .lock("key-1", "create_order", &request_hash)
        .await
        .unwrap();
    assert!(matches!(outcome, LockOutcome::Pending));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_store_response_requires_a_pending_row(pool: PgPool) {
    let store = store(&pool);

    let result = store.store_response("missing", &json!({}), 200).await;

    assert!(matches!(result, Err(StoreError::KeyNotFound(key)) if key == "missing"));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_keys_are_tenant_scoped(pool: PgPool) {
    let store_a = store(&pool);
    let store_b = IdempotencyStore::new(pool.clone(), "tenant-b", TTL, Arc::new(SystemClock));
    let request_hash = hash_request(b"{}");

    store_a
        .lock("key-1", "create_order", &request_hash)
        .await
        .unwrap();

    let outcome = store_b
        .lock("key-1", "create_order", &request_hash)
        .await
        .unwrap();
    assert!(matches!(outcome, LockOutcome::Acquired));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_cleanup_deletes_only_expired_keys(pool: PgPool) {
    let now = FixedClock(Utc::now());
    let early = IdempotencyStore::new(
        pool.clone(),
        "tenant-a",
        TTL,
        Arc::new(now.shifted(-TimeDelta::days(2))),
    );
    let late = IdempotencyStore::new(pool.clone(), "tenant-a", TTL, Arc::new(now));
    let request_hash = hash_request(b"{}");

    early
        .lock("expired-key", "create_order", &request_hash)
        .await
        .unwrap();
    late.lock("live-key", "create_order", &request_hash)
        .await
        .unwrap();

    let deleted = late.cleanup_expired().await.unwrap();

    assert_eq!(deleted, 1);
    let outcome = late
        .lock("expired-key", "create_order", &request_hash)
        .await
        .unwrap();
    assert!(matches!(outcome, LockOutcome::Acquired));
    let outcome = late
        .lock("live-key", "create_order", &request_hash)
        .await
        .unwrap();
    assert!(matches!(outcome, LockOutcome::Pending));
}
