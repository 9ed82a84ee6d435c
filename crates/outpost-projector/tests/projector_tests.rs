//! Integration tests for the projector loop against a real PostgreSQL
//! database, with a scripted in-memory bus.

use std::sync::Arc;
use std::time::Duration;

use outpost_core::bus::PublishError;
use outpost_core::clock::SystemClock;
use outpost_outbox::{NewOutboxEvent, OutboxStatus, OutboxStore};
use outpost_projector::{Backoff, Projector, ProjectorConfig};
use outpost_test_support::{FailingMessageBus, ScriptedMessageBus};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

fn store(pool: &PgPool) -> OutboxStore {
    OutboxStore::new(pool.clone(), "tenant-a")
}

/// Config with no backoff delay so failed rows are immediately claimable.
fn immediate_retry_config(max_retry_attempts: u32) -> ProjectorConfig {
    ProjectorConfig {
        max_retry_attempts,
        backoff: Backoff {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_factor: 0.0,
        },
        ..ProjectorConfig::default()
    }
}

fn projector(store: OutboxStore, bus: Arc<dyn outpost_core::bus::MessageBus>) -> Projector {
    Projector::new(store, bus, Arc::new(SystemClock), immediate_retry_config(5))
}

async fn add_committed(store: &OutboxStore, pool: &PgPool, event: NewOutboxEvent) -> Uuid {
    let mut tx = pool.begin().await.unwrap();
    let record = store.add(&mut tx, event).await.unwrap();
    tx.commit().await.unwrap();
    record.event_id
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_new_event_is_published_and_marked_sent(pool: PgPool) {
    let store = store(&pool);
    let event_id = add_committed(
        &store,
        &pool,
        NewOutboxEvent::new("orders.created", json!({"order_id": 42})),
    )
    .await;

    let bus = Arc::new(ScriptedMessageBus::always_ok());
    let projector = projector(store.clone(), bus.clone());

    let outcome = projector.run_once().await.unwrap();

    assert_eq!(outcome.claimed, 1);
    assert_eq!(outcome.published, 1);
    assert_eq!(outcome.dead_lettered, 0);

    let row = store.get(event_id).await.unwrap().unwrap();
    assert_eq!(row.status, OutboxStatus::Sent);

    let published = bus.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "orders.created");
    assert_eq!(published[0].payload, json!({"order_id": 42}));

    let snapshot = projector.metrics().snapshot();
    assert_eq!(snapshot.events_claimed, 1);
    assert_eq!(snapshot.events_published, 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_transient_failure_schedules_a_retry(pool: PgPool) {
    let store = store(&pool);
    let event_id = add_committed(
        &store,
        &pool,
        NewOutboxEvent::new("orders.created", json!({})),
    )
    .await;

    let bus = Arc::new(ScriptedMessageBus::new(vec![Err(PublishError::Transient(
        "broker timeout".to_string(),
    ))]));
    let projector = projector(store.clone(), bus);

    let outcome = projector.run_once().await.unwrap();

    assert_eq!(outcome.retried, 1);
    assert_eq!(outcome.dead_lettered, 0);

    let row = store.get(event_id).await.unwrap().unwrap();
    assert_eq!(row.status, OutboxStatus::Failed);
    assert_eq!(row.retry_count, 1);
    assert!(row.retry_after.is_some());
    assert_eq!(row.error_message.as_deref(), Some("broker timeout"));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_permanent_failure_dead_letters_immediately(pool: PgPool) {
    let store = store(&pool);
    let event_id = add_committed(
        &store,
        &pool,
        NewOutboxEvent::new("orders.created", json!({})),
    )
    .await;

    let bus = Arc::new(ScriptedMessageBus::new(vec![Err(PublishError::Permanent(
        "schema rejected".to_string(),
    ))]));
    let projector = projector(store.clone(), bus);

    let outcome = projector.run_once().await.unwrap();
    assert_eq!(outcome.dead_lettered, 1);

    let row = store.get(event_id).await.unwrap().unwrap();
    assert_eq!(row.status, OutboxStatus::Dead);
    assert_eq!(row.error_message.as_deref(), Some("schema rejected"));

    let next = projector.run_once().await.unwrap();
    assert_eq!(next.claimed, 0);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_retry_budget_is_exhausted_after_max_attempts(pool: PgPool) {
    let store = store(&pool);
    let event_id = add_committed(
        &store,
        &pool,
        NewOutboxEvent::new("orders.created", json!({})),
    )
    .await;

    let projector = Projector::new(
        store.clone(),
        Arc::new(FailingMessageBus),
        Arc::new(SystemClock),
        immediate_retry_config(3),
    );

    for _ in 0..3 {
        projector.run_once().await.unwrap();
    }

    let row = store.get(event_id).await.unwrap().unwrap();
    assert_eq!(row.status, OutboxStatus::Dead);
    assert_eq!(row.retry_count, 3);

    let after = projector.run_once().await.unwrap();
    assert_eq!(after.claimed, 0);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_failed_aggregate_blocks_its_later_events_in_the_batch(pool: PgPool) {
    let store = store(&pool);
    let aggregate_id = Uuid::new_v4();
    let first_id = add_committed(
        &store,
        &pool,
        NewOutboxEvent::new("orders.created", json!({"seq": 1}))
            .for_aggregate(aggregate_id, "order"),
    )
    .await;
    let second_id = add_committed(
        &store,
        &pool,
        NewOutboxEvent::new("orders.updated", json!({"seq": 2}))
            .for_aggregate(aggregate_id, "order"),
    )
    .await;
    let other_id = add_committed(
        &store,
        &pool,
        NewOutboxEvent::new("payments.captured", json!({})).for_aggregate(Uuid::new_v4(), "payment"),
    )
    .await;

    let bus = Arc::new(ScriptedMessageBus::new(vec![Err(PublishError::Transient(
        "broker timeout".to_string(),
    ))]));
    let projector = projector(store.clone(), bus.clone());

    let outcome = projector.run_once().await.unwrap();

    assert_eq!(outcome.claimed, 3);
    assert_eq!(outcome.retried, 1);
    assert_eq!(outcome.released, 1);
    assert_eq!(outcome.published, 1);

    // The blocked event was never handed to the bus.
    let topics: Vec<String> = bus.published().into_iter().map(|m| m.topic).collect();
    assert_eq!(topics, vec!["orders.created", "payments.captured"]);

    let first = store.get(first_id).await.unwrap().unwrap();
    assert_eq!(first.status, OutboxStatus::Failed);
    assert_eq!(first.retry_count, 1);

    let second = store.get(second_id).await.unwrap().unwrap();
    assert_eq!(second.status, OutboxStatus::Failed);
    assert_eq!(second.retry_count, 0);

    let other = store.get(other_id).await.unwrap().unwrap();
    assert_eq!(other.status, OutboxStatus::Sent);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_run_drains_pending_events_and_exits_on_shutdown(pool: PgPool) {
    let store = store(&pool);
    let event_id = add_committed(
        &store,
        &pool,
        NewOutboxEvent::new("orders.created", json!({})),
    )
    .await;

    let config = ProjectorConfig {
        sleep_busy: Duration::from_millis(1),
        sleep_idle: Duration::from_millis(1),
        sleep_idle_max: Duration::from_millis(10),
        ..ProjectorConfig::default()
    };
    let projector = Projector::new(
        store.clone(),
        Arc::new(ScriptedMessageBus::always_ok()),
        Arc::new(SystemClock),
        config,
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(async move { projector.run(shutdown_rx).await });

    // Let the loop make progress, then stop it.
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("projector did not stop after shutdown signal")
        .unwrap();

    let row = store.get(event_id).await.unwrap().unwrap();
    assert_eq!(row.status, OutboxStatus::Sent);
}
