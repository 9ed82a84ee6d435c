//! Outpost projector worker entry point.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use outpost_core::clock::SystemClock;
use outpost_outbox::{ClaimPartition, OutboxStore};
use outpost_projector::{Projector, ProjectorConfig};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

mod bus;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize tracing subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting Outpost projector worker");

    // Read configuration from environment.
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| "DATABASE_URL environment variable must be set")?;
    let tenant_id = std::env::var("TENANT_ID").unwrap_or_else(|_| "default".to_string());

    let mut config = ProjectorConfig::default();
    if let Some(batch_size) = env_parse::<i64>("BATCH_SIZE")? {
        config.batch_size = batch_size;
    }
    if let Some(max_retry_attempts) = env_parse::<u32>("MAX_RETRY_ATTEMPTS")? {
        config.max_retry_attempts = max_retry_attempts;
    }
    if let Some(secs) = env_parse::<u64>("VISIBILITY_TIMEOUT_SECONDS")? {
        config.visibility_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = env_parse::<u64>("RECLAIM_INTERVAL_SECONDS")? {
        config.reclaim_interval = Duration::from_secs(secs);
    }
    if let Some(ms) = env_parse::<u64>("SLEEP_BUSY_MS")? {
        config.sleep_busy = Duration::from_millis(ms);
    }
    if let Some(ms) = env_parse::<u64>("SLEEP_IDLE_MS")? {
        config.sleep_idle = Duration::from_millis(ms);
    }
    if let Some(ms) = env_parse::<u64>("SLEEP_IDLE_MAX_MS")? {
        config.sleep_idle_max = Duration::from_millis(ms);
    }
    if let Some(ms) = env_parse::<u64>("BACKOFF_BASE_MS")? {
        config.backoff.base_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = env_parse::<u64>("BACKOFF_MAX_MS")? {
        config.backoff.max_delay = Duration::from_millis(ms);
    }
    if let Some(factor) = env_parse::<f64>("BACKOFF_JITTER")? {
        config.backoff.jitter_factor = factor;
    }
    config.partition = match (
        env_parse::<i32>("PARTITION_INDEX")?,
        env_parse::<i32>("PARTITION_COUNT")?,
    ) {
        (Some(index), Some(of)) => Some(ClaimPartition { index, of }),
        (None, None) => None,
        _ => {
            return Err("PARTITION_INDEX and PARTITION_COUNT must be set together".into());
        }
    };

    // Create database connection pool.
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await?;

    let store = OutboxStore::new(pool, tenant_id);
    let projector = Projector::new(
        store,
        Arc::new(bus::LogMessageBus),
        Arc::new(SystemClock),
        config,
    );
    let metrics = projector.metrics();

    // Translate ctrl-c into the shutdown signal.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let worker = tokio::spawn(async move { projector.run(shutdown_rx).await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, draining in-flight batch");
    shutdown_tx.send(true)?;
    worker.await?;

    let snapshot = metrics.snapshot();
    tracing::info!(?snapshot, "Outpost projector worker stopped");

    Ok(())
}

/// Reads an optional environment variable, failing on unparseable values
/// instead of silently falling back to a default.
fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, String>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => parse_env_value(name, &raw).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_env_value<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e| format!("{name} is invalid: {e}"))
}

#[cfg(test)]
mod tests {
    use super::parse_env_value;

    #[test]
    fn test_parse_env_value_accepts_well_formed_numbers() {
        assert_eq!(parse_env_value::<u64>("SLEEP_BUSY_MS", "250"), Ok(250));
        assert_eq!(parse_env_value::<f64>("BACKOFF_JITTER", "0.25"), Ok(0.25));
    }

    #[test]
    fn test_parse_env_value_names_the_offending_variable() {
        let err = parse_env_value::<u32>("MAX_RETRY_ATTEMPTS", "many").unwrap_err();

        assert!(err.contains("MAX_RETRY_ATTEMPTS"));
    }
}
