//! Message bus port.
//!
//! The broker client is out of scope for this repository; the projector only
//! sees this trait. Implementations decide which broker errors are worth
//! retrying (`Transient`) and which will never succeed (`Permanent`).

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

/// Failure modes of a publish attempt.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The broker is temporarily unavailable; the publish may be retried.
    #[error("transient publish failure: {0}")]
    Transient(String),

    /// The broker rejected the message itself (bad payload, unknown schema).
    /// Retrying will not help.
    #[error("permanent publish failure: {0}")]
    Permanent(String),
}

/// Port for publishing events to a message broker.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes a single event. Implementations must not assume cross-call
    /// batching; the projector issues one call per outbox row.
    async fn publish(
        &self,
        topic: &str,
        payload: &serde_json::Value,
        metadata: &HashMap<String, String>,
    ) -> Result<(), PublishError>;
}
