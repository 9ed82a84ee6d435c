//! Log-backed message bus.

use std::collections::HashMap;

use async_trait::async_trait;
use outpost_core::bus::{MessageBus, PublishError};

/// Publishes events to the structured log instead of a broker.
///
/// TODO: replace with a real broker adapter once the transport is chosen.
#[derive(Debug, Clone, Copy)]
pub struct LogMessageBus;

#[async_trait]
impl MessageBus for LogMessageBus {
    async fn publish(
        &self,
        topic: &str,
        payload: &serde_json::Value,
        metadata: &HashMap<String, String>,
    ) -> Result<(), PublishError> {
        tracing::info!(topic, %payload, ?metadata, "publishing event");
        Ok(())
    }
}
