//! Test buses — mock `MessageBus` implementations for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use outpost_core::bus::{MessageBus, PublishError};

/// A publish call observed by [`ScriptedMessageBus`].
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    /// The destination topic.
    pub topic: String,
    /// The event payload.
    pub payload: serde_json::Value,
    /// The transport metadata.
    pub metadata: HashMap<String, String>,
}

/// A message bus that records every publish and answers from a script of
/// prepared outcomes, in order. Once the script is exhausted every further
/// publish succeeds.
#[derive(Debug, Default)]
pub struct ScriptedMessageBus {
    script: Mutex<VecDeque<Result<(), PublishError>>>,
    published: Mutex<Vec<PublishedMessage>>,
}

impl ScriptedMessageBus {
    /// Creates a bus that plays back `script` one outcome per publish.
    #[must_use]
    pub fn new(script: Vec<Result<(), PublishError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            published: Mutex::new(Vec::new()),
        }
    }

    /// Creates a bus on which every publish succeeds.
    #[must_use]
    pub fn always_ok() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all successful and failed publish attempts.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageBus for ScriptedMessageBus {
    async fn publish(
        &self,
        topic: &str,
        payload: &serde_json::Value,
        metadata: &HashMap<String, String>,
    ) -> Result<(), PublishError> {
        self.published.lock().unwrap().push(PublishedMessage {
            topic: topic.to_owned(),
            payload: payload.clone(),
            metadata: metadata.clone(),
        });

        self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

/// A message bus on which every publish fails transiently. Useful for
/// exercising retry exhaustion.
#[derive(Debug, Default)]
pub struct FailingMessageBus;

#[async_trait]
impl MessageBus for FailingMessageBus {
    async fn publish(
        &self,
        _topic: &str,
        _payload: &serde_json::Value,
        _metadata: &HashMap<String, String>,
    ) -> Result<(), PublishError> {
        Err(PublishError::Transient("broker unavailable".into()))
    }
}
