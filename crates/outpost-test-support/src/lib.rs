//! Shared test mocks and utilities for the Outpost event-delivery core.

mod bus;
mod clock;

pub use bus::{FailingMessageBus, PublishedMessage, ScriptedMessageBus};
pub use clock::FixedClock;
