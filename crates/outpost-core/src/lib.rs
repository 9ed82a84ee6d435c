//! Outpost Core — shared abstractions for transactional event delivery.
//!
//! This crate defines the error type, the clock seam, and the message-bus
//! port that the store and projector crates depend on. It contains no
//! infrastructure code.

pub mod bus;
pub mod clock;
pub mod error;
