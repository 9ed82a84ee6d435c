//! Idempotency row types.

use outpost_core::error::StoreError;

/// Lifecycle state of an idempotency row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyState {
    /// The command is executing; a concurrent identical request should wait
    /// or answer "in progress".
    Pending,
    /// The command finished and its response is cached.
    Completed,
    /// The command failed retryably; the same key may be locked again.
    Failed,
}

impl IdempotencyState {
    /// The database representation of this state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl TryFrom<&str> for IdempotencyState {
    type Error = StoreError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "PENDING" => Ok(Self::Pending),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(StoreError::InvalidColumn {
                column: "state",
                value: other.to_owned(),
            }),
        }
    }
}

/// The cached outcome of a completed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    /// The response body originally produced by the command.
    pub response: serde_json::Value,
    /// The status code originally returned to the client.
    pub status_code: i32,
}

/// Result of [`crate::store::IdempotencyStore::lock`].
#[derive(Debug, Clone)]
pub enum LockOutcome {
    /// The caller owns the key and must execute the command, then call
    /// `store_response` or `mark_failed`.
    Acquired,
    /// Another caller holds the key for the same request and has not
    /// finished yet. The caller decides whether to poll or answer
    /// "in progress"; the store never blocks.
    Pending,
    /// The command already completed; the cached outcome is returned without
    /// re-executing business logic.
    Completed(CachedResponse),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trips_through_db_representation() {
        for state in [
            IdempotencyState::Pending,
            IdempotencyState::Completed,
            IdempotencyState::Failed,
        ] {
            assert_eq!(IdempotencyState::try_from(state.as_str()).unwrap(), state);
        }
    }

    #[test]
    fn test_unknown_state_is_rejected() {
        assert!(IdempotencyState::try_from("EXPIRED").is_err());
    }
}
