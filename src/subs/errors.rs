//! # Subscription Errors

use thiserror::Error;

use crate::pubsub::PubSubError;
use crate::storage::StorageError;

/// Result type for subscription setup.
pub type SubscribeResult<T> = Result<T, SubscribeError>;

/// Subscription setup failures. By the time one of these reaches the
/// caller, every stream created by the failed call has been torn down
/// and no listener or index entry remains live.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscribeError {
    /// Channel subscription on the bus failed.
    #[error(transparent)]
    PubSub(#[from] PubSubError),

    /// Backlog fetch from the op log failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Presence bulk fetch failed.
    #[error("Presence fetch failed: {0}")]
    Presence(String),
}

impl SubscribeError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PubSub(e) => e.code(),
            Self::Storage(e) => e.code(),
            Self::Presence(_) => "ERR_PRESENCE_FETCH",
        }
    }
}
