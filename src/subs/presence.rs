//! # Presence Capability
//!
//! Ephemeral, non-durable per-user state (cursors, selections)
//! broadcast alongside documents. The coordination layer only needs
//! this capability surface; when no real presence subsystem is
//! configured, the no-op variant is selected at construction time.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use thiserror::Error;

use crate::types::OpRecord;

/// Presence collaborator error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Presence error: {0}")]
pub struct PresenceError(pub String);

/// Boxed future returned by presence methods.
pub type PresenceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, PresenceError>> + Send + 'a>>;

/// The presence capability set.
pub trait Presence: Send + Sync {
    /// Begin tracking presence on a channel.
    fn subscribe<'a>(&'a self, channel: &'a str) -> PresenceFuture<'a, ()>;

    /// Batched fetch of current presence data, keyed by channel.
    fn fetch_bulk<'a>(&'a self, channels: &'a [String]) -> PresenceFuture<'a, HashMap<String, Value>>;

    /// Push any locally buffered presence out now.
    fn flush(&self);

    /// Stop tracking presence on a channel.
    fn destroy(&self, channel: &str);

    /// Drop ops cached for transforming late presence.
    fn clear_cached_ops(&self);

    /// Apply all received-but-unprocessed presence updates.
    fn process_all_received(&self);

    /// Discard in-flight presence after a rollback; returns the
    /// discarded entries.
    fn hard_rollback(&self) -> Vec<Value>;

    /// Transform all held presence against a confirmed op.
    fn transform_all(&self, record: &OpRecord);

    /// Cache a confirmed op for transforming presence that arrives
    /// referencing an older version.
    fn cache_op(&self, record: &OpRecord);

    /// Whether any presence work is outstanding.
    fn has_pending(&self) -> bool;

    /// Suspend presence broadcasting.
    fn pause(&self);
}

/// The null-object presence implementation: every operation succeeds
/// and does nothing, every fetch is empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPresence;

impl Presence for NoopPresence {
    fn subscribe<'a>(&'a self, _channel: &'a str) -> PresenceFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    fn fetch_bulk<'a>(
        &'a self,
        _channels: &'a [String],
    ) -> PresenceFuture<'a, HashMap<String, Value>> {
        Box::pin(async { Ok(HashMap::new()) })
    }

    fn flush(&self) {}

    fn destroy(&self, _channel: &str) {}

    fn clear_cached_ops(&self) {}

    fn process_all_received(&self) {}

    fn hard_rollback(&self) -> Vec<Value> {
        Vec::new()
    }

    fn transform_all(&self, _record: &OpRecord) {}

    fn cache_op(&self, _record: &OpRecord) {}

    fn has_pending(&self) -> bool {
        false
    }

    fn pause(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_presence_satisfies_contract() {
        let presence = NoopPresence;
        presence.subscribe("c.d1").await.unwrap();
        assert!(presence
            .fetch_bulk(&["c.d1".to_string()])
            .await
            .unwrap()
            .is_empty());
        assert!(!presence.has_pending());
        assert!(presence.hard_rollback().is_empty());
    }
}
