//! # In-Memory Pub/Sub Bus
//!
//! Synchronous-delivery bus for tests and single-process embedding.
//! Subscription failures can be injected to exercise teardown paths.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::types::OpRecord;

use super::{ChannelSink, PubSub, PubSubError, PubSubFuture};

/// In-memory bus: channel name → registered listeners.
#[derive(Default)]
pub struct MemoryPubSub {
    listeners: RwLock<HashMap<String, Vec<Arc<dyn ChannelSink>>>>,
    fail_subscribe: RwLock<Option<String>>,
}

impl MemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `subscribe_channels` call fail.
    pub fn fail_next_subscribe(&self, message: impl Into<String>) {
        if let Ok(mut slot) = self.fail_subscribe.write() {
            *slot = Some(message.into());
        }
    }

    /// Number of listener registrations for a channel.
    pub fn listener_count(&self, channel: &str) -> usize {
        self.listeners
            .read()
            .map(|l| l.get(channel).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }
}

impl PubSub for MemoryPubSub {
    fn subscribe_channels<'a>(
        &'a self,
        channels: &'a [String],
        listener: Arc<dyn ChannelSink>,
    ) -> PubSubFuture<'a, ()> {
        Box::pin(async move {
            if let Ok(mut fail) = self.fail_subscribe.write() {
                if let Some(message) = fail.take() {
                    return Err(PubSubError::Subscribe(message));
                }
            }
            let mut listeners = self
                .listeners
                .write()
                .map_err(|_| PubSubError::Subscribe("lock poisoned".into()))?;
            for channel in channels {
                listeners
                    .entry(channel.clone())
                    .or_default()
                    .push(listener.clone());
            }
            Ok(())
        })
    }

    fn remove_channel_listener<'a>(
        &'a self,
        channel: &'a str,
        listener: &'a Arc<dyn ChannelSink>,
    ) -> PubSubFuture<'a, ()> {
        Box::pin(async move {
            if let Ok(mut listeners) = self.listeners.write() {
                if let Some(registered) = listeners.get_mut(channel) {
                    if let Some(pos) = registered.iter().position(|l| Arc::ptr_eq(l, listener)) {
                        registered.remove(pos);
                    }
                    if registered.is_empty() {
                        listeners.remove(channel);
                    }
                }
            }
            Ok(())
        })
    }

    fn publish<'a>(&'a self, channel: &'a str, record: &'a OpRecord) -> PubSubFuture<'a, ()> {
        Box::pin(async move {
            let targets: Vec<Arc<dyn ChannelSink>> = self
                .listeners
                .read()
                .map_err(|_| PubSubError::Publish("lock poisoned".into()))?
                .get(channel)
                .map(|l| l.to_vec())
                .unwrap_or_default();
            // Deliver outside the lock so a listener may re-enter the
            // bus (e.g. to unsubscribe).
            for target in targets {
                target.deliver(channel, record);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OpMetadata;
    use serde_json::json;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct Collector {
        seen: Mutex<Vec<(String, u64)>>,
    }

    impl ChannelSink for Collector {
        fn deliver(&self, channel: &str, record: &OpRecord) {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push((channel.to_string(), record.version));
            }
        }
    }

    fn record(version: u64) -> OpRecord {
        OpRecord::edit(version, json!({}), OpMetadata::new(Uuid::new_v4(), version))
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribed_channels_only() {
        let bus = MemoryPubSub::new();
        let sink = Arc::new(Collector {
            seen: Mutex::new(Vec::new()),
        });
        let listener: Arc<dyn ChannelSink> = sink.clone();

        bus.subscribe_channels(&["c.d1".to_string()], listener.clone())
            .await
            .unwrap();

        bus.publish("c.d1", &record(0)).await.unwrap();
        bus.publish("c.d2", &record(0)).await.unwrap();

        assert_eq!(*sink.seen.lock().unwrap(), vec![("c.d1".to_string(), 0)]);
    }

    #[tokio::test]
    async fn test_remove_listener() {
        let bus = MemoryPubSub::new();
        let sink = Arc::new(Collector {
            seen: Mutex::new(Vec::new()),
        });
        let listener: Arc<dyn ChannelSink> = sink.clone();

        bus.subscribe_channels(&["c.d1".to_string()], listener.clone())
            .await
            .unwrap();
        assert_eq!(bus.listener_count("c.d1"), 1);

        bus.remove_channel_listener("c.d1", &listener).await.unwrap();
        assert_eq!(bus.listener_count("c.d1"), 0);

        bus.publish("c.d1", &record(0)).await.unwrap();
        assert!(sink.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_subscribe_failure() {
        let bus = MemoryPubSub::new();
        bus.fail_next_subscribe("bus down");
        let sink: Arc<dyn ChannelSink> = Arc::new(Collector {
            seen: Mutex::new(Vec::new()),
        });

        let err = bus
            .subscribe_channels(&["c.d1".to_string()], sink.clone())
            .await
            .unwrap_err();
        assert_eq!(err, PubSubError::Subscribe("bus down".into()));

        // The failed call registered nothing.
        assert_eq!(bus.listener_count("c.d1"), 0);

        // The failure was one-shot.
        bus.subscribe_channels(&["c.d1".to_string()], sink)
            .await
            .unwrap();
        assert_eq!(bus.listener_count("c.d1"), 1);
    }
}
