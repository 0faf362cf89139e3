//! # Pub/Sub Boundary
//!
//! The channel-based message bus the subscription engine rides on.
//! The bus may itself be distributed; this core only assumes a single
//! logical bus delivering each channel's messages in publish order.

mod memory;

pub use memory::MemoryPubSub;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

use crate::types::OpRecord;

/// Result type for pub/sub operations.
pub type PubSubResult<T> = Result<T, PubSubError>;

/// Boxed future returned by bus methods.
pub type PubSubFuture<'a, T> = Pin<Box<dyn Future<Output = PubSubResult<T>> + Send + 'a>>;

/// Pub/sub bus errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PubSubError {
    #[error("Channel subscribe failed: {0}")]
    Subscribe(String),

    #[error("Publish failed: {0}")]
    Publish(String),
}

impl PubSubError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Subscribe(_) => "ERR_PUBSUB_SUBSCRIBE",
            Self::Publish(_) => "ERR_PUBSUB_PUBLISH",
        }
    }
}

/// Receives messages for subscribed channels. One listener may be
/// registered against many channels; delivery identifies the channel.
pub trait ChannelSink: Send + Sync {
    fn deliver(&self, channel: &str, record: &OpRecord);
}

/// The pub/sub bus collaborator.
pub trait PubSub: Send + Sync {
    /// Subscribe one listener to a set of channels. Resolves once the
    /// subscription is confirmed; messages published after
    /// confirmation must reach the listener.
    fn subscribe_channels<'a>(
        &'a self,
        channels: &'a [String],
        listener: Arc<dyn ChannelSink>,
    ) -> PubSubFuture<'a, ()>;

    /// Remove one listener registration from one channel.
    fn remove_channel_listener<'a>(
        &'a self,
        channel: &'a str,
        listener: &'a Arc<dyn ChannelSink>,
    ) -> PubSubFuture<'a, ()>;

    /// Announce a confirmed op record on a channel.
    fn publish<'a>(&'a self, channel: &'a str, record: &'a OpRecord) -> PubSubFuture<'a, ()>;
}
