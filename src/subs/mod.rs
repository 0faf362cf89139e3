//! # Bulk Subscription Engine
//!
//! Turns a request "these documents, from these versions" into live
//! per-document streams, closing the race between "decide what
//! version I'm at" and "start listening for new versions":
//!
//! 1. allocate one stream per document and register it in the channel
//!    index;
//! 2. subscribe one shared listener to the union of channel names;
//! 3. after confirmation, fetch each document's backlog from the op
//!    log and merge it ahead of anything the live listener buffered;
//! 4. on any failure, destroy every stream created so far before the
//!    error reaches the caller;
//! 5. optionally bulk-fetch presence data after reconciliation.

mod errors;
mod presence;
mod stream;

pub use errors::{SubscribeError, SubscribeResult};
pub use presence::{NoopPresence, Presence, PresenceError, PresenceFuture};
pub use stream::OpStream;

pub(crate) use stream::{ChannelIndex, Demux, StreamShared};

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::observability::{Logger, Severity};
use crate::pubsub::{ChannelSink, PubSub};
use crate::storage::OpStore;
use crate::types::{channel_name, DocId, Version};

/// A bulk subscription request: collection → document → the last
/// version the subscriber already has.
#[derive(Debug, Clone, Default)]
pub struct SubscribeRequest {
    pub docs: HashMap<String, HashMap<String, Version>>,
    pub want_presence: bool,
}

impl SubscribeRequest {
    pub fn new(docs: HashMap<String, HashMap<String, Version>>) -> Self {
        Self {
            docs,
            want_presence: false,
        }
    }

    /// Single-document convenience constructor.
    pub fn single(doc: &DocId, from: Version) -> Self {
        let mut docs: HashMap<String, HashMap<String, Version>> = HashMap::new();
        docs.entry(doc.collection.clone())
            .or_default()
            .insert(doc.doc.clone(), from);
        Self::new(docs)
    }

    pub fn with_presence(mut self) -> Self {
        self.want_presence = true;
        self
    }
}

/// The streams (and, if requested, presence data) produced by one
/// bulk subscription, in the same shape as the request.
pub struct SubscribeResponse {
    pub streams: HashMap<String, HashMap<String, OpStream>>,
    pub presence: Option<HashMap<String, HashMap<String, Value>>>,
}

impl std::fmt::Debug for SubscribeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscribeResponse")
            .field("streams", &self.streams.keys().collect::<Vec<_>>())
            .field("presence", &self.presence)
            .finish()
    }
}

impl SubscribeResponse {
    /// Take one document's stream out of the response.
    pub fn take_stream(&mut self, doc: &DocId) -> Option<OpStream> {
        self.streams.get_mut(&doc.collection)?.remove(&doc.doc)
    }
}

/// The subscription engine: owns the channel index and the shared
/// demultiplexing listener for one backend instance.
pub(crate) struct Subscriptions {
    index: Arc<ChannelIndex>,
    listener: Arc<dyn ChannelSink>,
    pubsub: Arc<dyn PubSub>,
    store: Arc<dyn OpStore>,
    presence: Arc<dyn Presence>,
}

impl Subscriptions {
    pub(crate) fn new(
        pubsub: Arc<dyn PubSub>,
        store: Arc<dyn OpStore>,
        presence: Arc<dyn Presence>,
    ) -> Self {
        let index = Arc::new(ChannelIndex::default());
        let listener: Arc<dyn ChannelSink> = Arc::new(Demux::new(index.clone()));
        Self {
            index,
            listener,
            pubsub,
            store,
            presence,
        }
    }

    /// Number of channels with at least one live stream, for
    /// leak-checking teardown.
    pub(crate) fn live_channel_count(&self) -> usize {
        self.index.channel_count()
    }

    pub(crate) async fn bulk_subscribe(
        &self,
        request: SubscribeRequest,
    ) -> SubscribeResult<SubscribeResponse> {
        // 1. Allocate and index one stream per requested document.
        let mut created: Vec<OpStream> = Vec::new();
        let mut plan: Vec<(DocId, Version)> = Vec::new();
        let mut channels: Vec<String> = Vec::new();

        for (collection, docs) in &request.docs {
            for (doc_name, from) in docs {
                let doc = DocId::new(collection.clone(), doc_name.clone());
                let channel = channel_name(collection, doc_name);
                let (shared, rx) = StreamShared::new(*from);
                self.index.register(&channel, shared.clone());
                created.push(OpStream::new(
                    doc.clone(),
                    channel.clone(),
                    rx,
                    shared,
                    self.index.clone(),
                    self.pubsub.clone(),
                    self.listener.clone(),
                ));
                plan.push((doc, *from));
                channels.push(channel);
            }
        }

        // 2. One shared listener over the union of channels.
        if let Err(e) = self
            .pubsub
            .subscribe_channels(&channels, self.listener.clone())
            .await
        {
            self.teardown(created).await;
            return Err(e.into());
        }

        // 3. Backlog reconciliation, one batched fetch.
        match self.store.get_ops_bulk(&plan).await {
            Ok(backlogs) => {
                for (stream, backlog) in created.iter().zip(backlogs) {
                    stream.merge_backlog(backlog);
                }
            }
            Err(e) => {
                self.teardown(created).await;
                return Err(e.into());
            }
        }

        // 4. Presence, after op reconciliation.
        let presence = if request.want_presence {
            match self.presence.fetch_bulk(&channels).await {
                Ok(by_channel) => Some(reshape_presence(&plan, &channels, by_channel)),
                Err(e) => {
                    self.teardown(created).await;
                    return Err(SubscribeError::Presence(e.0));
                }
            }
        } else {
            None
        };

        Logger::log(
            Severity::Info,
            "subscribe.established",
            &[("channels", &channels.len().to_string())],
        );

        let mut streams: HashMap<String, HashMap<String, OpStream>> = HashMap::new();
        for stream in created {
            let doc = stream.doc().clone();
            streams
                .entry(doc.collection)
                .or_default()
                .insert(doc.doc, stream);
        }

        Ok(SubscribeResponse { streams, presence })
    }

    async fn teardown(&self, streams: Vec<OpStream>) {
        for mut stream in streams {
            stream.destroy().await;
        }
    }
}

/// Rekey per-channel presence data into the request's
/// collection → document shape.
fn reshape_presence(
    plan: &[(DocId, Version)],
    channels: &[String],
    mut by_channel: HashMap<String, Value>,
) -> HashMap<String, HashMap<String, Value>> {
    let mut result: HashMap<String, HashMap<String, Value>> = HashMap::new();
    for ((doc, _), channel) in plan.iter().zip(channels) {
        if let Some(data) = by_channel.remove(channel) {
            result
                .entry(doc.collection.clone())
                .or_default()
                .insert(doc.doc.clone(), data);
        }
    }
    result
}
