//! # Subscription Streams
//!
//! A stream is one document's live channel of confirmed operation
//! records. Between channel subscription and backlog reconciliation,
//! live records are buffered behind a gate; the merge then replays
//! the durable backlog ahead of the buffer and a version watermark
//! drops whatever both sides saw. From the subscriber's point of view
//! the result is a single strictly version-ordered sequence with no
//! gaps and no duplicates.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::pubsub::{ChannelSink, PubSub};
use crate::types::{DocId, OpRecord, Version};

struct Gate {
    merged: bool,
    next_version: Version,
    pending: Vec<OpRecord>,
}

/// The shared half of a stream, reachable from the channel index.
pub(crate) struct StreamShared {
    id: Uuid,
    gate: Mutex<Gate>,
    tx: mpsc::UnboundedSender<OpRecord>,
}

impl StreamShared {
    pub(crate) fn new(from: Version) -> (Arc<Self>, mpsc::UnboundedReceiver<OpRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                id: Uuid::new_v4(),
                gate: Mutex::new(Gate {
                    merged: false,
                    next_version: from,
                    pending: Vec::new(),
                }),
                tx,
            }),
            rx,
        )
    }

    /// A record arriving from the live listener. Buffered until the
    /// backlog merge has run; after that, delivered directly with
    /// duplicates below the watermark dropped.
    pub(crate) fn push_live(&self, record: &OpRecord) {
        let Ok(mut gate) = self.gate.lock() else {
            return;
        };
        if !gate.merged {
            gate.pending.push(record.clone());
            return;
        }
        if record.version >= gate.next_version {
            gate.next_version = record.version + 1;
            let _ = self.tx.send(record.clone());
        }
    }

    /// Merge the durable backlog ahead of anything the live listener
    /// buffered, then open the gate.
    pub(crate) fn merge_backlog(&self, backlog: Vec<OpRecord>) {
        let Ok(mut gate) = self.gate.lock() else {
            return;
        };
        let pending = std::mem::take(&mut gate.pending);
        for record in backlog.into_iter().chain(pending) {
            if record.version >= gate.next_version {
                gate.next_version = record.version + 1;
                let _ = self.tx.send(record);
            }
        }
        gate.merged = true;
    }
}

/// Process-wide (per backend) index: channel name → live streams.
/// An incoming pub/sub message locates its streams in O(1) by
/// channel name alone.
#[derive(Default)]
pub(crate) struct ChannelIndex {
    slots: RwLock<HashMap<String, Vec<Arc<StreamShared>>>>,
}

impl ChannelIndex {
    pub(crate) fn register(&self, channel: &str, shared: Arc<StreamShared>) {
        if let Ok(mut slots) = self.slots.write() {
            slots.entry(channel.to_string()).or_default().push(shared);
        }
    }

    /// Remove one stream's entry. Returns true if something was
    /// actually removed (first destroy wins).
    pub(crate) fn remove(&self, channel: &str, id: Uuid) -> bool {
        let Ok(mut slots) = self.slots.write() else {
            return false;
        };
        let Some(streams) = slots.get_mut(channel) else {
            return false;
        };
        let Some(pos) = streams.iter().position(|s| s.id == id) else {
            return false;
        };
        streams.remove(pos);
        if streams.is_empty() {
            slots.remove(channel);
        }
        true
    }

    pub(crate) fn deliver(&self, channel: &str, record: &OpRecord) {
        let targets: Vec<Arc<StreamShared>> = match self.slots.read() {
            Ok(slots) => slots.get(channel).map(|s| s.to_vec()).unwrap_or_default(),
            Err(_) => return,
        };
        for shared in targets {
            shared.push_live(record);
        }
    }

    /// Number of channels with at least one live stream.
    pub(crate) fn channel_count(&self) -> usize {
        self.slots.read().map(|s| s.len()).unwrap_or(0)
    }
}

/// The shared pub/sub listener: demultiplexes bus messages into the
/// channel index purely by channel name.
pub(crate) struct Demux {
    index: Arc<ChannelIndex>,
}

impl Demux {
    pub(crate) fn new(index: Arc<ChannelIndex>) -> Self {
        Self { index }
    }
}

impl ChannelSink for Demux {
    fn deliver(&self, channel: &str, record: &OpRecord) {
        self.index.deliver(channel, record);
    }
}

/// A live, ordered stream of operation records for one document,
/// owned by the subscriber that requested it.
pub struct OpStream {
    doc: DocId,
    channel: String,
    rx: mpsc::UnboundedReceiver<OpRecord>,
    shared: Arc<StreamShared>,
    index: Arc<ChannelIndex>,
    pubsub: Arc<dyn PubSub>,
    listener: Arc<dyn ChannelSink>,
    destroyed: AtomicBool,
}

impl OpStream {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        doc: DocId,
        channel: String,
        rx: mpsc::UnboundedReceiver<OpRecord>,
        shared: Arc<StreamShared>,
        index: Arc<ChannelIndex>,
        pubsub: Arc<dyn PubSub>,
        listener: Arc<dyn ChannelSink>,
    ) -> Self {
        Self {
            doc,
            channel,
            rx,
            shared,
            index,
            pubsub,
            listener,
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn doc(&self) -> &DocId {
        &self.doc
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub(crate) fn merge_backlog(&self, backlog: Vec<OpRecord>) {
        self.shared.merge_backlog(backlog);
    }

    /// Next record, in strictly increasing version order. `None` once
    /// the stream has been destroyed and drained.
    pub async fn recv(&mut self) -> Option<OpRecord> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<OpRecord> {
        self.rx.try_recv().ok()
    }

    /// Deregister this stream: remove its index entry and release its
    /// channel listener registration. Idempotent; safe to call any
    /// number of times, including concurrently with an in-flight
    /// backlog merge.
    pub async fn destroy(&mut self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.index.remove(&self.channel, self.shared.id);
        let _ = self
            .pubsub
            .remove_channel_listener(&self.channel, &self.listener)
            .await;
        self.rx.close();
    }
}

impl Stream for OpStream {
    type Item = OpRecord;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<OpRecord>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::MemoryPubSub;
    use crate::types::OpMetadata;
    use futures_util::StreamExt;
    use serde_json::json;

    fn record(version: Version) -> OpRecord {
        OpRecord::edit(version, json!({}), OpMetadata::new(Uuid::new_v4(), version))
    }

    fn stream_fixture(from: Version) -> (OpStream, Arc<StreamShared>, Arc<MemoryPubSub>) {
        let index = Arc::new(ChannelIndex::default());
        let pubsub = Arc::new(MemoryPubSub::new());
        let listener: Arc<dyn ChannelSink> = Arc::new(Demux::new(index.clone()));
        let (shared, rx) = StreamShared::new(from);
        index.register("c.d1", shared.clone());
        let stream = OpStream::new(
            DocId::new("c", "d1"),
            "c.d1".to_string(),
            rx,
            shared.clone(),
            index,
            pubsub.clone(),
            listener,
        );
        (stream, shared, pubsub)
    }

    #[tokio::test]
    async fn test_live_records_buffer_until_merge() {
        let (mut stream, shared, _bus) = stream_fixture(0);

        // Live records arrive before the backlog merge.
        shared.push_live(&record(2));
        assert!(stream.try_recv().is_none());

        // The backlog overlaps the buffered record.
        shared.merge_backlog(vec![record(0), record(1), record(2)]);

        let versions: Vec<Version> = std::iter::from_fn(|| stream.try_recv())
            .map(|r| r.version)
            .collect();
        assert_eq!(versions, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_watermark_drops_duplicates_after_merge() {
        let (mut stream, shared, _bus) = stream_fixture(0);
        shared.merge_backlog(vec![record(0), record(1)]);

        // A replayed live record below the watermark is dropped.
        shared.push_live(&record(1));
        shared.push_live(&record(2));

        let versions: Vec<Version> = std::iter::from_fn(|| stream.try_recv())
            .map(|r| r.version)
            .collect();
        assert_eq!(versions, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_records_below_start_version_dropped() {
        let (mut stream, shared, _bus) = stream_fixture(2);
        shared.merge_backlog(vec![record(2), record(3)]);

        let versions: Vec<Version> = std::iter::from_fn(|| stream.try_recv())
            .map(|r| r.version)
            .collect();
        assert_eq!(versions, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_stream_adapter_yields_records() {
        let (mut stream, shared, _bus) = stream_fixture(0);
        shared.merge_backlog(vec![record(0), record(1)]);

        assert_eq!(stream.next().await.unwrap().version, 0);
        assert_eq!(stream.next().await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let (mut stream, _shared, _bus) = stream_fixture(0);
        let index = stream.index.clone();
        assert_eq!(index.channel_count(), 1);

        stream.destroy().await;
        assert_eq!(index.channel_count(), 0);

        // Destroying again must not error or disturb anything.
        stream.destroy().await;
        stream.destroy().await;
        assert_eq!(index.channel_count(), 0);
    }
}
