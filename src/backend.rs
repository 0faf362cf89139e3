//! # Backend
//!
//! One backend instance ties the four components together: it owns
//! the middleware registry, the subscription channel index, and the
//! collaborator handles, and drives the submit path
//! (middleware → apply → persist → publish). Multiple independent
//! backends may coexist in one process; nothing here is a global.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::middleware::{
    HookError, Middleware, Registry, Request, SnapshotReadContext, SubmitContext,
};
use crate::observability::{Logger, Severity};
use crate::ot::{self, OtError};
use crate::pubsub::{MemoryPubSub, PubSub, PubSubError};
use crate::storage::{MemoryStore, OpStore, StorageError, WriteOutcome};
use crate::subs::{
    NoopPresence, Presence, SubscribeRequest, SubscribeResponse, SubscribeResult, Subscriptions,
};
use crate::txn::{Completion, StagedWrite, SubmitRequest, Transaction};
use crate::types::{DocId, OpContent, OpRecord, Snapshot, Version};

/// Result type for submissions.
pub type SubmitResult<T> = Result<T, SubmitError>;

/// Errors surfaced on the submit and snapshot-read paths.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubmitError {
    /// A middleware handler rejected the action.
    #[error(transparent)]
    Rejected(#[from] HookError),

    /// The apply engine rejected the operation.
    #[error(transparent)]
    Ot(#[from] OtError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    PubSub(#[from] PubSubError),

    /// Submitted against a version ahead of the document.
    #[error("Version conflict: submitted {submitted}, current {current}")]
    VersionConflict { submitted: Version, current: Version },

    /// Create against a document that already exists.
    #[error("Document was already created")]
    AlreadyCreated,

    /// Edit or delete against a document that does not exist.
    #[error("Document does not exist")]
    DocDoesNotExist,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SubmitError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Rejected(_) => "ERR_SUBMIT_REJECTED",
            Self::Ot(e) => e.code(),
            Self::Storage(e) => e.code(),
            Self::PubSub(e) => e.code(),
            Self::VersionConflict { .. } => "ERR_VERSION_CONFLICT",
            Self::AlreadyCreated => "ERR_DOC_ALREADY_CREATED",
            Self::DocDoesNotExist => "ERR_DOC_DOES_NOT_EXIST",
            Self::Internal(_) => "ERR_INTERNAL",
        }
    }
}

/// Outcome of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The op was applied and confirmed; the document is now at
    /// `version`.
    Applied { version: Version },
    /// An identical retry: this version was already occupied. The
    /// write was a no-op and nothing was re-published.
    AlreadyApplied,
}

/// Builder for a backend instance. Collaborators default to the
/// in-memory implementations and the no-op presence variant.
pub struct BackendBuilder {
    store: Option<Arc<dyn OpStore>>,
    pubsub: Option<Arc<dyn PubSub>>,
    presence: Option<Arc<dyn Presence>>,
}

impl BackendBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            pubsub: None,
            presence: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn OpStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn pubsub(mut self, pubsub: Arc<dyn PubSub>) -> Self {
        self.pubsub = Some(pubsub);
        self
    }

    pub fn presence(mut self, presence: Arc<dyn Presence>) -> Self {
        self.presence = Some(presence);
        self
    }

    pub fn build(self) -> Backend {
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let pubsub = self.pubsub.unwrap_or_else(|| Arc::new(MemoryPubSub::new()));
        let presence: Arc<dyn Presence> =
            self.presence.unwrap_or_else(|| Arc::new(NoopPresence));
        let subs = Subscriptions::new(pubsub.clone(), store.clone(), presence.clone());
        Backend {
            id: Uuid::new_v4(),
            store,
            pubsub,
            presence,
            registry: Registry::new(),
            subs,
        }
    }
}

impl Default for BackendBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of the non-persisting half of a submission.
enum Prepared {
    /// Ready to persist at the snapshot's version.
    Write(StagedWrite),
    /// The record's version is behind the document: an idempotent
    /// retry of something already durable.
    Stale(OpRecord),
}

/// The coordination surface for one logical document engine.
pub struct Backend {
    id: Uuid,
    store: Arc<dyn OpStore>,
    pubsub: Arc<dyn PubSub>,
    presence: Arc<dyn Presence>,
    registry: Registry,
    subs: Subscriptions,
}

impl Backend {
    /// A backend over the in-memory collaborators.
    pub fn new() -> Self {
        BackendBuilder::new().build()
    }

    pub fn builder() -> BackendBuilder {
        BackendBuilder::new()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn store(&self) -> &Arc<dyn OpStore> {
        &self.store
    }

    /// Register a middleware handler for one action.
    pub fn use_for(&self, action: &str, middleware: impl Middleware + 'static) {
        self.registry.use_for(action, middleware);
    }

    /// Register a wildcard middleware handler.
    pub fn use_all(&self, middleware: impl Middleware + 'static) {
        self.registry.use_all(middleware);
    }

    /// Submit one op record against a document: middleware, apply,
    /// persist, publish.
    pub async fn submit(&self, doc: &DocId, record: OpRecord) -> SubmitResult<SubmitOutcome> {
        match self.prepare(doc, record).await? {
            Prepared::Write(write) => self.persist(&write).await,
            Prepared::Stale(record) => {
                // Stale retry: the idempotent write path reports
                // whether this exact version was already occupied.
                match self.store.write_op(doc, record).await? {
                    WriteOutcome::AlreadyApplied => Ok(SubmitOutcome::AlreadyApplied),
                    WriteOutcome::Applied => {
                        Err(SubmitError::Internal("stale version applied".into()))
                    }
                }
            }
        }
    }

    /// Run the middleware actions and the apply engine for one
    /// submission without persisting anything.
    async fn prepare(&self, doc: &DocId, record: OpRecord) -> SubmitResult<Prepared> {
        // Pre-commit hooks; they may mutate the record.
        let mut request = Request::Submit(SubmitContext {
            doc: doc.clone(),
            record,
        });
        self.registry.trigger(&mut request).await?;
        let record = match request.submit_context_mut() {
            Some(ctx) => ctx.record.clone(),
            None => return Err(SubmitError::Internal("submit context lost".into())),
        };

        let snapshot = self.store.get_snapshot(doc).await?;

        if record.version > snapshot.version {
            return Err(SubmitError::VersionConflict {
                submitted: record.version,
                current: snapshot.version,
            });
        }
        if record.version < snapshot.version {
            return Ok(Prepared::Stale(record));
        }

        let mut apply_request = Request::Apply(SubmitContext {
            doc: doc.clone(),
            record: record.clone(),
        });
        self.registry.trigger(&mut apply_request).await?;

        let next = self.next_snapshot(&snapshot, &record)?;

        let mut commit_request = Request::Commit(SubmitContext {
            doc: doc.clone(),
            record: record.clone(),
        });
        self.registry.trigger(&mut commit_request).await?;

        Ok(Prepared::Write(StagedWrite {
            doc: doc.clone(),
            record,
            snapshot: next,
        }))
    }

    /// Make a prepared write durable and announce it.
    async fn persist(&self, write: &StagedWrite) -> SubmitResult<SubmitOutcome> {
        if let WriteOutcome::AlreadyApplied = self
            .store
            .write_op(&write.doc, write.record.clone())
            .await?
        {
            return Ok(SubmitOutcome::AlreadyApplied);
        }
        self.store
            .write_snapshot(&write.doc, write.snapshot.clone())
            .await?;
        self.pubsub
            .publish(&write.doc.channel(), &write.record)
            .await?;
        self.presence.cache_op(&write.record);
        self.presence.transform_all(&write.record);

        Logger::log(
            Severity::Info,
            "submit.applied",
            &[
                ("collection", &write.doc.collection),
                ("doc", &write.doc.doc),
                ("version", &write.snapshot.version.to_string()),
            ],
        );
        Ok(SubmitOutcome::Applied {
            version: write.snapshot.version,
        })
    }

    /// The snapshot resulting from applying `record` to `snapshot`.
    fn next_snapshot(&self, snapshot: &Snapshot, record: &OpRecord) -> SubmitResult<Snapshot> {
        let version = snapshot.version + 1;
        match &record.content {
            OpContent::Create { doc_type, data } => {
                if snapshot.exists() {
                    return Err(SubmitError::AlreadyCreated);
                }
                Ok(Snapshot {
                    version,
                    doc_type: Some(doc_type.clone()),
                    data: Some(data.clone()),
                    meta: snapshot.meta.clone(),
                })
            }
            OpContent::Edit { op } => {
                if !snapshot.exists() {
                    return Err(SubmitError::DocDoesNotExist);
                }
                let components = ot::decode_op(op)?;
                let data = snapshot.data.clone().unwrap_or(serde_json::Value::Null);
                Ok(Snapshot {
                    version,
                    doc_type: snapshot.doc_type.clone(),
                    data: Some(ot::apply(data, &components)?),
                    meta: snapshot.meta.clone(),
                })
            }
            OpContent::Delete => {
                if !snapshot.exists() {
                    return Err(SubmitError::DocDoesNotExist);
                }
                Ok(Snapshot {
                    version,
                    doc_type: None,
                    data: None,
                    meta: snapshot.meta.clone(),
                })
            }
        }
    }

    /// Open a multi-document atomic unit against this backend's
    /// collaborators.
    pub fn transaction(&self) -> Transaction {
        Transaction::new(
            self.store.clone(),
            self.pubsub.clone(),
            self.presence.clone(),
        )
    }

    /// Submit as a participant in a transaction. The prepared write
    /// is staged with the coordinator and becomes durable and visible
    /// only when the transaction commits; an abort discards it. The
    /// returned completion resolves exactly once, when the
    /// transaction reaches a terminal state. A preparation failure
    /// aborts the whole transaction.
    pub async fn submit_in(
        &self,
        txn: &Transaction,
        doc: &DocId,
        record: OpRecord,
    ) -> SubmitResult<Completion> {
        let (request, completion) = SubmitRequest::new(doc.clone());
        let Some(index) = txn.register(request).await else {
            // Terminal transaction: the request was resolved with the
            // terminal outcome on registration.
            return Ok(completion);
        };
        match self.prepare(doc, record).await {
            Ok(Prepared::Write(write)) => {
                txn.stage(index, write).await;
                Ok(completion)
            }
            Ok(Prepared::Stale(_)) => {
                // Already durable from an earlier submission; nothing
                // for the commit flush to do.
                txn.mark_success(index).await;
                Ok(completion)
            }
            Err(e) => {
                Logger::log(
                    Severity::Warn,
                    "txn.participant_failed",
                    &[("doc", &doc.to_string()), ("code", e.code())],
                );
                txn.abort().await;
                Err(e)
            }
        }
    }

    /// Batched snapshot read, passed through the `readSnapshots`
    /// middleware action. Rejected documents are dropped from the
    /// result; the first non-silent rejection is surfaced as the
    /// call's error.
    pub async fn get_snapshots(
        &self,
        request: &HashMap<String, Vec<String>>,
    ) -> SubmitResult<HashMap<String, HashMap<String, Snapshot>>> {
        let by_collection = self.store.bulk_get_snapshot(request).await?;
        let mut snapshots = Vec::new();
        for (collection, docs) in by_collection {
            for (doc_name, snapshot) in docs {
                snapshots.push((DocId::new(collection.clone(), doc_name), snapshot));
            }
        }

        let mut read_request = Request::ReadSnapshots(SnapshotReadContext::new(snapshots));
        self.registry.trigger(&mut read_request).await?;
        let Some(ctx) = read_request.snapshot_read_mut() else {
            return Err(SubmitError::Internal("read context lost".into()));
        };

        let rejections = ctx.take_rejections();
        let mut result: HashMap<String, HashMap<String, Snapshot>> = HashMap::new();
        for (doc, snapshot) in ctx.snapshots.drain(..) {
            if rejections.contains_key(&doc) {
                continue;
            }
            result.entry(doc.collection).or_default().insert(doc.doc, snapshot);
        }

        if let Some(loud) = rejections.into_values().find(|e| !e.is_silent()) {
            return Err(SubmitError::Rejected(loud));
        }
        Ok(result)
    }

    /// Bulk subscription: catch up from the op log, then listen live.
    pub async fn subscribe(&self, request: SubscribeRequest) -> SubscribeResult<SubscribeResponse> {
        self.subs.bulk_subscribe(request).await
    }

    /// Channels with at least one live stream, for leak checks.
    pub fn live_channel_count(&self) -> usize {
        self.subs.live_channel_count()
    }
}

impl Default for Backend {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OpMetadata;
    use serde_json::json;

    fn meta(seq: u64) -> OpMetadata {
        OpMetadata::new(Uuid::new_v4(), seq)
    }

    #[tokio::test]
    async fn test_create_then_edit() {
        let backend = Backend::new();
        let doc = DocId::new("notes", "n1");

        let outcome = backend
            .submit(&doc, OpRecord::create(0, "json", json!({}), meta(1)))
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Applied { version: 1 });

        let outcome = backend
            .submit(
                &doc,
                OpRecord::edit(1, json!({"op": "set", "p": ["title"], "val": "hi"}), meta(2)),
            )
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Applied { version: 2 });

        let snapshot = backend.store().get_snapshot(&doc).await.unwrap();
        assert_eq!(snapshot.data, Some(json!({"title": "hi"})));
    }

    #[tokio::test]
    async fn test_duplicate_create_is_idempotent() {
        let backend = Backend::new();
        let doc = DocId::new("c", "d1");
        let record = OpRecord::create(0, "text", json!(""), meta(1));

        backend.submit(&doc, record.clone()).await.unwrap();
        let retry = backend.submit(&doc, record).await.unwrap();
        assert_eq!(retry, SubmitOutcome::AlreadyApplied);

        assert_eq!(backend.store().get_version(&doc).await.unwrap(), 1);
        assert_eq!(backend.store().get_ops(&doc, 0, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_version_ahead_rejected() {
        let backend = Backend::new();
        let doc = DocId::new("c", "d1");

        let err = backend
            .submit(&doc, OpRecord::create(3, "json", json!({}), meta(1)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ERR_VERSION_CONFLICT");
    }

    #[tokio::test]
    async fn test_edit_missing_doc_rejected() {
        let backend = Backend::new();
        let doc = DocId::new("c", "ghost");

        let err = backend
            .submit(
                &doc,
                OpRecord::edit(0, json!({"op": "set", "p": ["a"], "val": 1}), meta(1)),
            )
            .await
            .unwrap_err();
        assert_eq!(err, SubmitError::DocDoesNotExist);
    }

    #[tokio::test]
    async fn test_delete_clears_type_and_data() {
        let backend = Backend::new();
        let doc = DocId::new("c", "d1");

        backend
            .submit(&doc, OpRecord::create(0, "json", json!({"a": 1}), meta(1)))
            .await
            .unwrap();
        backend
            .submit(&doc, OpRecord::delete(1, meta(2)))
            .await
            .unwrap();

        let snapshot = backend.store().get_snapshot(&doc).await.unwrap();
        assert_eq!(snapshot.version, 2);
        assert!(!snapshot.exists());
        assert_eq!(snapshot.data, None);
    }

    #[tokio::test]
    async fn test_two_backends_are_independent() {
        let a = Backend::new();
        let b = Backend::new();
        let doc = DocId::new("c", "d1");

        a.submit(&doc, OpRecord::create(0, "json", json!({}), meta(1)))
            .await
            .unwrap();

        assert_eq!(a.store().get_version(&doc).await.unwrap(), 1);
        assert_eq!(b.store().get_version(&doc).await.unwrap(), 0);
    }
}
