//! # In-Memory Op Store
//!
//! Reference store used by tests and embedded deployments. Also the
//! fault-injection surface for exercising failure paths: backlog
//! fetches can be delayed to widen the subscribe race window, and
//! commit/abort can be made to fail with a chosen message.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use uuid::Uuid;

use crate::types::{DocId, OpRecord, Snapshot, Version};

use super::errors::{StorageError, StorageResult};
use super::{OpStore, StoreFuture, WriteOutcome};

#[derive(Debug, Default)]
struct DocEntry {
    ops: Vec<OpRecord>,
    snapshot: Snapshot,
}

/// In-memory op-log and snapshot store.
#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<HashMap<DocId, DocEntry>>,
    committed: RwLock<Vec<Uuid>>,
    aborted: RwLock<Vec<Uuid>>,
    // Fault injection for tests.
    get_ops_delay: RwLock<Option<Duration>>,
    fail_get_ops: RwLock<Option<String>>,
    fail_commit: RwLock<Option<String>>,
    fail_abort: RwLock<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every backlog fetch, widening the window between channel
    /// subscription and op reconciliation.
    pub fn set_get_ops_delay(&self, delay: Duration) {
        if let Ok(mut slot) = self.get_ops_delay.write() {
            *slot = Some(delay);
        }
    }

    pub fn fail_next_get_ops(&self, message: impl Into<String>) {
        if let Ok(mut slot) = self.fail_get_ops.write() {
            *slot = Some(message.into());
        }
    }

    pub fn fail_commits(&self, message: impl Into<String>) {
        if let Ok(mut slot) = self.fail_commit.write() {
            *slot = Some(message.into());
        }
    }

    pub fn fail_aborts(&self, message: impl Into<String>) {
        if let Ok(mut slot) = self.fail_abort.write() {
            *slot = Some(message.into());
        }
    }

    /// Transaction ids finalized through `commit_transaction`.
    pub fn committed_transactions(&self) -> Vec<Uuid> {
        self.committed.read().map(|c| c.clone()).unwrap_or_default()
    }

    /// Transaction ids rolled back through `abort_transaction`.
    pub fn aborted_transactions(&self) -> Vec<Uuid> {
        self.aborted.read().map(|a| a.clone()).unwrap_or_default()
    }

    fn delay(&self) -> Option<Duration> {
        self.get_ops_delay.read().ok().and_then(|d| *d)
    }
}

impl OpStore for MemoryStore {
    fn get_version<'a>(&'a self, doc: &'a DocId) -> StoreFuture<'a, Version> {
        Box::pin(async move {
            let docs = self
                .docs
                .read()
                .map_err(|_| StorageError::Internal("lock poisoned".into()))?;
            Ok(docs.get(doc).map(|e| e.ops.len() as Version).unwrap_or(0))
        })
    }

    fn write_op<'a>(&'a self, doc: &'a DocId, record: OpRecord) -> StoreFuture<'a, WriteOutcome> {
        Box::pin(async move {
            let mut docs = self
                .docs
                .write()
                .map_err(|_| StorageError::Internal("lock poisoned".into()))?;
            let entry = docs.entry(doc.clone()).or_default();
            let next = entry.ops.len() as Version;
            if record.version < next {
                // Occupied version: idempotent retry, leave the
                // original record untouched.
                return Ok(WriteOutcome::AlreadyApplied);
            }
            if record.version > next {
                return Err(StorageError::VersionGap {
                    expected: next,
                    got: record.version,
                });
            }
            entry.ops.push(record);
            Ok(WriteOutcome::Applied)
        })
    }

    fn get_ops<'a>(
        &'a self,
        doc: &'a DocId,
        from: Version,
        to: Option<Version>,
    ) -> StoreFuture<'a, Vec<OpRecord>> {
        Box::pin(async move {
            if let Some(delay) = self.delay() {
                tokio::time::sleep(delay).await;
            }
            if let Ok(mut fail) = self.fail_get_ops.write() {
                if let Some(message) = fail.take() {
                    return Err(StorageError::Backend(message));
                }
            }
            let docs = self
                .docs
                .read()
                .map_err(|_| StorageError::Internal("lock poisoned".into()))?;
            let Some(entry) = docs.get(doc) else {
                return Ok(Vec::new());
            };
            let upper = to.unwrap_or(entry.ops.len() as Version);
            Ok(entry
                .ops
                .iter()
                .filter(|op| op.version >= from && op.version < upper)
                .cloned()
                .collect())
        })
    }

    fn get_snapshot<'a>(&'a self, doc: &'a DocId) -> StoreFuture<'a, Snapshot> {
        Box::pin(async move {
            let docs = self
                .docs
                .read()
                .map_err(|_| StorageError::Internal("lock poisoned".into()))?;
            Ok(docs
                .get(doc)
                .map(|e| e.snapshot.clone())
                .unwrap_or_default())
        })
    }

    fn write_snapshot<'a>(&'a self, doc: &'a DocId, snapshot: Snapshot) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut docs = self
                .docs
                .write()
                .map_err(|_| StorageError::Internal("lock poisoned".into()))?;
            docs.entry(doc.clone()).or_default().snapshot = snapshot;
            Ok(())
        })
    }

    fn commit_transaction<'a>(&'a self, id: Uuid) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            if let Ok(fail) = self.fail_commit.read() {
                if let Some(message) = fail.as_ref() {
                    return Err(StorageError::Backend(message.clone()));
                }
            }
            if let Ok(mut committed) = self.committed.write() {
                committed.push(id);
            }
            Ok(())
        })
    }

    fn abort_transaction<'a>(&'a self, id: Uuid) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            if let Ok(fail) = self.fail_abort.read() {
                if let Some(message) = fail.as_ref() {
                    return Err(StorageError::Backend(message.clone()));
                }
            }
            if let Ok(mut aborted) = self.aborted.write() {
                aborted.push(id);
            }
            Ok(())
        })
    }
}
