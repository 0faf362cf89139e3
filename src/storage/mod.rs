//! # Op Store Boundary
//!
//! The durable op-log / snapshot storage collaborator, specified at
//! its trait boundary. The core never assumes storage calls complete
//! in call order; every method is an independent suspension point.

mod errors;
mod memory;

pub use errors::{StorageError, StorageResult};
pub use memory::MemoryStore;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use uuid::Uuid;

use crate::types::{DocId, OpRecord, Snapshot, Version};

/// Boxed future returned by store methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StorageResult<T>> + Send + 'a>>;

/// Outcome of an op write.
///
/// Writing at an already-occupied version is defined as an idempotent
/// no-op; it is reported distinctly so retrying callers can tell
/// "applied now" from "already applied earlier".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    AlreadyApplied,
}

/// Durable op-log and snapshot storage.
pub trait OpStore: Send + Sync {
    /// Current version of a document; 0 if it has never been written.
    fn get_version<'a>(&'a self, doc: &'a DocId) -> StoreFuture<'a, Version>;

    /// Append one op record. A write at an occupied version is an
    /// idempotent no-op; a write past the next version is a
    /// `VersionGap` error.
    fn write_op<'a>(&'a self, doc: &'a DocId, record: OpRecord) -> StoreFuture<'a, WriteOutcome>;

    /// Ordered op records with `from <= version < to`; `to = None`
    /// means through the latest.
    fn get_ops<'a>(
        &'a self,
        doc: &'a DocId,
        from: Version,
        to: Option<Version>,
    ) -> StoreFuture<'a, Vec<OpRecord>>;

    /// Materialized current state; the empty snapshot for documents
    /// that have never been written.
    fn get_snapshot<'a>(&'a self, doc: &'a DocId) -> StoreFuture<'a, Snapshot>;

    fn write_snapshot<'a>(&'a self, doc: &'a DocId, snapshot: Snapshot) -> StoreFuture<'a, ()>;

    /// Batched snapshot fetch, collection → doc names. Documents that
    /// do not exist are omitted from the result.
    fn bulk_get_snapshot<'a>(
        &'a self,
        request: &'a HashMap<String, Vec<String>>,
    ) -> StoreFuture<'a, HashMap<String, HashMap<String, Snapshot>>> {
        Box::pin(async move {
            let mut result: HashMap<String, HashMap<String, Snapshot>> = HashMap::new();
            for (collection, docs) in request {
                for doc_name in docs {
                    let doc = DocId::new(collection.clone(), doc_name.clone());
                    let snapshot = self.get_snapshot(&doc).await?;
                    if snapshot.exists() {
                        result
                            .entry(collection.clone())
                            .or_default()
                            .insert(doc_name.clone(), snapshot);
                    }
                }
            }
            Ok(result)
        })
    }

    /// Batched backlog fetch for the subscription engine: one entry
    /// per requested document, from its declared version onward.
    fn get_ops_bulk<'a>(
        &'a self,
        requests: &'a [(DocId, Version)],
    ) -> StoreFuture<'a, Vec<Vec<OpRecord>>> {
        Box::pin(async move {
            let mut result = Vec::with_capacity(requests.len());
            for (doc, from) in requests {
                result.push(self.get_ops(doc, *from, None).await?);
            }
            Ok(result)
        })
    }

    /// Finalize a multi-document transaction.
    fn commit_transaction<'a>(&'a self, id: Uuid) -> StoreFuture<'a, ()>;

    /// Roll back a multi-document transaction.
    fn abort_transaction<'a>(&'a self, id: Uuid) -> StoreFuture<'a, ()>;
}
