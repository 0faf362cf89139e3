//! # Dispatch Requests
//!
//! The mutable request object handed down a middleware chain. Each
//! variant corresponds to one named action; handlers registered for
//! the wildcard action see every variant.

use std::collections::HashMap;

use crate::types::{DocId, OpRecord, Snapshot};

use super::errors::HookError;

/// Named interception actions.
pub mod actions {
    /// A submission entering the system, before any validation.
    pub const SUBMIT: &str = "submit";
    /// About to apply an operation to the current snapshot.
    pub const APPLY: &str = "apply";
    /// Applied in memory, about to persist.
    pub const COMMIT: &str = "commit";
    /// A batch of snapshots about to be delivered to one subscriber.
    pub const READ_SNAPSHOTS: &str = "readSnapshots";
    /// The wildcard: runs for every action, after action handlers.
    pub const ALL: &str = "";
}

/// Context for submit/apply/commit actions: one in-flight write.
#[derive(Debug, Clone)]
pub struct SubmitContext {
    pub doc: DocId,
    pub record: OpRecord,
}

/// Context wrapping a batch of snapshots about to be delivered,
/// letting middleware reject individual snapshots by document id.
#[derive(Debug, Clone, Default)]
pub struct SnapshotReadContext {
    pub snapshots: Vec<(DocId, Snapshot)>,
    rejections: HashMap<DocId, HookError>,
}

impl SnapshotReadContext {
    pub fn new(snapshots: Vec<(DocId, Snapshot)>) -> Self {
        Self {
            snapshots,
            rejections: HashMap::new(),
        }
    }

    /// Record a per-document rejection. Delivery of that snapshot is
    /// cancelled; a non-silent error is surfaced to the caller.
    pub fn reject(&mut self, doc: DocId, error: HookError) {
        self.rejections.insert(doc, error);
    }

    /// Whether any rejection was recorded.
    pub fn has_rejection(&self) -> bool {
        !self.rejections.is_empty()
    }

    pub fn rejection_for(&self, doc: &DocId) -> Option<&HookError> {
        self.rejections.get(doc)
    }

    pub fn take_rejections(&mut self) -> HashMap<DocId, HookError> {
        std::mem::take(&mut self.rejections)
    }
}

/// A dispatched request. Mutable throughout its chain; never shared
/// between dispatches.
#[derive(Debug)]
pub enum Request {
    Submit(SubmitContext),
    Apply(SubmitContext),
    Commit(SubmitContext),
    ReadSnapshots(SnapshotReadContext),
}

impl Request {
    /// The action name this request dispatches under.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Submit(_) => actions::SUBMIT,
            Self::Apply(_) => actions::APPLY,
            Self::Commit(_) => actions::COMMIT,
            Self::ReadSnapshots(_) => actions::READ_SNAPSHOTS,
        }
    }

    /// The submit context, for the three write-path actions.
    pub fn submit_context_mut(&mut self) -> Option<&mut SubmitContext> {
        match self {
            Self::Submit(ctx) | Self::Apply(ctx) | Self::Commit(ctx) => Some(ctx),
            Self::ReadSnapshots(_) => None,
        }
    }

    pub fn snapshot_read_mut(&mut self) -> Option<&mut SnapshotReadContext> {
        match self {
            Self::ReadSnapshots(ctx) => Some(ctx),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_read_rejection() {
        let doc = DocId::new("c", "d1");
        let mut ctx = SnapshotReadContext::new(vec![(doc.clone(), Snapshot::empty())]);
        assert!(!ctx.has_rejection());

        ctx.reject(doc.clone(), HookError::rejection("no access"));
        assert!(ctx.has_rejection());
        assert!(ctx.rejection_for(&doc).is_some());
        assert!(ctx.rejection_for(&DocId::new("c", "other")).is_none());
    }
}
