//! # Core Types
//!
//! Document identity, versions, operation records, and snapshots.
//!
//! A document is addressed by (collection, doc name). Its history is a
//! strictly increasing sequence of operation records starting at
//! version 0; a document that has never been written has version 0 and
//! no type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Per-document version. Strictly increasing, starting at 0.
pub type Version = u64;

/// Document identity: (collection, document name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocId {
    pub collection: String,
    pub doc: String,
}

impl DocId {
    pub fn new(collection: impl Into<String>, doc: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            doc: doc.into(),
        }
    }

    /// Deterministic pub/sub channel name for this document.
    pub fn channel(&self) -> String {
        channel_name(&self.collection, &self.doc)
    }
}

impl std::fmt::Display for DocId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.doc)
    }
}

/// Derive the pub/sub channel name for a (collection, doc) pair.
///
/// Every subscriber and publisher must agree on this mapping; the
/// subscription engine demultiplexes incoming messages by it.
pub fn channel_name(collection: &str, doc: &str) -> String {
    format!("{}.{}", collection, doc)
}

/// The payload of one operation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OpContent {
    /// Create marker: establishes the document with a type and initial data.
    Create { doc_type: String, data: Value },
    /// An edit against the document's current state. The payload is
    /// opaque to the coordination layer; the apply engine decodes it.
    Edit { op: Value },
    /// Delete marker: removes the document's data and type.
    Delete,
}

/// Metadata carried on every operation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpMetadata {
    /// Submitting source (connection/agent) id.
    pub source: Uuid,
    /// Source-local sequence number.
    pub seq: u64,
    /// Submission timestamp.
    pub ts: DateTime<Utc>,
    /// Arbitrary caller-supplied metadata.
    #[serde(default)]
    pub user: Value,
}

impl OpMetadata {
    pub fn new(source: Uuid, seq: u64) -> Self {
        Self {
            source,
            seq,
            ts: Utc::now(),
            user: Value::Null,
        }
    }
}

/// One durable, versioned edit (or create/delete marker).
///
/// Immutable once written. At most one record may exist per
/// (document, version); the op store treats a write at an occupied
/// version as an idempotent no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpRecord {
    pub version: Version,
    pub content: OpContent,
    pub meta: OpMetadata,
}

impl OpRecord {
    pub fn create(
        version: Version,
        doc_type: impl Into<String>,
        data: Value,
        meta: OpMetadata,
    ) -> Self {
        Self {
            version,
            content: OpContent::Create {
                doc_type: doc_type.into(),
                data,
            },
            meta,
        }
    }

    pub fn edit(version: Version, op: Value, meta: OpMetadata) -> Self {
        Self {
            version,
            content: OpContent::Edit { op },
            meta,
        }
    }

    pub fn delete(version: Version, meta: OpMetadata) -> Self {
        Self {
            version,
            content: OpContent::Delete,
            meta,
        }
    }
}

/// Materialized current state of a document.
///
/// Derived entirely from the ordered operation history. A document
/// that does not exist has version 0, no type, and no data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: Version,
    pub doc_type: Option<String>,
    pub data: Option<Value>,
    #[serde(default)]
    pub meta: Value,
}

impl Snapshot {
    /// The snapshot of a document that has never been written.
    pub fn empty() -> Self {
        Self {
            version: 0,
            doc_type: None,
            data: None,
            meta: Value::Null,
        }
    }

    pub fn exists(&self) -> bool {
        self.doc_type.is_some()
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_channel_name_deterministic() {
        let a = DocId::new("notes", "n1");
        let b = DocId::new("notes", "n1");
        assert_eq!(a.channel(), b.channel());
        assert_eq!(a.channel(), "notes.n1");
    }

    #[test]
    fn test_empty_snapshot() {
        let snap = Snapshot::empty();
        assert_eq!(snap.version, 0);
        assert!(!snap.exists());
    }

    #[test]
    fn test_op_record_constructors() {
        let meta = OpMetadata::new(Uuid::new_v4(), 1);
        let create = OpRecord::create(0, "json", json!({}), meta.clone());
        assert!(matches!(create.content, OpContent::Create { .. }));

        let edit = OpRecord::edit(1, json!({"op": "set"}), meta.clone());
        assert!(matches!(edit.content, OpContent::Edit { .. }));

        let delete = OpRecord::delete(2, meta);
        assert!(matches!(delete.content, OpContent::Delete));
    }
}
