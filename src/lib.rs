//! quillsync - A deterministic synchronization core for real-time
//! collaborative documents
//!
//! One backend instance coordinates versioned submissions against an
//! op log, dispatches middleware around every action, applies
//! path-addressed edits to JSON snapshots, and feeds live op streams
//! through a bulk subscription engine.

pub mod backend;
pub mod middleware;
pub mod observability;
pub mod ot;
pub mod pubsub;
pub mod storage;
pub mod subs;
pub mod txn;
pub mod types;

pub use backend::{Backend, BackendBuilder, SubmitError, SubmitOutcome, SubmitResult};
pub use subs::{OpStream, SubscribeError, SubscribeRequest, SubscribeResponse};
pub use txn::{Completion, Transaction, TransactionError, TxnState};
pub use types::{DocId, OpContent, OpMetadata, OpRecord, Snapshot, Version};
