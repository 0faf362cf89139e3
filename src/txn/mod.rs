//! # Transaction Coordinator
//!
//! Three-state machine per multi-document atomic unit:
//! Pending (initial), Committed, Aborted (both terminal).
//!
//! Participants do not persist anything themselves. Each one stages a
//! prepared write (record plus the snapshot it produces) with the
//! coordinator; the Committed transition flushes every staged write
//! to storage and the bus in registration order, and the Aborted
//! transition discards them. Nothing a transaction wrote is visible
//! to readers or subscribers before commit.
//!
//! Commit is a request, not a trigger: the Committed transition fires
//! only once commit has been asked for AND every registered submit
//! request has independently reported success. Abort wins
//! unconditionally whenever it reaches the state machine first.
//!
//! Every registered request receives exactly one terminal completion,
//! regardless of how many times commit/abort are called or in what
//! order. Completions are `oneshot` channels, so double delivery is
//! impossible by construction.

mod errors;

pub use errors::{TransactionError, TxnResult};

use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};
use uuid::Uuid;

use crate::observability::{Logger, Severity};
use crate::pubsub::PubSub;
use crate::storage::{OpStore, WriteOutcome};
use crate::subs::Presence;
use crate::types::{DocId, OpRecord, Snapshot};

/// Receives a request's terminal outcome.
pub type Completion = oneshot::Receiver<TxnResult>;

/// A fully prepared but not yet durable write: the record to append
/// and the snapshot that applying it produces.
#[derive(Debug, Clone)]
pub struct StagedWrite {
    pub doc: DocId,
    pub record: OpRecord,
    pub snapshot: Snapshot,
}

/// One participant's in-flight write inside a transaction.
#[derive(Debug)]
pub struct SubmitRequest {
    pub doc: DocId,
    success: bool,
    write: Option<StagedWrite>,
    done: Option<oneshot::Sender<TxnResult>>,
}

impl SubmitRequest {
    /// Create a request and the channel its terminal outcome will
    /// arrive on.
    pub fn new(doc: DocId) -> (Self, Completion) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                doc,
                success: false,
                write: None,
                done: Some(tx),
            },
            rx,
        )
    }

    fn resolve(mut self, result: TxnResult) {
        if let Some(done) = self.done.take() {
            // The receiver may have been dropped; that is its choice.
            let _ = done.send(result);
        }
    }
}

/// Observable transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Pending,
    Committed,
    Aborted,
}

#[derive(Debug, Clone, Copy)]
enum State {
    Pending { wants_commit: bool },
    Committed,
    Aborted,
}

struct Inner {
    state: State,
    requests: Vec<SubmitRequest>,
    /// Terminal outcome, set once the flush or abort completes. Late
    /// registrations resolve against this immediately.
    outcome: Option<TxnResult>,
}

/// A multi-document atomic unit of submission.
///
/// State transitions, the staged-write flush, and their storage calls
/// run under one async mutex, so a second commit/abort arriving
/// mid-transition waits and then observes the terminal state instead
/// of double-firing.
pub struct Transaction {
    id: Uuid,
    store: Arc<dyn OpStore>,
    pubsub: Arc<dyn PubSub>,
    presence: Arc<dyn Presence>,
    inner: Mutex<Inner>,
}

impl Transaction {
    pub fn new(
        store: Arc<dyn OpStore>,
        pubsub: Arc<dyn PubSub>,
        presence: Arc<dyn Presence>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            store,
            pubsub,
            presence,
            inner: Mutex::new(Inner {
                state: State::Pending { wants_commit: false },
                requests: Vec::new(),
                outcome: None,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn state(&self) -> TxnState {
        match self.inner.lock().await.state {
            State::Pending { .. } => TxnState::Pending,
            State::Committed => TxnState::Committed,
            State::Aborted => TxnState::Aborted,
        }
    }

    /// Register a participant. Returns the index used to stage its
    /// write, or `None` if the transaction was already terminal, in
    /// which case the request has been resolved with the terminal
    /// outcome.
    pub async fn register(&self, request: SubmitRequest) -> Option<usize> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            State::Pending { .. } => {
                inner.requests.push(request);
                let index = inner.requests.len() - 1;
                self.update(&mut inner).await;
                Some(index)
            }
            State::Committed => {
                request.resolve(inner.outcome.clone().unwrap_or(Ok(())));
                None
            }
            State::Aborted => {
                request.resolve(
                    inner
                        .outcome
                        .clone()
                        .unwrap_or(Err(TransactionError::aborted())),
                );
                None
            }
        }
    }

    /// Stage the participant's prepared write. The write becomes
    /// durable only when the transaction commits.
    pub async fn stage(&self, index: usize, write: StagedWrite) {
        let mut inner = self.inner.lock().await;
        if let State::Pending { .. } = inner.state {
            if let Some(request) = inner.requests.get_mut(index) {
                request.write = Some(write);
                request.success = true;
            }
            self.update(&mut inner).await;
        }
    }

    /// Report that the participant at `index` is complete with
    /// nothing left to flush (its write was already durable).
    pub async fn mark_success(&self, index: usize) {
        let mut inner = self.inner.lock().await;
        if let State::Pending { .. } = inner.state {
            if let Some(request) = inner.requests.get_mut(index) {
                request.success = true;
            }
            self.update(&mut inner).await;
        }
    }

    /// Ask the transaction to commit. The Committed transition fires
    /// only once every registered request has reported success.
    /// A no-op after a terminal state.
    pub async fn commit(&self) {
        let mut inner = self.inner.lock().await;
        if let State::Pending { ref mut wants_commit } = inner.state {
            *wants_commit = true;
        } else {
            return;
        }
        self.update(&mut inner).await;
    }

    /// Abort unconditionally, regardless of commit requests or
    /// participant state. Staged writes are discarded; nothing they
    /// would have written reaches storage or the bus. Safe to call
    /// repeatedly.
    pub async fn abort(&self) {
        let mut inner = self.inner.lock().await;
        if !matches!(inner.state, State::Pending { .. }) {
            return;
        }
        inner.state = State::Aborted;
        let message = match self.store.abort_transaction(self.id).await {
            Ok(()) => "Transaction aborted".to_string(),
            Err(e) => e.to_string(),
        };
        let error = TransactionError::Aborted { message };
        inner.outcome = Some(Err(error.clone()));
        Logger::log(
            Severity::Warn,
            "txn.aborted",
            &[
                ("id", &self.id.to_string()),
                ("requests", &inner.requests.len().to_string()),
            ],
        );
        for request in inner.requests.drain(..) {
            request.resolve(Err(error.clone()));
        }
    }

    async fn update(&self, inner: &mut Inner) {
        let State::Pending { wants_commit } = inner.state else {
            return;
        };
        if !wants_commit || !inner.requests.iter().all(|r| r.success) {
            return;
        }
        inner.state = State::Committed;

        // Flush staged writes in registration order, then finalize.
        let mut result = Ok(());
        for i in 0..inner.requests.len() {
            let Some(write) = inner.requests[i].write.take() else {
                continue;
            };
            if let Err(e) = self.persist(&write).await {
                result = Err(e);
                break;
            }
        }
        if result.is_ok() {
            result = self
                .store
                .commit_transaction(self.id)
                .await
                .map_err(|e| TransactionError::CommitFailed {
                    message: e.to_string(),
                });
        }

        inner.outcome = Some(result.clone());
        Logger::log(
            Severity::Info,
            "txn.committed",
            &[
                ("id", &self.id.to_string()),
                ("requests", &inner.requests.len().to_string()),
            ],
        );
        for request in inner.requests.drain(..) {
            request.resolve(result.clone());
        }
    }

    /// Make one staged write durable and announce it.
    async fn persist(&self, write: &StagedWrite) -> TxnResult {
        let failed = |e: &dyn std::fmt::Display| TransactionError::CommitFailed {
            message: e.to_string(),
        };
        match self
            .store
            .write_op(&write.doc, write.record.clone())
            .await
            .map_err(|e| failed(&e))?
        {
            // Occupied version: already durable, nothing to announce.
            WriteOutcome::AlreadyApplied => return Ok(()),
            WriteOutcome::Applied => {}
        }
        self.store
            .write_snapshot(&write.doc, write.snapshot.clone())
            .await
            .map_err(|e| failed(&e))?;
        self.pubsub
            .publish(&write.doc.channel(), &write.record)
            .await
            .map_err(|e| failed(&e))?;
        self.presence.cache_op(&write.record);
        self.presence.transform_all(&write.record);
        Ok(())
    }
}
