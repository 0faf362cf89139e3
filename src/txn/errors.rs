//! # Transaction Errors

use thiserror::Error;

/// Terminal outcome delivered to every registered submit request.
pub type TxnResult = Result<(), TransactionError>;

/// Errors delivered through a transaction's completion channels.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    /// The transaction aborted. Carries the storage-level abort
    /// error's message when one was reported.
    #[error("{message}")]
    Aborted { message: String },

    /// The storage commit call failed after every participant had
    /// reported success.
    #[error("Transaction commit failed: {message}")]
    CommitFailed { message: String },
}

impl TransactionError {
    /// The default abort error, used when storage reported no error
    /// of its own.
    pub fn aborted() -> Self {
        Self::Aborted {
            message: "Transaction aborted".into(),
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Aborted { .. } => "ERR_TRANSACTION_ABORTED",
            Self::CommitFailed { .. } => "ERR_TRANSACTION_COMMIT_FAILED",
        }
    }
}
