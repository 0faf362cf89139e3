//! # Storage Errors

use thiserror::Error;

use crate::types::Version;

/// Result type for op store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors surfaced by the op store collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Write at a version beyond the next unoccupied one. Writes at
    /// an already-occupied version are not errors; see
    /// [`WriteOutcome::AlreadyApplied`](super::WriteOutcome).
    #[error("Version gap: expected {expected}, got {got}")]
    VersionGap { expected: Version, got: Version },

    /// Backend failure (I/O, transport, injected test fault).
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Internal error.
    #[error("Internal storage error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::VersionGap { .. } => "ERR_VERSION_GAP",
            Self::Backend(_) => "ERR_STORAGE_BACKEND",
            Self::Internal(_) => "ERR_STORAGE_INTERNAL",
        }
    }
}
