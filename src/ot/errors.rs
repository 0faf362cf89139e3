//! # Apply Engine Errors
//!
//! Errors raised while resolving paths or applying components.
//! All of them are fatal to the single apply call that raised them:
//! components mutate the document in place, so the caller must treat
//! the document as being in an undefined intermediate state and stop
//! folding further components.

use thiserror::Error;

/// Result type for apply-engine operations.
pub type OtResult<T> = Result<T, OtError>;

/// Apply-engine errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OtError {
    /// The path descends through a scalar leaf, is empty, or addresses
    /// a sequence position that cannot exist.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// An integer key was applied to a map, or a string key to a
    /// sequence.
    #[error("Path type mismatch: {0}")]
    PathTypeMismatch(String),

    /// The operation kind is not one the engine understands.
    #[error("Invalid operation kind: {0}")]
    InvalidOperationKind(String),

    /// Increment against an existing non-numeric value.
    #[error("Invalid increment: {0}")]
    InvalidIncrement(String),
}

impl OtError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPath(_) => "ERR_INVALID_PATH",
            Self::PathTypeMismatch(_) => "ERR_PATH_TYPE_MISMATCH",
            Self::InvalidOperationKind(_) => "ERR_INVALID_OPERATION_KIND",
            Self::InvalidIncrement(_) => "ERR_INVALID_INCREMENT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            OtError::InvalidPath("x".into()).code(),
            "ERR_INVALID_PATH"
        );
        assert_eq!(
            OtError::InvalidIncrement("x".into()).code(),
            "ERR_INVALID_INCREMENT"
        );
    }
}
