//! # Middleware Errors
//!
//! A hook error is the `{code, message}` shape surfaced at every
//! interception boundary. `code` is a stable machine-readable
//! identifier; the silent-rejection code instructs the consuming
//! layer to cancel delivery without surfacing anything to user code.

use thiserror::Error;

/// Code carried by rejections that cancel delivery silently.
pub const ERR_SNAPSHOT_READ_SILENT_REJECTION: &str = "ERR_SNAPSHOT_READ_SILENT_REJECTION";

/// Default code for snapshot read rejections.
pub const ERR_SNAPSHOT_READ_REJECTED: &str = "ERR_SNAPSHOT_READ_REJECTED";

/// Result type for middleware dispatch.
pub type HookResult = Result<(), HookError>;

/// Error raised by a middleware handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct HookError {
    pub code: String,
    pub message: String,
}

impl HookError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// A rejection that cancels delivery without reaching user-facing
    /// error handlers.
    pub fn silent_rejection() -> Self {
        Self::new(ERR_SNAPSHOT_READ_SILENT_REJECTION, "Snapshot read rejected")
    }

    pub fn rejection(message: impl Into<String>) -> Self {
        Self::new(ERR_SNAPSHOT_READ_REJECTED, message)
    }

    pub fn is_silent(&self) -> bool {
        self.code == ERR_SNAPSHOT_READ_SILENT_REJECTION
    }
}
