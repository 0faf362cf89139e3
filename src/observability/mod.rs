//! # Observability
//!
//! Structured logging for the coordination layer.
//!
//! - One log line = one event
//! - Deterministic key ordering (fields logged in the order given)
//! - Synchronous, no buffering

mod logger;

pub use logger::{Logger, Severity};
