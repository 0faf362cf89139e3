//! # Path-Addressed Apply Engine
//!
//! Pure, synchronous document mutation over trees of string-keyed
//! maps and integer-indexed sequences. No I/O, no suspension: the
//! engine never holds a reference into the document past a single
//! apply call.

mod apply;
mod errors;
mod path;

pub use apply::{apply, apply_component, decode_op, Component};
pub use errors::{OtError, OtResult};
pub use path::{decode_path, resolve, Path, PathKey, Resolution, Slot, END};
