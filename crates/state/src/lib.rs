//! Per-file metadata and the persisted per-tree state.
//!
//! A tree is described twice:
//!
//! - the [`SavedState`] is this tool's private cache, kept next to the
//!   output as `<name>.isolated.state`. It remembers the last expansion of the
//!   manifest and the digest, size and mtime of every file, so that the next
//!   run only hashes what changed.
//! - the [`Isolated`] document is the public description that gets uploaded;
//!   its digest identifies the tree in the store.
//!
//! State files are rejected (never reinterpreted) when they were written by a
//! different format version or operating system.

pub mod error;
mod isolated;
mod metadata;
pub mod path;
mod saved;
pub mod store;

pub use crate::isolated::{ISOLATED_VERSION, Isolated};
pub use crate::metadata::{ALGO, FileMetadata, HIGH_PRIORITY, digest_bytes};
pub use crate::saved::{HOST_OS, STATE_VERSION, SavedState, Variables};
