//! Archive Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! Every variant except [`Upload`](ErrorKind::Upload) and
//! [`Request`](ErrorKind::Request) is scoped to a single tree: the batch logs
//! it, records the tree as failed and carries on with the others.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// ### Per-tree Errors
/// - [`ErrorKind::Configuration`]
/// - [`ErrorKind::CorruptState`]
/// - [`ErrorKind::SpecParse`]
/// - [`ErrorKind::BrokenItem`]
/// - [`ErrorKind::Metadata`]
/// - [`ErrorKind::Persist`]
///
/// ### Batch Errors
/// - [`ErrorKind::Request`] - raised before any tree is resolved.
/// - [`ErrorKind::Upload`] - raised after every tree was resolved; the digests
///   computed so far remain valid.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The archive options or the saved state contradict each other.
    #[display("invalid configuration: {_0}")]
    Configuration(#[error(not(source))] String),
    /// The saved state exists but can't be trusted.
    #[display("corrupt saved state: {}", _0.display())]
    CorruptState(#[error(not(source))] PathBuf),
    /// The manifest couldn't be expanded, or its variables couldn't be evaluated.
    #[display("unable to parse manifest: {_0}")]
    SpecParse(#[error(not(source))] String),
    /// The store was unreachable or rejected part of the batch.
    #[display("upload failed")]
    Upload,
    /// A listed input is missing, escapes the tree or has the wrong kind.
    #[display("broken item {}: {reason}", path.display())]
    BrokenItem { path: PathBuf, reason: &'static str },
    /// A file couldn't be inspected or hashed.
    #[display("unable to read metadata of {}", _0.display())]
    Metadata(#[error(not(source))] PathBuf),
    /// The `.isolated` output or its saved state couldn't be written.
    #[display("unable to persist {}", _0.display())]
    Persist(#[error(not(source))] PathBuf),
    /// A batch request file is invalid.
    #[display("invalid batch request {}: {problem}", path.display())]
    Request { path: PathBuf, problem: RequestProblem },
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upload | Self::Metadata(_) | Self::Persist(_))
    }
}

/// Why a batch request file was rejected, in the order checks are made.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum RequestProblem {
    #[display("no such file")]
    Missing,
    #[display("unable to read file")]
    Unreadable,
    #[display("not a valid request")]
    Malformed,
    #[display("unsupported version {_0}")]
    Version(i64),
    #[display("{} is not an absolute path", _0.display())]
    NotAbsolute(PathBuf),
    #[display("{} is not a directory", _0.display())]
    NotADirectory(PathBuf),
}
