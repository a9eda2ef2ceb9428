//! Storage Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Server or namespace missing, or unusable as given.
    #[display("invalid destination: {_0}")]
    InvalidDestination(#[error(not(source))] String),
    /// No store implementation speaks this server's protocol.
    #[display("unsupported server: {_0}")]
    UnsupportedServer(#[error(not(source))] String),
    /// Digests are lowercase hex; anything else could escape the store.
    #[display("invalid digest: {_0:?}")]
    InvalidDigest(#[error(not(source))] String),
    /// No object with this digest in the store.
    #[display("object not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Compressing or decompressing an object body failed.
    #[display("compression error")]
    Compression,
    /// The store refused an object (content doesn't match its digest).
    #[display("object rejected: {_0}")]
    Rejected(#[error(not(source))] String),
    /// A file selected for upload couldn't be read.
    #[display("unable to read upload source: {}", _0.display())]
    Source(#[error(not(source))] PathBuf),
    /// Some pushes of an upload failed; each failure is a child of this error.
    #[display("{failed} of {attempted} pushes failed")]
    Incomplete { failed: usize, attempted: usize },
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Source(_) | Self::Incomplete { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_retryable() {
        assert!(ErrorKind::Io(IoError::other("disk on fire")).is_retryable());
        assert!(ErrorKind::Incomplete { failed: 1, attempted: 3 }.is_retryable());
        assert!(!ErrorKind::InvalidDigest("../x".into()).is_retryable());
        assert!(!ErrorKind::UnsupportedServer("https://example.com".into()).is_retryable());
    }

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::Incomplete { failed: 2, attempted: 5 }.to_string(), "2 of 5 pushes failed");
        assert_eq!(ErrorKind::InvalidDigest("../x".into()).to_string(), r#"invalid digest: "../x""#);
    }
}
