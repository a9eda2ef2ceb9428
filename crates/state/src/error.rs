//! State Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A state error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for state operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Manifest paths are used as state keys and must be absolute.
    #[display("path must be absolute: {}", _0.display())]
    NotAbsolute(#[error(not(source))] PathBuf),
    /// The state file exists but couldn't be read.
    #[display("unable to read state file: {}", _0.display())]
    Unreadable(#[error(not(source))] PathBuf),
    /// The state file was read but doesn't decode as a saved state.
    #[display("corrupt state file: {}", _0.display())]
    Corrupt(#[error(not(source))] PathBuf),
    /// The state file was written by an incompatible format version.
    #[display("unsupported state version {found:?}, expected {expected:?}")]
    VersionMismatch { found: String, expected: &'static str },
    /// The state file was written on a different operating system.
    #[display("state was recorded on {found:?}, refusing to load it on {expected:?}")]
    OsMismatch { found: String, expected: &'static str },
    /// The state's digests were computed with a different hash algorithm.
    #[display("state digests use {found:?}, expected {expected:?}")]
    AlgoMismatch { found: String, expected: &'static str },
    /// The state isn't tied to a manifest, so there's nowhere to save it.
    #[display("state has no manifest path to persist to")]
    NotPersistable,
    /// Writing (or atomically replacing) a file failed.
    #[display("unable to write {}", _0.display())]
    Write(#[error(not(source))] PathBuf),
    /// Two paths share no common root (different prefixes, or one relative).
    #[display("{} cannot be made relative to {}", path.display(), base.display())]
    Unrelated { path: PathBuf, base: PathBuf },
    /// Paths are persisted as strings, so they must be valid UTF-8.
    #[display("path is not valid UTF-8: {}", _0.display())]
    NonUtf8(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreadable(_) | Self::Write(_))
    }

    /// Returns `true` for the errors that mean an existing state file can't be
    /// trusted (as opposed to a caller mistake).
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::Unreadable(_) | Self::Corrupt(_) | Self::VersionMismatch { .. }
                | Self::OsMismatch { .. }
                | Self::AlgoMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display() {
        assert_eq!(
            ErrorKind::VersionMismatch { found: "0.9".into(), expected: "1.0" }.to_string(),
            r#"unsupported state version "0.9", expected "1.0""#
        );
        assert_eq!(ErrorKind::NotPersistable.to_string(), "state has no manifest path to persist to");
    }

    #[test]
    fn error_kind_corruption() {
        assert!(ErrorKind::Corrupt(PathBuf::from("/a.state")).is_corruption());
        assert!(ErrorKind::OsMismatch { found: "windows".into(), expected: "linux" }.is_corruption());
        assert!(ErrorKind::AlgoMismatch { found: "sha-1".into(), expected: "blake3" }.is_corruption());
        assert!(!ErrorKind::NotAbsolute(PathBuf::from("a")).is_corruption());
        assert!(!ErrorKind::NotPersistable.is_corruption());
    }
}
