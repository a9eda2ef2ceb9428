//! Per-file metadata, as persisted in both the saved state and the
//! `.isolated` document.

use serde::{Deserialize, Serialize};

/// Name of the hash algorithm used for every digest in the store.
pub const ALGO: &str = "blake3";

/// Priority value marking an item as high priority.
pub const HIGH_PRIORITY: &str = "0";

/// Hex digest of `bytes` using [`ALGO`].
pub fn digest_bytes(bytes: impl AsRef<[u8]>) -> String {
    blake3::hash(bytes.as_ref()).to_hex().to_string()
}

/// Metadata describing one file of an expanded tree.
///
/// The serialized keys are deliberately terse (`h`, `s`, `l`, ...) since a
/// tree can have tens of thousands of entries. Values are set once through the
/// constructors and `with_*` builders; there are no setters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Content digest.
    #[serde(rename = "h", default, skip_serializing_if = "Option::is_none")]
    digest: Option<String>,
    /// Symlink target, for entries that are links.
    #[serde(rename = "l", default, skip_serializing_if = "Option::is_none")]
    link: Option<String>,
    /// Unix permission bits.
    #[serde(rename = "m", default, skip_serializing_if = "Option::is_none")]
    mode: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    priority: Option<String>,
    /// Size in bytes.
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    /// Modification time (unix seconds); only kept in the saved state, where
    /// it decides whether the cached digest can be reused.
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    modified: Option<i64>,
}

impl FileMetadata {
    /// Metadata for a regular file with known content.
    pub fn file(digest: impl Into<String>, size: u64) -> Self {
        Self {
            digest: Some(digest.into()),
            size: Some(size),
            ..Self::default()
        }
    }

    /// Metadata for a symlink; links are recorded, never hashed.
    pub fn symlink(target: impl Into<String>) -> Self {
        Self {
            link: Some(target.into()),
            ..Self::default()
        }
    }

    pub fn with_modified(mut self, modified: i64) -> Self {
        self.modified = Some(modified);
        self
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Size in bytes, `0` when unknown (links, unhashed entries).
    pub fn size(&self) -> u64 {
        self.size.unwrap_or(0)
    }

    pub fn link(&self) -> Option<&str> {
        self.link.as_deref()
    }

    pub fn mode(&self) -> Option<u32> {
        self.mode
    }

    pub fn modified(&self) -> Option<i64> {
        self.modified
    }

    pub fn is_symlink(&self) -> bool {
        self.link.as_deref().is_some_and(|l| !l.is_empty())
    }

    /// Only the literal priority `"0"` is high priority; anything else
    /// (including no priority at all) is low.
    pub fn is_high_priority(&self) -> bool {
        self.priority.as_deref() == Some(HIGH_PRIORITY)
    }

    /// `true` when a previous run's digest can stand in for re-hashing a file
    /// that now has the given size and modification time.
    pub fn is_fresh(&self, size: u64, modified: i64) -> bool {
        self.digest.is_some() && self.size == Some(size) && self.modified == Some(modified)
    }

    /// The subset of fields written to the `.isolated` document.
    pub fn for_isolated(&self) -> Self {
        Self {
            modified: None,
            priority: None,
            ..self.clone()
        }
    }
}
