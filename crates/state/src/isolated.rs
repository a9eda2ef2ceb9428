//! The `.isolated` document: the uploaded description of one tree.

use crate::metadata::FileMetadata;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the `.isolated` document format.
pub const ISOLATED_VERSION: &str = "1.4";

/// Describes a tree in the store: which digest lives at which path, and how
/// to run the command inside it.
///
/// Fields are declared in key order and files are kept in a [`BTreeMap`] so
/// the same tree always serializes to the same bytes, and so to the same
/// digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Isolated {
    pub algo: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    pub files: BTreeMap<String, FileMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_cwd: Option<String>,
    pub version: String,
}

impl Isolated {
    /// Compact, deterministic serialization.
    pub fn to_bytes(&self) -> Vec<u8> {
        // Infallible: every key is a string and every value is plain data.
        serde_json::to_vec(self).unwrap_or_default()
    }
}
