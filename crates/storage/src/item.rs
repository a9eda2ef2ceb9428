//! Units of upload and where they go.

use crate::error::{ErrorKind, Result};
use std::path::PathBuf;

/// Compression level applied to every upload.
///
/// Fixed rather than derived from content; namespaces that don't compress
/// ignore it.
pub const COMPRESSION_LEVEL: u32 = 6;

/// What a store needs to know about one object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UploadItem {
    pub digest: String,
    pub size: u64,
    pub high_priority: bool,
    pub compression_level: u32,
}
impl UploadItem {
    pub fn new(digest: impl Into<String>, size: u64, high_priority: bool) -> Self {
        Self {
            digest: digest.into(),
            size,
            high_priority,
            compression_level: COMPRESSION_LEVEL,
        }
    }
}

/// An [`UploadItem`] whose content is read from a local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileToUpload {
    pub item: UploadItem,
    pub path: PathBuf,
}
impl FileToUpload {
    pub fn new(item: UploadItem, path: impl Into<PathBuf>) -> Self {
        Self { item, path: path.into() }
    }
}

/// A (server, namespace) pair. Both parts are required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    server: String,
    namespace: String,
}
impl Destination {
    pub fn new(server: impl Into<String>, namespace: impl Into<String>) -> Result<Self> {
        let (server, namespace) = (server.into(), namespace.into());
        if server.trim().is_empty() {
            exn::bail!(ErrorKind::InvalidDestination("server is required".to_string()));
        }
        if namespace.trim().is_empty() {
            exn::bail!(ErrorKind::InvalidDestination("namespace is required".to_string()));
        }
        Ok(Self { server, namespace })
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}
