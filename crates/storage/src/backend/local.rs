//! Local filesystem store.
//!
//! Objects live at `<root>/<namespace>/<digest>`. Writes go through a
//! temporary file in the namespace directory that is renamed into place, so
//! an object is never visible half-written.

use crate::backend::Store;
use crate::codec;
use crate::digest::{self, validate as validate_digest};
use crate::error::{ErrorKind, Result};
use crate::item::UploadItem;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Content-addressed store in a local directory.
///
/// # Examples
///
/// ```no_run
/// use isolate_storage::LocalStore;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = LocalStore::new("local", "/srv/cas", "default-gzip")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalStore {
    name: String,
    /// Root directory shared by every namespace.
    root: PathBuf,
    namespace: String,
}
impl LocalStore {
    /// Create a new local store.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidDestination`](ErrorKind::InvalidDestination) if the
    /// root is not absolute or the namespace isn't a single path component.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>, namespace: impl Into<String>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidDestination(format!("store root must be absolute: {}", root.display())));
        }
        let namespace = namespace.into();
        if namespace.is_empty() || namespace.starts_with('.') || namespace.contains(['/', '\\', '\0']) {
            exn::bail!(ErrorKind::InvalidDestination(format!("invalid namespace: {namespace:?}")));
        }
        Ok(Self { name: name.into(), root, namespace })
    }

    fn namespace_dir(&self) -> PathBuf {
        self.root.join(&self.namespace)
    }

    fn object_path(&self, digest: &str) -> Result<PathBuf> {
        Ok(self.namespace_dir().join(validate_digest(digest)?))
    }

    fn map_io_error(e: std::io::Error, digest: &str) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(digest.to_string()),
            _ => ErrorKind::Io(e),
        }
    }
}

#[async_trait]
impl Store for LocalStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn contains(&self, items: &[UploadItem]) -> Result<Vec<UploadItem>> {
        let mut missing = Vec::new();
        for item in items {
            let path = self.object_path(&item.digest)?;
            if !fs::try_exists(&path).await.map_err(ErrorKind::Io)? {
                missing.push(item.clone());
            }
        }
        Ok(missing)
    }

    async fn push(&self, item: &UploadItem, data: Vec<u8>) -> Result<()> {
        let path = self.object_path(&item.digest)?;
        let dir = self.namespace_dir();
        let compressed = codec::is_compressed(&self.namespace);
        let item = item.clone();
        // Hashing, compressing and syncing are all blocking work.
        let written = tokio::task::spawn_blocking(move || -> Result<()> {
            if digest::of(&data) != item.digest {
                exn::bail!(ErrorKind::Rejected(item.digest));
            }
            let body = match compressed {
                true => codec::compress(&data, item.compression_level)?,
                false => data,
            };
            std::fs::create_dir_all(&dir).map_err(ErrorKind::Io)?;
            let mut temp = tempfile::NamedTempFile::new_in(&dir).map_err(ErrorKind::Io)?;
            temp.write_all(&body).map_err(ErrorKind::Io)?;
            temp.persist(&path).map_err(|e| ErrorKind::Io(e.error))?;
            Ok(())
        })
        .await;
        written.map_err(|e| ErrorKind::Io(e.into()))?
    }

    async fn fetch(&self, digest: &str) -> Result<Vec<u8>> {
        let path = self.object_path(digest)?;
        let body = fs::read(&path).await.map_err(|e| Self::map_io_error(e, digest))?;
        match codec::is_compressed(&self.namespace) {
            true => codec::decompress(&body),
            false => Ok(body),
        }
    }
}
