//! Store trait and implementations.
//!
//! A [`Store`] is a content-addressed object store scoped to one namespace:
//! objects are named by the digest of their (uncompressed) content, so an
//! object is either present with the right content or absent.

mod dry;
mod local;
#[cfg(any(test, feature = "mock"))]
mod mock;

pub use self::dry::DryRunStore;
pub use self::local::LocalStore;
#[cfg(any(test, feature = "mock"))]
pub use self::mock::{MockCall, MockStore};
use crate::error::{ErrorKind, Result};
use crate::item::{Destination, UploadItem};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Shared handle to a store.
pub type StoreHandle = Arc<dyn Store>;

/// Unified interface for content-addressed stores.
///
/// # Examples
///
/// ```no_run
/// use isolate_storage::{Store, UploadItem, error::Result};
///
/// async fn ensure_present(store: &dyn Store, data: Vec<u8>) -> Result<()> {
///     let item = UploadItem::new(isolate_storage::digest_of(&data), data.len() as u64, false);
///     if !store.contains(std::slice::from_ref(&item)).await?.is_empty() {
///         store.push(&item, data).await?;
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait Store: Send + Sync {
    /// Name of the store (the server it was opened from); used for logging.
    fn name(&self) -> &str;

    /// Namespace every object of this store lives in.
    fn namespace(&self) -> &str;

    /// Returns the subset of `items` that the store doesn't have yet, in the
    /// order given.
    async fn contains(&self, items: &[UploadItem]) -> Result<Vec<UploadItem>>;

    /// Stores `data` (uncompressed) as the object for `item`.
    ///
    /// Pushing an object that is already present is not an error.
    async fn push(&self, item: &UploadItem, data: Vec<u8>) -> Result<()>;

    /// Retrieves the (uncompressed) content of an object.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the store
    /// has no object with this digest.
    async fn fetch(&self, digest: &str) -> Result<Vec<u8>>;
}

/// Opens the store a [`Destination`] points to.
///
/// Only filesystem stores are supported: `file://<absolute path>` or a bare
/// absolute path. Nothing is created or touched until the first push.
pub fn open(destination: &Destination) -> Result<StoreHandle> {
    let server = destination.server();
    let root = match server.strip_prefix("file://") {
        Some(path) => PathBuf::from(path),
        None if Path::new(server).is_absolute() => PathBuf::from(server),
        None => exn::bail!(ErrorKind::UnsupportedServer(server.to_string())),
    };
    let store = LocalStore::new(server, root, destination.namespace())?;
    tracing::debug!(store = store.name(), namespace = store.namespace(), "Opened local store");
    Ok(Arc::new(store))
}
