//! Dry-run store.
//!
//! Wraps another store and prevents pushes from executing, while indicating
//! success on return.

use crate::backend::{Store, StoreHandle};
use crate::error::Result;
use crate::item::UploadItem;
use async_trait::async_trait;

/// Dry-run store.
///
/// Reports every item as missing without asking the wrapped store, and drops
/// every push after logging an [`info event`](tracing::Event), so a dry run
/// shows everything that *would* be uploaded.
#[derive(Clone)]
pub struct DryRunStore {
    inner: StoreHandle,
}
impl DryRunStore {
    pub fn new(inner: StoreHandle) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Store for DryRunStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn namespace(&self) -> &str {
        self.inner.namespace()
    }

    async fn contains(&self, items: &[UploadItem]) -> Result<Vec<UploadItem>> {
        Ok(items.to_vec())
    }

    async fn push(&self, item: &UploadItem, data: Vec<u8>) -> Result<()> {
        tracing::info!(digest = %item.digest, bytes = data.len(), "Skipping push during dry run");
        Ok(())
    }

    async fn fetch(&self, digest: &str) -> Result<Vec<u8>> {
        self.inner.fetch(digest).await
    }
}
