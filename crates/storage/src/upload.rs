//! The uploader: ships a set of local files to a store, once per digest.

use crate::backend::StoreHandle;
use crate::error::{ErrorKind, Result};
use crate::item::{FileToUpload, UploadItem};
use exn::{Exn, ResultExt};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::collections::{HashMap, HashSet};
use tracing::instrument;

/// What an upload did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadStats {
    /// Files handed to the uploader.
    pub items: usize,
    /// Distinct digests among them.
    pub distinct: usize,
    /// Distinct digests the store didn't have.
    pub missing: usize,
    /// Uncompressed bytes pushed.
    pub pushed_bytes: u64,
}

/// Uploads files to a store.
#[derive(Clone)]
pub struct Storage {
    store: StoreHandle,
    concurrency: usize,
}

impl Storage {
    /// `concurrency` bounds the number of pushes in flight (at least one).
    pub fn new(store: StoreHandle, concurrency: usize) -> Self {
        Self {
            store,
            concurrency: concurrency.max(1),
        }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// Uploads every file the store is missing.
    ///
    /// Files sharing a digest are pushed once (high priority if any of them
    /// is). Missing objects are pushed concurrently, high-priority ones
    /// first. A failed push doesn't stop the others: every push is attempted
    /// and the failures are reported together as one
    /// [`Incomplete`](ErrorKind::Incomplete) error.
    #[instrument(skip_all, fields(store = self.store.name(), namespace = self.store.namespace(), items = files.len()))]
    pub async fn upload(&self, files: Vec<FileToUpload>) -> Result<UploadStats> {
        let mut stats = UploadStats {
            items: files.len(),
            ..UploadStats::default()
        };
        let distinct = collapse(files);
        stats.distinct = distinct.len();
        if distinct.is_empty() {
            return Ok(stats);
        }

        let candidates: Vec<UploadItem> = distinct.iter().map(|f| f.item.clone()).collect();
        let missing = self.store.contains(&candidates).await?;
        let missing: HashSet<&str> = missing.iter().map(|item| item.digest.as_str()).collect();
        let mut queue: Vec<FileToUpload> =
            distinct.into_iter().filter(|f| missing.contains(f.item.digest.as_str())).collect();
        // Stable: within a priority, input order is kept.
        queue.sort_by_key(|f| !f.item.high_priority);
        stats.missing = queue.len();
        tracing::info!(distinct = stats.distinct, missing = stats.missing, "Uploading missing items");

        let attempted = queue.len();
        let mut pending = queue.into_iter().map(|file| self.push_file(file));
        let mut processing = FuturesUnordered::new();
        processing.extend(pending.by_ref().take(self.concurrency));
        let mut failures = Vec::new();
        while let Some(result) = processing.next().await {
            match result {
                Ok(bytes) => stats.pushed_bytes += bytes,
                Err(e) => {
                    tracing::warn!(error = ?e, "Push failed");
                    failures.push(e);
                },
            }
            if let Some(next) = pending.next() {
                processing.push(next);
            }
        }

        if !failures.is_empty() {
            return Err(Exn::raise_all::<ErrorKind, _>(
                ErrorKind::Incomplete {
                    failed: failures.len(),
                    attempted,
                },
                failures,
            ));
        }
        tracing::info!(pushed = attempted, bytes = stats.pushed_bytes, "Upload complete");
        Ok(stats)
    }

    async fn push_file(&self, file: FileToUpload) -> Result<u64> {
        let data = tokio::fs::read(&file.path).await.or_raise(|| ErrorKind::Source(file.path.clone()))?;
        // Infallible: a usize (either 32- or 64-bit) will always fit in a u64.
        let size = u64::try_from(data.len()).unwrap_or(0);
        if size != file.item.size {
            let path = file.path.display();
            tracing::warn!(%path, expected = file.item.size, actual = size, "File changed since it was hashed");
        }
        self.store.push(&file.item, data).await?;
        tracing::debug!(digest = %file.item.digest, path = %file.path.display(), "Pushed");
        Ok(size)
    }
}

/// Keeps the first file of each digest, promoting it to high priority when
/// any file sharing its digest is.
fn collapse(files: Vec<FileToUpload>) -> Vec<FileToUpload> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut distinct: Vec<FileToUpload> = Vec::new();
    for file in files {
        match index.get(&file.item.digest) {
            Some(&i) => distinct[i].item.high_priority |= file.item.high_priority,
            None => {
                index.insert(file.item.digest.clone(), distinct.len());
                distinct.push(file);
            },
        }
    }
    distinct
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LocalStore, MockCall, MockStore, Store};
    use crate::digest;
    use std::path::Path;
    use std::sync::Arc;

    fn write_file(dir: &Path, name: &str, data: &[u8], high_priority: bool) -> FileToUpload {
        let path = dir.join(name);
        std::fs::write(&path, data).unwrap();
        FileToUpload::new(UploadItem::new(digest::of(data), data.len() as u64, high_priority), path)
    }

    #[test]
    fn test_collapse_by_digest() {
        let a = FileToUpload::new(UploadItem::new("aaa", 1, false), "/a");
        let b = FileToUpload::new(UploadItem::new("bbb", 1, false), "/b");
        let a2 = FileToUpload::new(UploadItem::new("aaa", 1, true), "/a2");
        let distinct = collapse(vec![a, b, a2]);
        assert_eq!(distinct.len(), 2);
        assert_eq!(distinct[0].path, Path::new("/a"));
        assert!(distinct[0].item.high_priority);
        assert!(!distinct[1].item.high_priority);
    }

    #[tokio::test]
    async fn test_same_digest_pushed_once() {
        let temp = tempfile::tempdir().unwrap();
        let one = write_file(temp.path(), "one", b"same", false);
        let two = write_file(temp.path(), "two", b"same", false);
        let store = Arc::new(MockStore::default());
        let stats = Storage::new(store.clone(), 4).upload(vec![one, two]).await.unwrap();
        assert_eq!(stats.items, 2);
        assert_eq!(stats.distinct, 1);
        assert_eq!(stats.missing, 1);
        assert_eq!(stats.pushed_bytes, 4);
        assert_eq!(store.pushed().await.len(), 1);
    }

    #[tokio::test]
    async fn test_present_items_not_pushed() {
        let temp = tempfile::tempdir().unwrap();
        let present = write_file(temp.path(), "present", b"present", false);
        let absent = write_file(temp.path(), "absent", b"absent", false);
        let store = Arc::new(MockStore::with_objects([(present.item.digest.clone(), b"present".to_vec())]));
        let stats = Storage::new(store.clone(), 4).upload(vec![present, absent.clone()]).await.unwrap();
        assert_eq!(stats.missing, 1);
        assert_eq!(store.pushed().await, vec![absent.item.digest]);
    }

    #[tokio::test]
    async fn test_high_priority_first() {
        let temp = tempfile::tempdir().unwrap();
        let low = write_file(temp.path(), "low", b"low", false);
        let high = write_file(temp.path(), "high", b"high", true);
        let store = Arc::new(MockStore::default());
        // One push at a time, so the order is observable.
        Storage::new(store.clone(), 1).upload(vec![low.clone(), high.clone()]).await.unwrap();
        assert_eq!(store.pushed().await, vec![high.item.digest, low.item.digest]);
    }

    #[tokio::test]
    async fn test_failure_still_pushes_others() {
        let temp = tempfile::tempdir().unwrap();
        let files: Vec<_> =
            (0..5).map(|i| write_file(temp.path(), &format!("f{i}"), format!("data {i}").as_bytes(), false)).collect();
        let store = Arc::new(MockStore::default().failing_push(files[2].item.digest.clone()));
        let err = Storage::new(store.clone(), 2).upload(files.clone()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Incomplete { failed: 1, attempted: 5 }));
        assert_eq!(err.frame().children().len(), 1);
        assert_eq!(store.pushed().await.len(), 5);
        for (i, file) in files.iter().enumerate() {
            assert_eq!(store.object(&file.item.digest).await.is_some(), i != 2);
        }
    }

    #[tokio::test]
    async fn test_unreadable_source() {
        let temp = tempfile::tempdir().unwrap();
        let gone = FileToUpload::new(UploadItem::new(digest::of(b"gone"), 4, false), temp.path().join("gone"));
        let store = Arc::new(MockStore::default());
        let err = Storage::new(store.clone(), 2).upload(vec![gone]).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Incomplete { failed: 1, .. }));
        assert!(store.pushed().await.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_store() {
        let temp = tempfile::tempdir().unwrap();
        let file = write_file(temp.path(), "a", b"a", false);
        let store = Arc::new(MockStore::default().unreachable());
        assert!(Storage::new(store.clone(), 2).upload(vec![file]).await.is_err());
        assert!(store.pushed().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_upload_contacts_nothing() {
        let store = Arc::new(MockStore::default());
        let stats = Storage::new(store.clone(), 2).upload(Vec::new()).await.unwrap();
        assert_eq!(stats, UploadStats::default());
        assert_eq!(store.calls().await, Vec::<MockCall>::new());
    }

    #[tokio::test]
    async fn test_upload_to_local_store() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("src");
        std::fs::create_dir(&source).unwrap();
        let files = vec![write_file(&source, "a", b"alpha", true), write_file(&source, "b", b"beta", false)];
        let store = Arc::new(LocalStore::new("local", temp.path().join("cas"), "default-gzip").unwrap());
        let storage = Storage::new(store.clone(), 2);
        let first = storage.upload(files.clone()).await.unwrap();
        assert_eq!(first.missing, 2);
        // Everything is present the second time around.
        let second = storage.upload(files.clone()).await.unwrap();
        assert_eq!(second.missing, 0);
        assert_eq!(second.pushed_bytes, 0);
        assert_eq!(store.fetch(&files[0].item.digest).await.unwrap(), b"alpha");
    }
}
