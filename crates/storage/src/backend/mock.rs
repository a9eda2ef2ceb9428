//! In-memory store for testing.

use crate::backend::Store;
use crate::digest::validate as validate_digest;
use crate::error::{ErrorKind, Result};
use crate::item::UploadItem;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::{Mutex, RwLock};

/// A call made to a [`MockStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// `contains()` with the digests asked about.
    Contains(Vec<String>),
    /// `push()` of one digest.
    Push(String),
}

/// In-memory store for testing.
///
/// Objects are stored in a `HashMap` behind a [`RwLock`], and every
/// `contains`/`push` call is recorded so tests can assert on exactly what
/// reached the store (or that nothing did). Content isn't checked against
/// the digest, so tests can use short fake digests.
///
/// # Examples
///
/// ```ignore
/// use isolate_storage::{MockStore, Store, UploadItem};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = MockStore::with_objects([("aaa", b"present")]);
/// let items = [UploadItem::new("aaa", 7, false), UploadItem::new("bbb", 1, false)];
/// let missing = store.contains(&items).await?;
/// assert_eq!(missing.len(), 1);
/// assert_eq!(missing[0].digest, "bbb");
/// # Ok(())
/// # }
/// ```
pub struct MockStore {
    name: String,
    namespace: String,
    objects: RwLock<HashMap<String, Vec<u8>>>,
    calls: Mutex<Vec<MockCall>>,
    failing: HashSet<String>,
    unreachable: bool,
}

impl MockStore {
    /// Create a mock store pre-populated with objects.
    ///
    /// Panics if any digest fails validation. If test setup is wrong, then
    /// test should not pass.
    pub fn with_objects(objects: impl IntoIterator<Item = (impl Into<String>, impl Into<Vec<u8>>)>) -> Self {
        let mut map = HashMap::new();
        for (digest, data) in objects {
            let digest = digest.into();
            if validate_digest(&digest).is_err() {
                // Deliberate: MockStore only exists for tests.
                panic!("MockStore::with_objects: invalid digest {digest:?}");
            }
            map.insert(digest, data.into());
        }
        Self {
            name: "mock".to_string(),
            namespace: "default".to_string(),
            objects: RwLock::new(map),
            calls: Mutex::new(Vec::new()),
            failing: HashSet::new(),
            unreachable: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Make every push of `digest` fail.
    pub fn failing_push(mut self, digest: impl Into<String>) -> Self {
        self.failing.insert(digest.into());
        self
    }

    /// Make `contains()` fail, as if the server couldn't be reached.
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Every call received so far, in order.
    pub async fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().await.clone()
    }

    /// Digests of every push received so far (successful or not), in order.
    pub async fn pushed(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|call| match call {
                MockCall::Push(digest) => Some(digest.clone()),
                MockCall::Contains(_) => None,
            })
            .collect()
    }

    /// Content of a stored object.
    pub async fn object(&self, digest: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(digest).cloned()
    }
}
impl Default for MockStore {
    fn default() -> Self {
        let objects: [(&str, &[u8]); 0] = [];
        Self::with_objects(objects)
    }
}

#[async_trait]
impl Store for MockStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn contains(&self, items: &[UploadItem]) -> Result<Vec<UploadItem>> {
        let digests = items.iter().map(|item| item.digest.clone()).collect();
        self.calls.lock().await.push(MockCall::Contains(digests));
        if self.unreachable {
            exn::bail!(ErrorKind::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused)));
        }
        let objects = self.objects.read().await;
        Ok(items.iter().filter(|item| !objects.contains_key(&item.digest)).cloned().collect())
    }

    async fn push(&self, item: &UploadItem, data: Vec<u8>) -> Result<()> {
        self.calls.lock().await.push(MockCall::Push(item.digest.clone()));
        let digest = validate_digest(&item.digest)?;
        if self.failing.contains(digest) {
            exn::bail!(ErrorKind::Rejected(digest.to_string()));
        }
        self.objects.write().await.insert(digest.to_string(), data);
        Ok(())
    }

    async fn fetch(&self, digest: &str) -> Result<Vec<u8>> {
        let digest = validate_digest(digest)?;
        self.object(digest).await.ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(digest.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_push_and_fetch() {
        let store = MockStore::default();
        store.push(&UploadItem::new("abc", 5, false), b"hello".to_vec()).await.unwrap();
        assert_eq!(store.fetch("abc").await.unwrap(), b"hello");
        assert_eq!(store.pushed().await, vec!["abc".to_string()]);
    }

    #[tokio::test]
    async fn test_contains_records_call() {
        let store = MockStore::with_objects([("aaa", b"a")]);
        let items = [UploadItem::new("aaa", 1, false), UploadItem::new("bbb", 1, false)];
        let missing = store.contains(&items).await.unwrap();
        assert_eq!(missing, vec![items[1].clone()]);
        assert_eq!(store.calls().await, vec![MockCall::Contains(vec!["aaa".into(), "bbb".into()])]);
    }

    #[tokio::test]
    async fn test_failing_push() {
        let store = MockStore::default().failing_push("bad");
        let err = store.push(&UploadItem::new("bad", 1, false), b"x".to_vec()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Rejected(_)));
        assert!(store.object("bad").await.is_none());
        assert_eq!(store.pushed().await, vec!["bad".to_string()]);
    }

    #[tokio::test]
    async fn test_unreachable() {
        let store = MockStore::default().unreachable();
        assert!(store.contains(&[UploadItem::new("abc", 1, false)]).await.is_err());
    }

    #[tokio::test]
    async fn test_fetch_not_found() {
        let store = MockStore::default();
        let err = store.fetch("abc").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[test]
    #[should_panic(expected = "invalid digest")]
    fn test_with_objects_panics_on_bad_digest() {
        MockStore::with_objects([("../escape", b"bad")]);
    }
}
