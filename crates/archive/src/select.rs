//! The upload selector: from the merged asset stream to the items worth
//! uploading.

use crate::produce::FileAsset;
use futures::{Stream, StreamExt};
use isolate_storage::FileToUpload;
use std::collections::HashSet;
use std::path::PathBuf;

/// Items selected for upload.
#[derive(Debug, Default)]
pub struct Selection {
    pub items: Vec<FileToUpload>,
    /// Symlinks and repeated paths.
    pub skipped: usize,
}

/// Drains `assets`, keeping the first asset seen at each path.
///
/// Symlinks are skipped: they are recorded in the `.isolated` document and
/// have no content of their own. Deduplication is by path only; two paths
/// with the same content are both selected (the uploader still pushes their
/// digest once).
pub async fn select<S>(assets: S) -> Selection
where
    S: Stream<Item = FileAsset>,
{
    let mut assets = std::pin::pin!(assets);
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut selection = Selection::default();
    while let Some(asset) = assets.next().await {
        if asset.is_symlink() || seen.contains(&asset.full_path) {
            selection.skipped += 1;
            continue;
        }
        selection.items.push(asset.to_upload());
        seen.insert(asset.full_path);
    }
    tracing::info!(selected = selection.items.len(), skipped = selection.skipped, "Skipped duplicated entries");
    selection
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use isolate_state::FileMetadata;
    use rstest::rstest;

    fn asset(path: &str, digest: &str) -> FileAsset {
        FileAsset {
            metadata: FileMetadata::file(digest, 1),
            full_path: PathBuf::from(path),
        }
    }

    fn link(path: &str) -> FileAsset {
        FileAsset {
            metadata: FileMetadata::symlink("target"),
            full_path: PathBuf::from(path),
        }
    }

    #[rstest]
    #[case(vec![], 0, 0)]
    #[case(vec![asset("/a", "1"), asset("/b", "2")], 2, 0)]
    #[case(vec![asset("/a", "1"), asset("/a", "1"), asset("/b", "2"), asset("/a", "1")], 2, 2)]
    #[case(vec![link("/l"), asset("/a", "1"), link("/l")], 1, 2)]
    #[tokio::test]
    async fn test_select_counts(#[case] assets: Vec<FileAsset>, #[case] selected: usize, #[case] skipped: usize) {
        let selection = select(stream::iter(assets)).await;
        assert_eq!(selection.items.len(), selected);
        assert_eq!(selection.skipped, skipped);
    }

    #[tokio::test]
    async fn test_same_content_at_two_paths_is_kept_twice() {
        let selection = select(stream::iter(vec![asset("/x/one", "same"), asset("/y/two", "same")])).await;
        let paths: Vec<_> = selection.items.iter().map(|f| f.path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("/x/one"), PathBuf::from("/y/two")]);
        assert!(selection.items.iter().all(|f| f.item.digest == "same"));
    }

    #[tokio::test]
    async fn test_first_occurrence_wins() {
        let selection = select(stream::iter(vec![asset("/a", "first"), asset("/a", "second")])).await;
        assert_eq!(selection.items[0].item.digest, "first");
    }
}
