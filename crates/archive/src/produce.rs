//! Per-tree producers: one lazy stream of file assets per resolved tree.

use futures::channel::mpsc;
use futures::{SinkExt, Stream, StreamExt};
use isolate_asyncutils::StreamDoneExt;
use isolate_state::path::to_host_separators;
use isolate_state::{FileMetadata, HIGH_PRIORITY};
use isolate_storage::{COMPRESSION_LEVEL, FileToUpload, UploadItem};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A file of a tree, with the metadata it was resolved with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAsset {
    pub metadata: FileMetadata,
    pub full_path: PathBuf,
}

impl FileAsset {
    pub fn is_symlink(&self) -> bool {
        self.metadata.is_symlink()
    }

    /// The upload item for this file. Symlinks have no content and shouldn't
    /// be converted.
    pub fn to_upload(&self) -> FileToUpload {
        let item = UploadItem {
            digest: self.metadata.digest().unwrap_or_default().to_string(),
            size: self.metadata.size(),
            high_priority: self.metadata.is_high_priority(),
            compression_level: COMPRESSION_LEVEL,
        };
        FileToUpload::new(item, self.full_path.clone())
    }
}

/// A tree that was resolved and saved, ready to be uploaded.
#[derive(Debug, Clone)]
pub struct PreparedTree {
    /// Target name, for logging.
    pub name: String,
    /// Digest of the written `.isolated` document.
    pub digest: String,
    pub isolated_path: PathBuf,
    pub isolated_size: u64,
    pub root_dir: PathBuf,
    /// Root-relative file name to metadata.
    pub files: BTreeMap<String, FileMetadata>,
}

/// Streams the assets of a tree: its `.isolated` document first (high
/// priority), then every file in name order.
///
/// Files without a digest can't be uploaded and are left out; symlinks are
/// kept, it's up to the consumer to skip them.
pub fn produce(tree: PreparedTree) -> impl Stream<Item = FileAsset> {
    let document = FileAsset {
        metadata: FileMetadata::file(tree.digest, tree.isolated_size).with_priority(HIGH_PRIORITY),
        full_path: tree.isolated_path,
    };
    let root_dir = tree.root_dir;
    let name = tree.name;
    let files = tree.files.into_iter().filter_map(move |(file, metadata)| {
        if metadata.digest().is_none() && !metadata.is_symlink() {
            tracing::warn!(tree = %name, file = %file, "File has no digest; not uploading it");
            return None;
        }
        Some(FileAsset {
            full_path: root_dir.join(to_host_separators(&file)),
            metadata,
        })
    });
    futures::stream::iter(std::iter::once(document).chain(files))
}

/// Runs [`produce`] on its own task, forwarding every asset through a
/// channel of `buffer` slots. The task (and so the stream) ends as soon as
/// the tree is exhausted or the receiver is dropped.
pub fn spawn_producer(tree: PreparedTree, buffer: usize) -> mpsc::Receiver<FileAsset> {
    let (mut tx, rx) = mpsc::channel(buffer);
    let name = tree.name.clone();
    let assets = produce(tree).on_done(move |count| tracing::debug!(tree = %name, count, "Producer finished"));
    tokio::spawn(async move {
        let mut assets = std::pin::pin!(assets);
        while let Some(asset) = assets.next().await {
            if tx.send(asset).await.is_err() {
                break;
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> PreparedTree {
        PreparedTree {
            name: "foo".to_string(),
            digest: "f00".to_string(),
            isolated_path: PathBuf::from("/out/foo.isolated"),
            isolated_size: 42,
            root_dir: PathBuf::from("/src"),
            files: [
                ("a.txt".to_string(), FileMetadata::file("aaa", 1)),
                ("dir/b.txt".to_string(), FileMetadata::file("bbb", 2)),
                ("link".to_string(), FileMetadata::symlink("a.txt")),
                ("unhashed".to_string(), FileMetadata::default()),
            ]
            .into_iter()
            .collect(),
        }
    }

    #[tokio::test]
    async fn test_document_first_then_files() {
        let assets: Vec<FileAsset> = produce(tree()).collect().await;
        let paths: Vec<_> = assets.iter().map(|a| a.full_path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/out/foo.isolated"),
                PathBuf::from("/src/a.txt"),
                PathBuf::from("/src/dir/b.txt"),
                PathBuf::from("/src/link"),
            ]
        );
        let document = assets[0].to_upload();
        assert!(document.item.high_priority);
        assert_eq!(document.item.digest, "f00");
        assert_eq!(document.item.size, 42);
        assert!(!assets[1].to_upload().item.high_priority);
        assert!(assets[3].is_symlink());
    }

    #[test]
    fn test_to_upload() {
        let asset = FileAsset {
            metadata: FileMetadata::file("abc", 7).with_priority("1"),
            full_path: PathBuf::from("/src/a"),
        };
        let upload = asset.to_upload();
        assert_eq!(upload.item, UploadItem::new("abc", 7, false));
        assert_eq!(upload.item.compression_level, COMPRESSION_LEVEL);
        assert_eq!(upload.path, PathBuf::from("/src/a"));
    }

    #[tokio::test]
    async fn test_spawned_producer_closes_channel() {
        let received: Vec<FileAsset> = spawn_producer(tree(), 1).collect().await;
        assert_eq!(received.len(), 4);
    }
}
