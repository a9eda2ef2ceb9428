//! Per-file metadata, reusing a previous run's digests where possible.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use futures::{StreamExt, TryStreamExt};
use isolate_state::path::to_host_separators;
use isolate_state::{FileMetadata, SavedState};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::instrument;

/// Computes the metadata of every file in the state, in place.
///
/// Files outside `subdir` (a root-relative directory) are dropped from the
/// state first. A file whose size and modification time match its previous
/// entry keeps the previous digest without being read; everything else is
/// hashed off the async executor, `concurrency` files at a time.
#[instrument(skip_all, fields(files = state.files.len(), subdir))]
pub(crate) async fn files_to_metadata(state: &mut SavedState, subdir: Option<&str>, concurrency: usize) -> Result<()> {
    let Some(root) = state.root_dir.clone() else {
        exn::bail!(ErrorKind::Configuration("state has no root directory to hash files from".to_string()));
    };
    if let Some(subdir) = subdir {
        state.files.retain(|name, _| Path::new(name).starts_with(subdir));
    }
    let read_only = state.read_only.is_some_and(|level| level > 0);
    let jobs = std::mem::take(&mut state.files).into_iter().map(|(name, previous)| {
        let path = root.join(to_host_separators(&name));
        async move {
            let metadata = file_metadata(path, previous, read_only).await?;
            Ok::<_, crate::error::Error>((name, metadata))
        }
    });
    let files: BTreeMap<String, FileMetadata> =
        futures::stream::iter(jobs).buffer_unordered(concurrency.max(1)).try_collect().await?;
    tracing::debug!(files = files.len(), "Computed file metadata");
    state.files = files;
    Ok(())
}

async fn file_metadata(path: PathBuf, previous: FileMetadata, read_only: bool) -> Result<FileMetadata> {
    let failed = ErrorKind::Metadata(path.clone());
    tokio::task::spawn_blocking(move || file_metadata_blocking(&path, &previous, read_only))
        .await
        .or_raise(|| failed)?
}

fn file_metadata_blocking(path: &Path, previous: &FileMetadata, read_only: bool) -> Result<FileMetadata> {
    let failed = || ErrorKind::Metadata(path.to_path_buf());
    let stat = std::fs::symlink_metadata(path).or_raise(failed)?;
    let modified = OffsetDateTime::from(stat.modified().or_raise(failed)?).unix_timestamp();
    if stat.file_type().is_symlink() {
        let target = std::fs::read_link(path).or_raise(failed)?;
        return Ok(FileMetadata::symlink(target.to_string_lossy()).with_modified(modified));
    }

    let size = stat.len();
    let metadata = match (previous.is_fresh(size, modified), previous.digest()) {
        (true, Some(digest)) => FileMetadata::file(digest, size),
        _ => {
            let mut hasher = blake3::Hasher::new();
            let file = std::fs::File::open(path).or_raise(failed)?;
            hasher.update_reader(file).or_raise(failed)?;
            tracing::trace!(path = %path.display(), "Hashed");
            FileMetadata::file(hasher.finalize().to_hex().to_string(), size)
        },
    }
    .with_modified(modified);
    Ok(match unix_mode(&stat, read_only) {
        Some(mode) => metadata.with_mode(mode),
        None => metadata,
    })
}

/// Permission bits as mapped into the tree: write bits dropped when the tree
/// is read-only, and group/other execute mirroring the owner's.
#[cfg(unix)]
fn unix_mode(stat: &std::fs::Metadata, read_only: bool) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    let mut mode = stat.permissions().mode() & 0o7777;
    if read_only {
        mode &= !0o222;
    }
    match mode & 0o100 != 0 {
        true => mode |= 0o011,
        false => mode &= !0o011,
    }
    Some(mode)
}

#[cfg(not(unix))]
fn unix_mode(_stat: &std::fs::Metadata, _read_only: bool) -> Option<u32> {
    None
}
