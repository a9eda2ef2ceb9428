//! Batch orchestration: resolve every tree, then upload the good ones in
//! one go.

use crate::Context;
use crate::error::{ErrorKind, Result};
use crate::options::ArchiveOptions;
use crate::produce::{PreparedTree, spawn_producer};
use crate::resolve::load_complete_state;
use crate::select::select;
use exn::ResultExt;
use isolate_asyncutils::fan_in;
use isolate_storage::{Storage, UploadStats};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::instrument;

/// One tree to archive: its options and the directory they are relative to.
#[derive(Debug, Clone)]
pub struct Tree {
    pub cwd: PathBuf,
    pub options: ArchiveOptions,
}

/// Outcome of a batch.
#[derive(Debug)]
pub struct Archived {
    /// Target name to `.isolated` digest; an empty digest marks a tree that
    /// failed to resolve.
    pub digests: BTreeMap<String, String>,
    /// Trees that resolved.
    pub good: usize,
    /// `Ok(None)` when there was nothing to upload.
    pub uploaded: Result<Option<UploadStats>>,
}

/// Resolves a tree and writes its `.isolated` document and state.
#[instrument(skip_all, fields(tree = %tree.options.target_name()))]
pub async fn prepare_for_archival(ctx: &Context, tree: &Tree) -> Result<PreparedTree> {
    let Some(isolated) = tree.options.isolated.clone() else {
        exn::bail!(ErrorKind::Configuration("--isolated is required to archive".to_string()));
    };
    let complete = load_complete_state(ctx, &tree.options, &tree.cwd, tree.options.subdir.as_deref(), false).await?;
    let (digest, isolated_size) = complete.save_files().await?;
    let saved = complete.saved_state;
    Ok(PreparedTree {
        name: tree.options.target_name(),
        digest,
        isolated_path: isolated,
        isolated_size,
        root_dir: saved.root_dir.unwrap_or_else(|| tree.cwd.clone()),
        files: saved.files,
    })
}

/// Archives every tree and uploads the result through `storage`.
///
/// Trees are resolved concurrently; one failing is logged and recorded with
/// an empty digest without affecting the others. When none resolved, the
/// store isn't contacted at all. Otherwise every good tree gets a producer,
/// their streams are merged and deduplicated, and the selection is uploaded.
/// An upload failure is reported in [`Archived::uploaded`] alongside the
/// digests, which stay valid.
#[instrument(skip_all, fields(trees = trees.len(), store = storage.store().name()))]
pub async fn archive(ctx: &Context, trees: &[Tree], storage: &Storage) -> Archived {
    let results = futures::future::join_all(trees.iter().map(|tree| prepare_for_archival(ctx, tree))).await;

    let mut digests = BTreeMap::new();
    let mut prepared = Vec::new();
    for (tree, result) in trees.iter().zip(results) {
        let name = tree.options.target_name();
        let digest = match result {
            Ok(ready) => {
                tracing::info!(tree = %name, digest = %ready.digest, "Prepared");
                let digest = ready.digest.clone();
                prepared.push(ready);
                digest
            },
            Err(e) => {
                tracing::warn!(tree = %name, error = ?e, "Failed isolating tree; continuing");
                String::new()
            },
        };
        if let Some(previous) = digests.insert(name.clone(), digest) {
            tracing::warn!(tree = %name, %previous, "Two trees share a target name; keeping the last digest");
        }
    }

    let good = prepared.len();
    if good == 0 {
        tracing::warn!("No tree resolved; nothing to upload");
        return Archived {
            digests,
            good,
            uploaded: Ok(None),
        };
    }

    let store = storage.store();
    tracing::info!(good, store = store.name(), namespace = store.namespace(), "Uploading isolated trees");
    let producers = prepared.into_iter().map(|tree| spawn_producer(tree, ctx.fan_in_buffer));
    let selection = select(fan_in(producers)).await;
    let uploaded = storage.upload(selection.items).await.map(Some).or_raise(|| ErrorKind::Upload);
    if let Err(e) = &uploaded {
        tracing::error!(error = ?e, "Failed while uploading files");
    }
    Archived { digests, good, uploaded }
}
