//! The saved state: everything a previous run learned about a tree.

use crate::error::Result;
use crate::isolated::Isolated;
use crate::metadata::{ALGO, FileMetadata};
use crate::path::{safe_relpath, to_key};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Version of the saved state format. Any breaking change must update it.
pub const STATE_VERSION: &str = "1.0";

/// Operating system the state is recorded on.
pub const HOST_OS: &str = std::env::consts::OS;

/// Variable name to value.
pub type Variables = BTreeMap<String, String>;

/// Persisted per-tree record, stored next to the `.isolated` output as
/// `<name>.isolated.state`.
///
/// Field names are part of the on-disk format. Relative paths
/// (`isolate_file`, `child_isolated_files`) are relative to the directory of
/// the `.isolated` file, which isn't persisted: it is implied by where the
/// state file is loaded from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedState {
    /// Host OS, so a state file is never reinterpreted under a different
    /// platform's path conventions.
    #[serde(rename = "OS")]
    pub os: String,
    /// Hash algorithm used for every digest in `files`.
    pub algo: String,
    /// Extra `.isolated` files included by this one.
    #[serde(default)]
    pub child_isolated_files: Vec<String>,
    /// Processed command, with variables evaluated.
    #[serde(default)]
    pub command: Vec<String>,
    /// Variables used to evaluate manifest conditions (e.g. `OS`).
    #[serde(default)]
    pub config_variables: Variables,
    /// Variables substituted in the command and paths, but never re-based.
    #[serde(default)]
    pub extra_variables: Variables,
    /// Every input of the tree, relative to `root_dir`, with the metadata of
    /// the last run so unchanged files can skip hashing.
    #[serde(default)]
    pub files: BTreeMap<String, FileMetadata>,
    /// Manifest source (`.isolate`) the state was expanded from.
    #[serde(default)]
    pub isolate_file: Option<String>,
    /// Variables holding paths, relative to the manifest source's directory.
    #[serde(default)]
    pub path_variables: Variables,
    /// Read-only policy for the mapped tree (0: writable, 1: files read-only,
    /// 2: files and directories read-only).
    #[serde(default)]
    pub read_only: Option<u8>,
    /// Working directory of the command, relative to `root_dir`.
    #[serde(default)]
    pub relative_cwd: Option<String>,
    /// Absolute directory every input is relative to.
    #[serde(default)]
    pub root_dir: Option<PathBuf>,
    pub version: String,

    #[serde(skip)]
    isolated_basedir: PathBuf,
}

impl SavedState {
    /// A fresh state anchored at `isolated_basedir`: the directory holding the
    /// `.isolated` output or, for ephemeral requests, the working directory.
    pub fn new(isolated_basedir: impl Into<PathBuf>) -> Self {
        Self {
            os: HOST_OS.to_string(),
            algo: ALGO.to_string(),
            child_isolated_files: Vec::new(),
            command: Vec::new(),
            config_variables: Variables::new(),
            extra_variables: Variables::new(),
            files: BTreeMap::new(),
            isolate_file: None,
            path_variables: Variables::new(),
            read_only: Some(1),
            relative_cwd: None,
            root_dir: None,
            version: STATE_VERSION.to_string(),
            isolated_basedir: isolated_basedir.into(),
        }
    }

    pub(crate) fn with_basedir(mut self, isolated_basedir: impl Into<PathBuf>) -> Self {
        self.isolated_basedir = isolated_basedir.into();
        self
    }

    pub fn isolated_basedir(&self) -> &Path {
        &self.isolated_basedir
    }

    /// Absolute path of the recorded manifest source, if there is one.
    pub fn isolate_filepath(&self) -> Option<PathBuf> {
        self.isolate_file.as_ref().map(|f| crate::path::normalize(self.isolated_basedir.join(f)))
    }

    /// Records the manifest source and merges the variables it was expanded
    /// with. Existing variables not mentioned are kept.
    pub fn update(
        &mut self,
        isolate_file: &Path,
        path_variables: &Variables,
        config_variables: &Variables,
        extra_variables: &Variables,
    ) -> Result<()> {
        self.isolate_file = Some(to_key(safe_relpath(isolate_file, &self.isolated_basedir)?)?);
        self.path_variables.extend(path_variables.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.config_variables.extend(config_variables.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.extra_variables.extend(extra_variables.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    /// Replaces the command and the file list with a new expansion.
    ///
    /// Files still listed keep their previous metadata (it's what makes the
    /// next [`Isolated`] cheap); files no longer listed are forgotten.
    pub fn update_isolated(
        &mut self,
        command: Vec<String>,
        files: impl IntoIterator<Item = String>,
        read_only: Option<u8>,
        relative_cwd: String,
    ) {
        let mut previous = std::mem::take(&mut self.files);
        self.files = files
            .into_iter()
            .map(|f| {
                let meta = previous.remove(&f).unwrap_or_default();
                (f, meta)
            })
            .collect();
        self.command = command;
        self.read_only = read_only;
        self.relative_cwd = Some(relative_cwd);
    }

    /// The `.isolated` document describing this state.
    pub fn to_isolated(&self) -> Isolated {
        Isolated {
            algo: self.algo.clone(),
            command: self.command.clone(),
            files: self.files.iter().map(|(k, v)| (k.clone(), v.for_isolated())).collect(),
            read_only: self.read_only,
            relative_cwd: self.relative_cwd.clone(),
            version: crate::isolated::ISOLATED_VERSION.to_string(),
        }
    }
}
