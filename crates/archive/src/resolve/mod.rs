//! The tree resolver: from archive options and the previous run's state to
//! the current list of files, with metadata.

mod expand;
mod hash;

use crate::Context;
use crate::error::{ErrorKind, Result};
use crate::options::ArchiveOptions;
use crate::parser::eval_variables;
use crate::resolve::expand::{Blacklist, determine_root_dir, expand_directories};
use exn::ResultExt;
use isolate_state::path::{normalize, safe_relpath, to_host_separators, to_key};
use isolate_state::store::{self, state_path, write_atomic};
use isolate_state::{SavedState, Variables, digest_bytes};
use std::path::{Path, PathBuf};
use tracing::instrument;

/// A tree's saved state together with the `.isolated` output it belongs to.
#[derive(Debug, Clone)]
pub struct CompleteState {
    /// `None` for ephemeral requests, which can't be saved.
    pub isolated_filepath: Option<PathBuf>,
    pub saved_state: SavedState,
}

impl CompleteState {
    /// Loads the previous state of the `.isolated` output at `isolated`
    /// (absolute). A missing state is a first run.
    pub async fn load_files(isolated: &Path) -> Result<Self> {
        let path = isolated.to_path_buf();
        let loaded = tokio::task::spawn_blocking(move || store::load(path))
            .await
            .or_raise(|| ErrorKind::Metadata(state_path(isolated)))?;
        let saved_state = match loaded {
            Ok(state) => state,
            Err(e) if e.is_corruption() => {
                let path = state_path(isolated);
                return Err(e.raise(ErrorKind::CorruptState(path)));
            },
            Err(e) => {
                let message = e.to_string();
                return Err(e.raise(ErrorKind::Configuration(message)));
            },
        };
        Ok(Self {
            isolated_filepath: Some(isolated.to_path_buf()),
            saved_state,
        })
    }

    /// A state that isn't backed by any file, anchored at `cwd`.
    pub fn ephemeral(cwd: &Path) -> Self {
        Self {
            isolated_filepath: None,
            saved_state: SavedState::new(cwd),
        }
    }

    /// Writes the `.isolated` document and then the saved state.
    ///
    /// Returns the digest and size of the written document.
    #[instrument(level = "debug", skip_all, fields(isolated = ?self.isolated_filepath))]
    pub async fn save_files(&self) -> Result<(String, u64)> {
        let Some(isolated) = self.isolated_filepath.clone() else {
            exn::bail!(ErrorKind::Configuration("an ephemeral state can't be saved".to_string()));
        };
        let failed = ErrorKind::Persist(isolated.clone());
        let state = self.saved_state.clone();
        tokio::task::spawn_blocking(move || save_blocking(&isolated, &state))
            .await
            .or_raise(|| failed)?
    }

    /// Expands the manifest at `isolate` into the state's command and file
    /// list. Relative path variables are taken from `cwd`.
    async fn load_isolate(&mut self, ctx: &Context, cwd: &Path, isolate: &Path, options: &ArchiveOptions) -> Result<()> {
        let state = &mut self.saved_state;
        let isolate = normalize(isolate);
        let isolate_dir = isolate.parent().map(Path::to_path_buf).unwrap_or_else(|| isolate.clone());

        let mut rebased = Variables::new();
        for (name, value) in &options.path_variables {
            let relative = relative_key(&normalize(cwd.join(value)), &isolate_dir)
                .or_raise(|| ErrorKind::Configuration(format!("path variable {name}={value:?} is unusable")))?;
            rebased.insert(name.clone(), relative);
        }
        state
            .update(&isolate, &rebased, &options.config_variables, &options.extra_variables)
            .or_raise(|| ErrorKind::Configuration(format!("{} can't be recorded in the state", isolate.display())))?;

        let expansion = ctx
            .parser
            .load_isolate(&isolate, &state.path_variables, &state.config_variables, &state.extra_variables)
            .await?;

        let mut variables = state.path_variables.clone();
        variables.extend(state.extra_variables.clone());
        let files = expansion.files.iter().map(|f| eval_variables(f, &variables)).collect::<Result<Vec<_>>>()?;
        variables.extend(state.config_variables.clone());
        let command = expansion.command.iter().map(|c| eval_variables(c, &variables)).collect::<Result<Vec<_>>>()?;

        let cmd_dir = normalize(isolate_dir.join(&expansion.relative_cwd));
        // Path variables are relative to the manifest, entries to `cmd_dir`.
        let mut anchors = files.clone();
        for value in state.path_variables.values() {
            anchors.push(relative_key(&normalize(isolate_dir.join(value)), &cmd_dir)?);
        }
        let root_dir = determine_root_dir(&cmd_dir, anchors.iter().map(String::as_str));
        let relative_cwd = relative_key(&cmd_dir, &root_dir)?;
        let mut entries = Vec::with_capacity(files.len());
        for file in &files {
            let relative = relative_key(&normalize(cmd_dir.join(file)), &root_dir)?;
            entries.push(match file.ends_with('/') {
                true => format!("{relative}/"),
                false => relative,
            });
        }

        let blacklist = Blacklist::new(&options.blacklist)?;
        let infiles = expand_directories(&root_dir, entries, &blacklist, options.ignore_broken_items).await?;
        tracing::debug!(
            root_dir = %root_dir.display(),
            relative_cwd = %relative_cwd,
            files = infiles.len(),
            "Expanded manifest"
        );
        state.root_dir = Some(root_dir);
        state.update_isolated(command, infiles, expansion.read_only, relative_cwd);
        Ok(())
    }

    /// Evaluates a subdirectory expression into a root-relative prefix.
    /// Path variables are relative to the manifest's directory, so they are
    /// first re-keyed from the root. `None` when it names the root itself.
    fn translate_subdir(&self, expression: &str) -> Result<Option<String>> {
        let relative_cwd = self.saved_state.relative_cwd.as_deref().unwrap_or(".");
        let mut translated = Variables::new();
        for (name, value) in &self.saved_state.path_variables {
            let path = normalize(Path::new(relative_cwd).join(value));
            let key = to_key(&path).or_raise(|| ErrorKind::Configuration(format!("path variable {name} is unusable")))?;
            translated.insert(name.clone(), key);
        }
        let evaluated = normalize(to_host_separators(&eval_variables(expression, &translated)?));
        if evaluated == Path::new(".") {
            return Ok(None);
        }
        to_key(&evaluated).map(Some).or_raise(|| ErrorKind::Configuration(format!("subdir {expression:?} is unusable")))
    }
}

fn save_blocking(isolated: &Path, state: &SavedState) -> Result<(String, u64)> {
    let document = state.to_isolated().to_bytes();
    write_atomic(isolated, &document).or_raise(|| ErrorKind::Persist(isolated.to_path_buf()))?;
    store::save(isolated, state).or_raise(|| ErrorKind::Persist(state_path(isolated)))?;
    // Infallible: a usize (either 32- or 64-bit) will always fit in a u64.
    Ok((digest_bytes(&document), u64::try_from(document.len()).unwrap_or(0)))
}

fn relative_key(path: &Path, base: &Path) -> Result<String> {
    safe_relpath(path, base)
        .and_then(to_key)
        .or_raise(|| ErrorKind::Configuration(format!("{} is unrelated to {}", path.display(), base.display())))
}

/// Resolves one tree.
///
/// 1. Loads the state of `options.isolated` (or starts an ephemeral one at
///    `cwd`).
/// 2. Reconciles the manifest source given in `options` with the one the
///    state recorded. A disagreement is only tolerated with `skip_update`,
///    which keeps the recorded one.
/// 3. Unless `skip_update`, expands the manifest into the state.
/// 4. Evaluates `subdir` against the state's path variables.
/// 5. Unless `skip_update`, computes the metadata of every file under
///    `subdir`.
#[instrument(skip_all, fields(isolated = ?options.isolated, skip_update))]
pub async fn load_complete_state(
    ctx: &Context,
    options: &ArchiveOptions,
    cwd: &Path,
    subdir: Option<&str>,
    skip_update: bool,
) -> Result<CompleteState> {
    let mut complete = match &options.isolated {
        Some(isolated) => CompleteState::load_files(isolated).await?,
        None => CompleteState::ephemeral(cwd),
    };

    let recorded = complete.saved_state.isolate_filepath();
    let isolate = match (&options.isolate, recorded) {
        (Some(given), Some(recorded)) => {
            let relative = relative_key(given, complete.saved_state.isolated_basedir())?;
            if complete.saved_state.isolate_file.as_deref() == Some(relative.as_str()) {
                Some(given.clone())
            } else if skip_update {
                Some(recorded)
            } else {
                exn::bail!(ErrorKind::Configuration(format!(
                    "{} doesn't match {} recorded in the saved state",
                    given.display(),
                    recorded.display()
                )));
            }
        },
        (Some(given), None) => Some(given.clone()),
        (None, Some(recorded)) => Some(recorded),
        (None, None) if skip_update => None,
        (None, None) => exn::bail!(ErrorKind::Configuration("a .isolate file is required".to_string())),
    };

    if !skip_update && let Some(isolate) = &isolate {
        complete.load_isolate(ctx, cwd, isolate, options).await?;
    }

    let subdir = match subdir {
        Some(expression) => complete.translate_subdir(expression)?,
        None => None,
    };

    if !skip_update {
        hash::files_to_metadata(&mut complete.saved_state, subdir.as_deref(), ctx.hash_concurrency).await?;
    }
    Ok(complete)
}
