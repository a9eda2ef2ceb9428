//! Loading and persisting [`SavedState`] records.
//!
//! A state lives next to the `.isolated` output it describes, as
//! `<output>.state`. Writes go through a temporary file in the same directory
//! that is renamed over the target, so a reader sees either the old record or
//! the new one, never half of one.

use crate::error::{ErrorKind, Result};
use crate::metadata::ALGO;
use crate::saved::{HOST_OS, STATE_VERSION, SavedState};
use exn::ResultExt;
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::instrument;

/// Suffix appended to an `.isolated` path to find its state.
pub const STATE_SUFFIX: &str = ".state";

/// Path of the state file for the `.isolated` output at `isolated`.
pub fn state_path(isolated: impl AsRef<Path>) -> PathBuf {
    let mut path = isolated.as_ref().as_os_str().to_owned();
    path.push(STATE_SUFFIX);
    PathBuf::from(path)
}

/// Only the fields that decide whether the rest can be trusted.
#[derive(Deserialize)]
struct Header {
    #[serde(default)]
    version: Option<String>,
    #[serde(rename = "OS", default)]
    os: Option<String>,
    #[serde(default)]
    algo: Option<String>,
}

/// Loads the saved state for the `.isolated` output at `isolated`.
///
/// A missing state file is a first run, not an error: a fresh state anchored
/// at the output's directory is returned. A state file that exists but can't
/// be read, doesn't decode, or was written by another format version, OS or
/// hash algorithm is rejected.
#[instrument(level = "debug", fields(isolated = %isolated.as_ref().display()))]
pub fn load(isolated: impl AsRef<Path>) -> Result<SavedState> {
    let isolated = isolated.as_ref();
    if !isolated.is_absolute() {
        exn::bail!(ErrorKind::NotAbsolute(isolated.to_path_buf()));
    }
    let basedir = isolated.parent().unwrap_or(isolated).to_path_buf();
    let path = state_path(isolated);
    let data = match std::fs::read(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No saved state; starting fresh");
            return Ok(SavedState::new(basedir));
        },
        Err(e) => return Err(e).or_raise(|| ErrorKind::Unreadable(path)),
    };
    decode(&data, &path).map(|state| state.with_basedir(basedir))
}

fn decode(data: &[u8], path: &Path) -> Result<SavedState> {
    // Check the header first: a different version may not even have the
    // same shape, and that should be reported as such.
    let header: Header = serde_json::from_slice(data).or_raise(|| ErrorKind::Corrupt(path.to_path_buf()))?;
    if header.version.as_deref() != Some(STATE_VERSION) {
        exn::bail!(ErrorKind::VersionMismatch {
            found: header.version.unwrap_or_default(),
            expected: STATE_VERSION,
        });
    }
    if header.os.as_deref() != Some(HOST_OS) {
        exn::bail!(ErrorKind::OsMismatch {
            found: header.os.unwrap_or_default(),
            expected: HOST_OS,
        });
    }
    // Digests under another algorithm can't be compared with fresh ones.
    if header.algo.as_deref() != Some(ALGO) {
        exn::bail!(ErrorKind::AlgoMismatch {
            found: header.algo.unwrap_or_default(),
            expected: ALGO,
        });
    }
    serde_json::from_slice(data).or_raise(|| ErrorKind::Corrupt(path.to_path_buf()))
}

/// Persists `state` for the `.isolated` output at `isolated`.
pub fn save(isolated: impl AsRef<Path>, state: &SavedState) -> Result<()> {
    let isolated = isolated.as_ref();
    if !isolated.is_absolute() {
        exn::bail!(ErrorKind::NotAbsolute(isolated.to_path_buf()));
    }
    let path = state_path(isolated);
    let data = serde_json::to_vec_pretty(state).or_raise(|| ErrorKind::Write(path.clone()))?;
    write_atomic(&path, &data)?;
    tracing::debug!(path = %path.display(), files = state.files.len(), "Saved state");
    Ok(())
}

/// Writes `data` to `path` so that readers never observe a partial file.
///
/// Parent directories are created as needed.
pub fn write_atomic(path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let write_error = || ErrorKind::Write(path.to_path_buf());
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).or_raise(write_error)?;
    // Same directory as the target, so the final rename never crosses filesystems.
    let mut temp = NamedTempFile::new_in(dir).or_raise(write_error)?;
    temp.write_all(data).or_raise(write_error)?;
    temp.as_file().sync_all().or_raise(write_error)?;
    temp.persist(path).map_err(|e| e.error).or_raise(write_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::FileMetadata;
    use rstest::rstest;

    fn populated(basedir: &Path) -> SavedState {
        let mut state = SavedState::new(basedir);
        state.child_isolated_files = vec!["child.isolated".into()];
        state.command = vec!["python".into(), "run.py".into()];
        state.config_variables.insert("OS".into(), "linux".into());
        state.extra_variables.insert("EXE".into(), "".into());
        state.path_variables.insert("PRODUCT_DIR".into(), "../out".into());
        state.files.insert("a.txt".into(), FileMetadata::file("aaa", 3).with_modified(10).with_mode(0o644));
        state.files.insert("link".into(), FileMetadata::symlink("a.txt"));
        state.isolate_file = Some("../src/foo.isolate".into());
        state.read_only = Some(2);
        state.relative_cwd = Some("out".into());
        state.root_dir = Some(basedir.join("root"));
        state
    }

    #[test]
    fn test_state_path() {
        assert_eq!(state_path("/out/foo.isolated"), Path::new("/out/foo.isolated.state"));
    }

    #[test]
    fn test_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let isolated = temp.path().join("foo.isolated");
        let state = populated(temp.path());
        save(&isolated, &state).unwrap();
        let loaded = load(&isolated).unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.isolated_basedir(), temp.path());
    }

    #[test]
    fn test_missing_state_is_fresh() {
        let temp = tempfile::tempdir().unwrap();
        let loaded = load(temp.path().join("new.isolated")).unwrap();
        assert_eq!(loaded, SavedState::new(temp.path()));
    }

    #[test]
    fn test_relative_path_rejected() {
        let err = load("relative/foo.isolated").unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotAbsolute(_)));
        let err = save("relative/foo.isolated", &SavedState::new("/")).unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotAbsolute(_)));
    }

    #[rstest]
    #[case(r#"{"version": "0.9", "OS": "linux"}"#)]
    #[case(r#"{"OS": "linux"}"#)]
    #[case(r#"{"version": 1, "OS": "linux"}"#)]
    fn test_version_mismatch(#[case] content: &str) {
        let temp = tempfile::tempdir().unwrap();
        let isolated = temp.path().join("foo.isolated");
        // Adjust the OS so only the version can be wrong.
        let content = content.replace("linux", HOST_OS);
        std::fs::write(state_path(&isolated), content).unwrap();
        let err = load(&isolated).unwrap_err();
        assert!(err.is_corruption(), "{err:?}");
        assert!(
            matches!(&*err, ErrorKind::VersionMismatch { .. } | ErrorKind::Corrupt(_)),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn test_os_mismatch() {
        let temp = tempfile::tempdir().unwrap();
        let isolated = temp.path().join("foo.isolated");
        let mut state = populated(temp.path());
        state.os = "plan9".into();
        std::fs::write(state_path(&isolated), serde_json::to_vec(&state).unwrap()).unwrap();
        let err = load(&isolated).unwrap_err();
        assert!(matches!(&*err, ErrorKind::OsMismatch { .. }));
    }

    #[rstest]
    #[case(Some("sha-1"))]
    #[case(Some(""))]
    #[case(None)]
    fn test_algo_mismatch(#[case] algo: Option<&str>) {
        let temp = tempfile::tempdir().unwrap();
        let isolated = temp.path().join("foo.isolated");
        let mut record = serde_json::to_value(populated(temp.path())).unwrap();
        match algo {
            Some(algo) => record["algo"] = algo.into(),
            None => {
                record.as_object_mut().unwrap().remove("algo");
            },
        }
        std::fs::write(state_path(&isolated), serde_json::to_vec(&record).unwrap()).unwrap();
        let err = load(&isolated).unwrap_err();
        assert!(err.is_corruption(), "{err:?}");
        assert_eq!(
            *err,
            ErrorKind::AlgoMismatch {
                found: algo.unwrap_or_default().to_string(),
                expected: ALGO,
            }
        );
    }

    #[rstest]
    #[case("")]
    #[case("not json")]
    #[case("42")]
    fn test_corrupt(#[case] content: &str) {
        let temp = tempfile::tempdir().unwrap();
        let isolated = temp.path().join("foo.isolated");
        std::fs::write(state_path(&isolated), content).unwrap();
        let err = load(&isolated).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Corrupt(_)));
    }

    #[test]
    fn test_corrupt_body_with_valid_header() {
        let temp = tempfile::tempdir().unwrap();
        let isolated = temp.path().join("foo.isolated");
        let content = format!(r#"{{"version": "{STATE_VERSION}", "OS": "{HOST_OS}", "algo": "{ALGO}", "files": 42}}"#);
        std::fs::write(state_path(&isolated), content).unwrap();
        let err = load(&isolated).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Corrupt(_)));
    }

    #[test]
    fn test_write_atomic_replaces_and_creates_parents() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("a/b/file.json");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        // No temporary files are left behind.
        assert_eq!(std::fs::read_dir(temp.path().join("a/b")).unwrap().count(), 1);
    }
}
