//! Lexical path helpers.
//!
//! Nothing in here touches the filesystem: paths are normalized and related
//! to each other purely by their components, the same way on every run.

use crate::error::{ErrorKind, Result};
use std::path::{Component, Path, PathBuf};

/// Lexically normalizes a path: removes `.` components and duplicate
/// separators, and resolves `..` against preceding components.
///
/// Leading `..` components of a relative path are kept (there is nothing to
/// resolve them against), while `..` directly under the root of an absolute
/// path is dropped. An empty result becomes `.`.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use isolate_state::path::normalize;
///
/// assert_eq!(normalize("a/./b//c/../d"), Path::new("a/b/d"));
/// assert_eq!(normalize("../a/../../b"), Path::new("../../b"));
/// assert_eq!(normalize("/../etc"), Path::new("/etc"));
/// assert_eq!(normalize("a/.."), Path::new("."));
/// ```
pub fn normalize(path: impl AsRef<Path>) -> PathBuf {
    let mut anchor = PathBuf::new();
    let mut parts: Vec<Component> = Vec::new();
    for component in path.as_ref().components() {
        match component {
            Component::Prefix(_) | Component::RootDir => anchor.push(component.as_os_str()),
            Component::CurDir => {},
            Component::ParentDir => {
                if matches!(parts.last(), Some(Component::Normal(_))) {
                    parts.pop();
                } else if !anchor.has_root() {
                    // Can't climb above the root, but a relative path keeps
                    // its leading `..`.
                    parts.push(component);
                }
            },
            Component::Normal(_) => parts.push(component),
        }
    }
    let mut normalized = anchor;
    normalized.extend(parts);
    match normalized.as_os_str().is_empty() {
        true => PathBuf::from("."),
        false => normalized,
    }
}

/// Returns `path` relative to `base`, after normalizing both.
///
/// Both paths must be absolute (sharing the same prefix on Windows) or both
/// relative; anything else is [`Unrelated`](ErrorKind::Unrelated).
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use isolate_state::path::safe_relpath;
///
/// assert_eq!(safe_relpath("/src/out/foo.isolate", "/src/out").unwrap(), Path::new("foo.isolate"));
/// assert_eq!(safe_relpath("/src/base/foo.isolate", "/src/out").unwrap(), Path::new("../base/foo.isolate"));
/// assert_eq!(safe_relpath("/src", "/src").unwrap(), Path::new("."));
/// assert!(safe_relpath("relative/foo", "/src").is_err());
/// ```
pub fn safe_relpath(path: impl AsRef<Path>, base: impl AsRef<Path>) -> Result<PathBuf> {
    let unrelated = || ErrorKind::Unrelated {
        path: path.as_ref().to_path_buf(),
        base: base.as_ref().to_path_buf(),
    };
    let target = normalize(&path);
    let origin = normalize(&base);
    if target.has_root() != origin.has_root() || prefix_of(&target) != prefix_of(&origin) {
        exn::bail!(unrelated());
    }
    let target: Vec<Component> = target.components().filter(|c| !matches!(c, Component::CurDir)).collect();
    let origin: Vec<Component> = origin.components().filter(|c| !matches!(c, Component::CurDir)).collect();
    let common = target.iter().zip(origin.iter()).take_while(|(a, b)| a == b).count();
    // A relative base that still climbs (`../x`) past the shared part can't be
    // inverted without knowing the working directory.
    if origin[common..].iter().any(|c| matches!(c, Component::ParentDir)) {
        exn::bail!(unrelated());
    }
    let mut relative = PathBuf::new();
    for _ in common..origin.len() {
        relative.push("..");
    }
    relative.extend(&target[common..]);
    match relative.as_os_str().is_empty() {
        true => Ok(PathBuf::from(".")),
        false => Ok(relative),
    }
}

/// Renders a path as the string used for persisted keys.
pub fn to_key(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    match path.to_str() {
        Some(s) => Ok(s.to_string()),
        None => exn::bail!(ErrorKind::NonUtf8(path.to_path_buf())),
    }
}

/// Replaces `/` with the host's separator.
pub fn to_host_separators(path: &str) -> String {
    path.replace('/', std::path::MAIN_SEPARATOR_STR)
}

fn prefix_of(path: &Path) -> Option<Component<'_>> {
    path.components().next().filter(|c| matches!(c, Component::Prefix(_)))
}
