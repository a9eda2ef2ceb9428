//! Turning expanded manifest entries into the list of files under a root.

use crate::error::{ErrorKind, Result};
use async_stream::stream;
use futures::{Stream, TryStreamExt};
use isolate_state::path::normalize;
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

/// Compiled blacklist; a path is excluded when any pattern matches at its
/// start.
pub(crate) struct Blacklist(Vec<Regex>);

impl Blacklist {
    pub(crate) fn new(patterns: &[String]) -> Result<Self> {
        patterns
            .iter()
            .map(|pattern| {
                Regex::new(&format!("^(?:{pattern})"))
                    .map_err(|e| ErrorKind::Configuration(format!("invalid blacklist pattern {pattern:?}: {e}")).into())
            })
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    pub(crate) fn is_match(&self, relative: &str) -> bool {
        self.0.iter().any(|re| re.is_match(relative))
    }
}

/// The deepest directory that contains `cmd_dir` and every entry (relative to
/// `cmd_dir`). Only leading `..` components matter: an entry can't reach
/// above `cmd_dir` any other way.
pub(crate) fn determine_root_dir<'a>(cmd_dir: &Path, entries: impl IntoIterator<Item = &'a str>) -> PathBuf {
    let top = cmd_dir.ancestors().last().unwrap_or(cmd_dir);
    let mut root = cmd_dir;
    for entry in entries {
        let climbs = normalize(entry).components().take_while(|c| matches!(c, Component::ParentDir)).count();
        let candidate = cmd_dir.ancestors().nth(climbs).unwrap_or(top);
        if candidate.components().count() < root.components().count() {
            root = candidate;
        }
    }
    root.to_path_buf()
}

/// Expands every entry (relative to `root`, `/`-terminated for directories)
/// into the files it stands for.
///
/// Directories are listed recursively, skipping blacklisted paths; entries
/// listed explicitly are kept even when blacklisted. Symlinks are leaves:
/// they are kept as-is and never followed. A broken entry fails the whole
/// expansion unless `ignore_broken_items`, in which case it is logged and
/// contributes nothing.
pub(crate) async fn expand_directories(
    root: &Path,
    entries: Vec<String>,
    blacklist: &Blacklist,
    ignore_broken_items: bool,
) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in entries {
        match expand_entry(root, entry, blacklist).try_collect::<Vec<_>>().await {
            Ok(expanded) => files.extend(expanded),
            Err(e) if ignore_broken_items => tracing::warn!(error = ?e, "Ignoring broken item"),
            Err(e) => return Err(e),
        }
    }
    Ok(files)
}

fn broken(path: PathBuf, reason: &'static str) -> crate::error::Error {
    ErrorKind::BrokenItem { path, reason }.into()
}

fn expand_entry<'a>(root: &'a Path, entry: String, blacklist: &'a Blacklist) -> impl Stream<Item = Result<String>> + 'a {
    stream!({
        let is_dir_entry = entry.ends_with('/');
        let trimmed = entry.trim_end_matches('/');
        let full = root.join(trimmed);
        let relative = normalize(trimmed);
        if relative.is_absolute() || relative.starts_with("..") {
            yield Err(broken(full, "escapes the root directory"));
            return;
        }
        let stat = match fs::symlink_metadata(&full).await {
            Ok(stat) => stat,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                yield Err(broken(full, "doesn't exist"));
                return;
            },
            Err(e) => {
                yield Err(exn::Exn::from(e).raise(ErrorKind::Metadata(full)));
                return;
            },
        };
        if stat.file_type().is_symlink() {
            yield Ok(relative.to_string_lossy().into_owned());
            return;
        }
        match (stat.is_dir(), is_dir_entry) {
            (false, false) => {
                yield Ok(relative.to_string_lossy().into_owned());
                return;
            },
            (true, false) => {
                yield Err(broken(full, "is a directory but has no trailing slash"));
                return;
            },
            (false, true) => {
                yield Err(broken(full, "has a trailing slash but isn't a directory"));
                return;
            },
            (true, true) => {},
        }

        // `./` and `a/./` list the same directory as `` and `a/`.
        let start = match relative == Path::new(".") {
            true => String::new(),
            false => format!("{}/", relative.to_string_lossy()),
        };
        let mut stack = vec![start];
        'dirs: while let Some(current) = stack.pop() {
            let dir = root.join(&current);
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    yield Err(exn::Exn::from(e).raise(ErrorKind::Metadata(dir)));
                    continue 'dirs;
                },
            };
            let mut children = Vec::new();
            'entries: loop {
                let child = match entries.next_entry().await {
                    Ok(Some(child)) => child,
                    Ok(None) => break 'entries,
                    Err(e) => {
                        yield Err(exn::Exn::from(e).raise(ErrorKind::Metadata(dir.clone())));
                        continue 'dirs;
                    },
                };
                let Some(name) = child.file_name().to_str().map(str::to_string) else {
                    yield Err(broken(child.path(), "name is not valid UTF-8"));
                    continue 'entries;
                };
                let is_dir = match child.file_type().await {
                    Ok(file_type) => file_type.is_dir(),
                    Err(e) => {
                        yield Err(exn::Exn::from(e).raise(ErrorKind::Metadata(child.path())));
                        continue 'entries;
                    },
                };
                children.push((format!("{current}{name}"), is_dir));
            }
            // Listing order is up to the filesystem; sort for stable output.
            children.sort();
            let mut subdirs = Vec::new();
            for (child, is_dir) in children {
                if blacklist.is_match(&child) {
                    tracing::trace!(path = %child, "Blacklisted");
                    continue;
                }
                match is_dir {
                    true => subdirs.push(format!("{child}/")),
                    false => yield Ok(child),
                }
            }
            stack.extend(subdirs.into_iter().rev());
        }
    })
}
