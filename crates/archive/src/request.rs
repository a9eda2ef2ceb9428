//! Batch request files: one JSON document per tree to archive.
//!
//! ```json
//! {"Args": ["-i", "foo.isolate", "-s", "foo.isolated"], "Dir": "/src/out", "Version": 1}
//! ```

use crate::batch::Tree;
use crate::error::{ErrorKind, RequestProblem, Result};
use crate::options;
use exn::ResultExt;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::instrument;

/// The only request format understood.
pub const GEN_JSON_VERSION: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct BatchRequest {
    /// Archive command line for the tree.
    #[serde(rename = "Args")]
    pub args: Vec<String>,
    /// Directory the command line is relative to.
    #[serde(rename = "Dir")]
    pub dir: PathBuf,
    #[serde(rename = "Version")]
    pub version: i64,
}

impl BatchRequest {
    /// Reads and validates a request file. The version is checked before the
    /// directory is looked at, and the directory must be absolute.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn load(path: &Path) -> Result<Self> {
        let problem = |problem: RequestProblem| ErrorKind::Request {
            path: path.to_path_buf(),
            problem,
        };
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                exn::bail!(problem(RequestProblem::Missing))
            },
            Err(e) => return Err(exn::Exn::from(e).raise(problem(RequestProblem::Unreadable))),
        };
        let request: Self = serde_json::from_slice(&data).or_raise(|| problem(RequestProblem::Malformed))?;
        if request.version != GEN_JSON_VERSION {
            exn::bail!(problem(RequestProblem::Version(request.version)));
        }
        if !request.dir.is_absolute() {
            exn::bail!(problem(RequestProblem::NotAbsolute(request.dir)));
        }
        match tokio::fs::metadata(&request.dir).await {
            Ok(stat) if stat.is_dir() => Ok(request),
            _ => exn::bail!(problem(RequestProblem::NotADirectory(request.dir))),
        }
    }

    /// Parses the command line into the tree it describes.
    pub fn into_tree(self) -> Result<Tree> {
        let options = options::parse(&self.args, &self.dir)?;
        Ok(Tree { cwd: self.dir, options })
    }
}
