//! Pre-programmed manifest parser for testing.

use crate::error::{ErrorKind, Result};
use crate::parser::{Expansion, ManifestParser};
use async_trait::async_trait;
use isolate_state::Variables;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// One `load_isolate` call received by a [`MockParser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockParse {
    pub isolate: PathBuf,
    pub path_variables: Variables,
}

/// Returns a fixed [`Expansion`] per manifest path. Any other path fails with
/// [`SpecParse`](ErrorKind::SpecParse), like a manifest with a syntax error.
#[derive(Default)]
pub struct MockParser {
    expansions: HashMap<PathBuf, Expansion>,
    calls: Mutex<Vec<MockParse>>,
}

impl MockParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, isolate: impl Into<PathBuf>, expansion: Expansion) -> Self {
        self.expansions.insert(isolate.into(), expansion);
        self
    }

    /// Every call received so far, in order.
    pub async fn calls(&self) -> Vec<MockParse> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl ManifestParser for MockParser {
    async fn load_isolate(
        &self,
        isolate: &Path,
        path_variables: &Variables,
        _config_variables: &Variables,
        _extra_variables: &Variables,
    ) -> Result<Expansion> {
        self.calls.lock().await.push(MockParse {
            isolate: isolate.to_path_buf(),
            path_variables: path_variables.clone(),
        });
        match self.expansions.get(isolate) {
            Some(expansion) => Ok(expansion.clone()),
            None => exn::bail!(ErrorKind::SpecParse(format!("no expansion for {}", isolate.display()))),
        }
    }
}
