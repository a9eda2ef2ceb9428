//! Manifest expansion: turning an `.isolate` file into a command and a list
//! of inputs.
//!
//! The manifest grammar (conditions, includes) is owned by an external
//! helper; this module only defines the boundary and evaluates the
//! `<(NAME)` variables the helper leaves in place.

mod helper;
#[cfg(any(test, feature = "mock"))]
mod mock;

pub use self::helper::HelperProcess;
#[cfg(any(test, feature = "mock"))]
pub use self::mock::{MockParse, MockParser};

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use isolate_state::Variables;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, LazyLock};

static VARIABLE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<\(([A-Z_]+)\)").unwrap());

/// A manifest, expanded for one set of config variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Expansion {
    /// Command to run, variables not yet evaluated.
    pub command: Vec<String>,
    /// Inputs relative to the command directory, variables not yet evaluated.
    /// A trailing `/` marks a directory.
    pub files: Vec<String>,
    pub read_only: Option<u8>,
    /// Command directory relative to the manifest's directory.
    pub relative_cwd: String,
}

/// Expands `.isolate` manifests.
#[async_trait]
pub trait ManifestParser: Send + Sync {
    /// Expands the manifest at `isolate` (absolute). Path variables are
    /// relative to the manifest's directory.
    async fn load_isolate(
        &self,
        isolate: &Path,
        path_variables: &Variables,
        config_variables: &Variables,
        extra_variables: &Variables,
    ) -> Result<Expansion>;
}

pub type ParserHandle = Arc<dyn ManifestParser>;

/// Replaces every `<(NAME)` in `expression` with its value.
///
/// # Examples
///
/// ```
/// use isolate_archive::parser::eval_variables;
///
/// let vars = [("DEPTH".to_string(), "../..".to_string())].into_iter().collect();
/// assert_eq!(eval_variables("<(DEPTH)/out/<(DEPTH)", &vars).unwrap(), "../../out/../..");
/// assert!(eval_variables("<(PRODUCT_DIR)/bin", &vars).is_err());
/// ```
pub fn eval_variables(expression: &str, variables: &Variables) -> Result<String> {
    let mut evaluated = String::with_capacity(expression.len());
    let mut last = 0;
    for captures in VARIABLE.captures_iter(expression) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let Some(value) = variables.get(name.as_str()) else {
            exn::bail!(ErrorKind::SpecParse(format!(
                "variable {:?} was not found in {expression:?}; did you forget to specify --path-variable?",
                name.as_str()
            )));
        };
        evaluated.push_str(&expression[last..whole.start()]);
        evaluated.push_str(value);
        last = whole.end();
    }
    evaluated.push_str(&expression[last..]);
    Ok(evaluated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn vars(pairs: &[(&str, &str)]) -> Variables {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[rstest]
    #[case("plain/path", "plain/path")]
    #[case("<(DEPTH)/foo", "../foo")]
    #[case("<(DEPTH)<(DEPTH)", "....")]
    #[case("bin/app<(EXECUTABLE_SUFFIX)", "bin/app.exe")]
    #[case("<(lower)", "<(lower)")]
    #[case("<(DEPTH", "<(DEPTH")]
    fn test_eval_variables(#[case] expression: &str, #[case] expected: &str) {
        let variables = vars(&[("DEPTH", ".."), ("EXECUTABLE_SUFFIX", ".exe")]);
        assert_eq!(eval_variables(expression, &variables).unwrap(), expected);
    }

    #[test]
    fn test_eval_undefined_variable() {
        let err = eval_variables("<(PRODUCT_DIR)/x", &vars(&[("DEPTH", "..")])).unwrap_err();
        assert!(matches!(&*err, ErrorKind::SpecParse(_)));
    }

    #[test]
    fn test_expansion_defaults() {
        let expansion: Expansion = serde_json::from_str(r#"{"files": ["a"]}"#).unwrap();
        assert_eq!(expansion.files, vec!["a".to_string()]);
        assert!(expansion.command.is_empty());
        assert_eq!(expansion.relative_cwd, "");
    }
}
