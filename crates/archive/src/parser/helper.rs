use crate::error::{ErrorKind, Result};
use crate::parser::{Expansion, ManifestParser};
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use isolate_state::Variables;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::instrument;

/// Sub-command the helper is invoked with.
const LOAD_ISOLATE: &str = "load_isolate";

/// Expands manifests by running an external helper program.
///
/// The helper is invoked as `<program> <args...> load_isolate`, receives the
/// request as JSON on stdin and must print an [`Expansion`] as JSON on
/// stdout. Anything it writes to stderr is kept for the error message.
#[derive(Debug, Clone)]
pub struct HelperProcess {
    program: PathBuf,
    args: Vec<String>,
}

#[derive(Serialize)]
struct Request<'a> {
    isolate: &'a Path,
    path_variables: &'a Variables,
    config_variables: &'a Variables,
    extra_variables: &'a Variables,
}

impl HelperProcess {
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    fn failure(&self, isolate: &Path, detail: impl std::fmt::Display) -> ErrorKind {
        ErrorKind::SpecParse(format!("{} ({}): {detail}", isolate.display(), self.program.display()))
    }
}

#[async_trait]
impl ManifestParser for HelperProcess {
    #[instrument(level = "debug", skip_all, fields(isolate = %isolate.display()))]
    async fn load_isolate(
        &self,
        isolate: &Path,
        path_variables: &Variables,
        config_variables: &Variables,
        extra_variables: &Variables,
    ) -> Result<Expansion> {
        let request = serde_json::to_vec(&Request {
            isolate,
            path_variables,
            config_variables,
            extra_variables,
        })
        .or_raise(|| self.failure(isolate, "unable to encode request"))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(LOAD_ISOLATE)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .or_raise(|| self.failure(isolate, "unable to start helper"))?;
        let mut stdin = child.stdin.take().ok_or_raise(|| self.failure(isolate, "helper has no stdin"))?;
        // Written concurrently with draining stdout, so a chatty helper can't
        // block on a full pipe while we block on its stdin.
        let feed = async move {
            let written = stdin.write_all(&request).await;
            drop(stdin);
            written
        };
        let (written, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.or_raise(|| self.failure(isolate, "helper did not run to completion"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            exn::bail!(self.failure(isolate, format!("helper exited with {}: {}", output.status, stderr.trim())));
        }
        // A helper that exits successfully without reading its input is fine.
        if let Err(e) = written {
            tracing::debug!(error = %e, "Helper closed stdin early");
        }
        serde_json::from_slice(&output.stdout).or_raise(|| self.failure(isolate, "helper printed invalid JSON"))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn script(body: &str) -> HelperProcess {
        // `sh -c <body> <$0>` then `load_isolate` lands in `$1`.
        HelperProcess::new("sh", ["-c", body, "helper"])
    }

    async fn run(helper: &HelperProcess) -> Result<Expansion> {
        let vars = Variables::new();
        helper.load_isolate(Path::new("/src/foo.isolate"), &vars, &vars, &vars).await
    }

    #[tokio::test]
    async fn test_parses_stdout() {
        let helper = script(
            r#"test "$1" = load_isolate || exit 9
cat > /dev/null
echo '{"command": ["python", "run.py"], "files": ["run.py", "data/"], "read_only": 1, "relative_cwd": "."}'"#,
        );
        let expansion = run(&helper).await.unwrap();
        assert_eq!(expansion.command, vec!["python".to_string(), "run.py".to_string()]);
        assert_eq!(expansion.files, vec!["run.py".to_string(), "data/".to_string()]);
        assert_eq!(expansion.read_only, Some(1));
        assert_eq!(expansion.relative_cwd, ".");
    }

    #[tokio::test]
    async fn test_receives_request() {
        // Echo the request's manifest path back as the only file.
        let helper = script(
            r#"path=$(sed -e 's/.*"isolate":"\([^"]*\)".*/\1/')
printf '{"files": ["%s"]}' "$path""#,
        );
        let expansion = run(&helper).await.unwrap();
        assert_eq!(expansion.files, vec!["/src/foo.isolate".to_string()]);
    }

    #[tokio::test]
    async fn test_failure_keeps_stderr() {
        let helper = script("echo 'no such condition' >&2; exit 3");
        let err = run(&helper).await.unwrap_err();
        let ErrorKind::SpecParse(message) = &*err else {
            panic!("unexpected error: {err:?}");
        };
        assert!(message.contains("no such condition"), "{message}");
    }

    #[tokio::test]
    async fn test_invalid_json() {
        let err = run(&script("echo nope")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::SpecParse(_)));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let helper = HelperProcess::new("/nonexistent/helper", Vec::<String>::new());
        let err = run(&helper).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::SpecParse(_)));
    }
}
