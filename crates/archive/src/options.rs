//! Archive options and the command line they are parsed from.

use crate::error::{ErrorKind, Result};
use clap::builder::FalseyValueParser;
use clap::{ArgAction, Parser};
use isolate_state::Variables;
use isolate_state::path::normalize;
use std::path::{Path, PathBuf};

/// Patterns excluded from expanded directories unless overridden.
pub const DEFAULT_BLACKLIST: [&str; 2] = [r"^.+\.(?:pyc|swp)$", r"^(?:.+/|)\.(?:git|svn)$"];

/// Extension an `.isolated` output must carry.
pub const ISOLATED_EXTENSION: &str = ".isolated";

/// Everything needed to archive one tree.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArchiveOptions {
    /// Manifest source (`.isolate`), absolute.
    pub isolate: Option<PathBuf>,
    /// Manifest output (`.isolated`), absolute. Its state lives next to it.
    pub isolated: Option<PathBuf>,
    /// Only files under this (variable-evaluated) prefix are hashed.
    pub subdir: Option<String>,
    pub ignore_broken_items: bool,
    /// Regular expressions matched against root-relative paths.
    pub blacklist: Vec<String>,
    pub path_variables: Variables,
    pub extra_variables: Variables,
    pub config_variables: Variables,
}

#[derive(Debug, Parser)]
#[command(name = "archive", no_binary_name = true, disable_help_flag = true)]
struct Args {
    /// .isolate file to load the dependency data from.
    #[arg(short = 'i', long)]
    isolate: Option<PathBuf>,
    /// .isolated file to generate or read.
    #[arg(short = 's', long)]
    isolated: Option<PathBuf>,
    #[arg(long = "path-variable", num_args = 2, value_names = ["NAME", "VALUE"], action = ArgAction::Append)]
    path_variables: Vec<String>,
    #[arg(long = "config-variable", num_args = 2, value_names = ["NAME", "VALUE"], action = ArgAction::Append)]
    config_variables: Vec<String>,
    #[arg(long = "extra-variable", num_args = 2, value_names = ["NAME", "VALUE"], action = ArgAction::Append)]
    extra_variables: Vec<String>,
    /// Added to the default patterns.
    #[arg(long, value_name = "PATTERN")]
    blacklist: Vec<String>,
    #[arg(long)]
    subdir: Option<String>,
    #[arg(
        long = "ignore_broken_items",
        env = "ISOLATE_IGNORE_BROKEN_ITEMS",
        action = ArgAction::SetTrue,
        value_parser = FalseyValueParser::new(),
    )]
    ignore_broken_items: bool,
}

/// Parses an archive command line. Relative `--isolate`/`--isolated` paths
/// are taken from `cwd`.
pub fn parse(args: &[String], cwd: &Path) -> Result<ArchiveOptions> {
    let args = Args::try_parse_from(args).map_err(|e| ErrorKind::SpecParse(e.to_string().trim().to_string()))?;
    let absolute = |p: PathBuf| normalize(cwd.join(p));
    let isolated = args.isolated.map(absolute);
    if let Some(isolated) = &isolated
        && !isolated.to_string_lossy().ends_with(ISOLATED_EXTENSION)
    {
        exn::bail!(ErrorKind::SpecParse(format!(
            "--isolated value must end with '{ISOLATED_EXTENSION}': {}",
            isolated.display()
        )));
    }
    Ok(ArchiveOptions {
        isolate: args.isolate.map(absolute),
        isolated,
        subdir: args.subdir,
        ignore_broken_items: args.ignore_broken_items,
        blacklist: DEFAULT_BLACKLIST.iter().map(|p| p.to_string()).chain(args.blacklist).collect(),
        path_variables: pairs(args.path_variables),
        extra_variables: pairs(args.extra_variables),
        config_variables: pairs(args.config_variables),
    })
}

/// Later occurrences of a name win.
fn pairs(flat: Vec<String>) -> Variables {
    flat.chunks_exact(2).map(|pair| (pair[0].clone(), pair[1].clone())).collect()
}

impl ArchiveOptions {
    /// Key of this tree in the batch result: the output's file name without
    /// its final extension (falling back to the manifest source).
    pub fn target_name(&self) -> String {
        let Some(name) = self.isolated.as_ref().or(self.isolate.as_ref()).and_then(|p| p.file_name()) else {
            return String::new();
        };
        let name = name.to_string_lossy();
        match name.rfind('.') {
            Some(dot) => name[..dot].to_string(),
            None => name.into_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_full_command_line() {
        let options = parse(
            &args(&[
                "--isolate",
                "../base/foo.isolate",
                "-s",
                "out/foo.isolated",
                "--path-variable",
                "DEPTH",
                "..",
                "--path-variable",
                "PRODUCT_DIR",
                "out",
                "--config-variable",
                "OS",
                "linux",
                "--extra-variable",
                "EXECUTABLE_SUFFIX",
                "",
                "--blacklist",
                r"^.+\.log$",
                "--subdir",
                "<(PRODUCT_DIR)/lib",
                "--ignore_broken_items",
            ]),
            Path::new("/src/work"),
        )
        .unwrap();
        assert_eq!(options.isolate.as_deref(), Some(Path::new("/src/base/foo.isolate")));
        assert_eq!(options.isolated.as_deref(), Some(Path::new("/src/work/out/foo.isolated")));
        assert_eq!(options.path_variables.get("DEPTH").map(String::as_str), Some(".."));
        assert_eq!(options.path_variables.get("PRODUCT_DIR").map(String::as_str), Some("out"));
        assert_eq!(options.config_variables.get("OS").map(String::as_str), Some("linux"));
        assert_eq!(options.extra_variables.get("EXECUTABLE_SUFFIX").map(String::as_str), Some(""));
        assert_eq!(options.blacklist.len(), DEFAULT_BLACKLIST.len() + 1);
        assert_eq!(options.blacklist.last().map(String::as_str), Some(r"^.+\.log$"));
        assert_eq!(options.subdir.as_deref(), Some("<(PRODUCT_DIR)/lib"));
        assert!(options.ignore_broken_items);
    }

    #[test]
    fn test_parse_defaults() {
        let options = parse(&args(&["-i", "/abs/a.isolate"]), Path::new("/cwd")).unwrap();
        assert_eq!(options.isolate.as_deref(), Some(Path::new("/abs/a.isolate")));
        assert!(options.isolated.is_none());
        assert!(options.path_variables.is_empty());
        assert_eq!(options.blacklist, DEFAULT_BLACKLIST.iter().map(|p| p.to_string()).collect::<Vec<_>>());
    }

    #[rstest]
    #[case(&["--unknown"])]
    #[case(&["--path-variable", "ONLY_NAME"])]
    #[case(&["-s", "out/foo.json"])]
    fn test_parse_errors(#[case] items: &[&str]) {
        let err = parse(&args(items), Path::new("/cwd")).unwrap_err();
        assert!(matches!(&*err, ErrorKind::SpecParse(_)));
    }

    #[rstest]
    #[case("s/base.sub.isolated", "base.sub")]
    #[case("/x/base.sub..isolated", "base.sub.")]
    #[case("/x/plain", "plain")]
    fn test_target_name(#[case] isolated: &str, #[case] expected: &str) {
        let options = ArchiveOptions {
            isolated: Some(PathBuf::from(isolated)),
            ..ArchiveOptions::default()
        };
        assert_eq!(options.target_name(), expected);
    }

    #[test]
    fn test_target_name_falls_back_to_source() {
        let options = ArchiveOptions {
            isolate: Some(PathBuf::from("/x/foo.isolate")),
            ..ArchiveOptions::default()
        };
        assert_eq!(options.target_name(), "foo");
        assert_eq!(ArchiveOptions::default().target_name(), "");
    }
}
