use crate::error::{ErrorKind, Result};
use clap::{Args, Parser, Subcommand};
use exn::ResultExt;
use isolate_archive::{BatchRequest, Context, HelperProcess, ParserHandle, Tree, archive};
use isolate_config::{Config, Overrides};
use isolate_storage::{Destination, DryRunStore, Storage};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "isolate", version, about)]
pub struct Cli {
    /// Log at debug level, unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    pub verbose: bool,
    /// Configuration file (toml, yaml or json).
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Archive the trees described by one or more `.isolated.gen.json` files.
    Batcharchive(BatchArchiveArgs),
}

#[derive(Debug, Args)]
pub struct BatchArchiveArgs {
    /// Store to upload to (`file://<dir>` or an absolute directory).
    #[arg(long = "isolate-server", value_name = "URL")]
    pub isolate_server: Option<String>,
    #[arg(long)]
    pub namespace: Option<String>,
    /// Write the digest of every archived tree to this file as JSON.
    #[arg(long = "dump-json", value_name = "PATH")]
    pub dump_json: Option<PathBuf>,
    /// Resolve and hash everything, but don't push anything.
    #[arg(long)]
    pub dry_run: bool,
    #[arg(required = true, value_name = "FILE")]
    pub files: Vec<PathBuf>,
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Batcharchive(args) => batch_archive(cli.config.as_deref(), args).await,
    }
}

async fn batch_archive(config_file: Option<&Path>, args: BatchArchiveArgs) -> Result<()> {
    let overrides = Overrides {
        server: args.isolate_server,
        namespace: args.namespace,
    };
    let config = Config::load(config_file, &overrides).or_raise(|| usage("unable to load configuration"))?;
    let destination = Destination::new(config.server.clone().unwrap_or_default(), &config.namespace)
        .or_raise(|| usage("invalid destination"))?;
    let mut store = isolate_storage::open(&destination).or_raise(|| usage("unable to open store"))?;
    if args.dry_run {
        store = Arc::new(DryRunStore::new(store));
    }
    let storage = Storage::new(store, config.upload_concurrency);

    let trees = load_requests(&args.files).await?;
    let parser: ParserHandle = Arc::new(HelperProcess::new(&config.helper.program, config.helper.args.clone()));
    let ctx = Context::new(parser)
        .with_hash_concurrency(config.hash_concurrency)
        .with_fan_in_buffer(config.fan_in_buffer);

    let archived = archive(&ctx, &trees, &storage).await;
    if let Some(path) = &args.dump_json {
        dump_digests(path, &archived.digests).await;
    }
    if archived.good == 0 {
        exn::bail!(ErrorKind::NothingIsolated);
    }
    if let Some(stats) = archived.uploaded.or_raise(|| ErrorKind::Upload)? {
        tracing::info!(
            trees = archived.good,
            items = stats.items,
            pushed = stats.missing,
            bytes = stats.pushed_bytes,
            "Archived"
        );
    }
    Ok(())
}

fn usage(message: &str) -> ErrorKind {
    ErrorKind::Usage(message.to_string())
}

/// Loads every request up front: a single bad file rejects the batch, and so
/// do two files archiving the same target name.
async fn load_requests(files: &[PathBuf]) -> Result<Vec<Tree>> {
    let mut trees = Vec::with_capacity(files.len());
    let mut names = BTreeMap::new();
    for file in files {
        let invalid = || usage(&format!("invalid request {}", file.display()));
        let request = BatchRequest::load(file).await.or_raise(invalid)?;
        let tree = request.into_tree().or_raise(invalid)?;
        let name = tree.options.target_name();
        if let Some(first) = names.insert(name.clone(), file) {
            exn::bail!(usage(&format!(
                "{} and {} both archive {name:?}",
                first.display(),
                file.display()
            )));
        }
        trees.push(tree);
    }
    Ok(trees)
}

/// Best effort: the digests are only informational.
async fn dump_digests(path: &Path, digests: &BTreeMap<String, String>) {
    let written = match serde_json::to_vec_pretty(digests) {
        Ok(json) => tokio::fs::write(path, json).await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    match written {
        Ok(()) => tracing::debug!(path = %path.display(), trees = digests.len(), "Wrote digests"),
        Err(error) => tracing::warn!(path = %path.display(), %error, "Unable to write digests"),
    }
}
