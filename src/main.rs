use anyhow::{bail, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tweetload::{init_tracing_once, ArchiveKind, LoadOptions, ReferencePolicy, Strategy, TweetLoader};
use walkdir::WalkDir;

/// Load newline-delimited tweet archives into SQLite.
#[derive(Debug, Parser)]
#[command(name = "tweetload", version)]
struct Args {
    /// Destination SQLite database (created if missing).
    #[arg(long, env = "TWEETLOAD_DB")]
    db: PathBuf,

    /// Ingestion strategy.
    #[arg(long, value_enum, default_value_t = Strategy::NormalizedBatch)]
    strategy: Strategy,

    /// Rows per entity type buffered before a batch is written.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Files loaded concurrently.
    #[arg(long)]
    workers: Option<usize>,

    /// Commit replies/quotes whose target post is not in the store.
    #[arg(long)]
    ignore_references: bool,

    /// Remember at most this many post ids per file when deduplicating.
    #[arg(long)]
    seen_capacity: Option<usize>,

    /// Log a progress line every N documents (0 disables).
    #[arg(long, default_value_t = 0)]
    log_every: u64,

    /// Seconds per wait on the SQLite write lock; waits before the first write are retried.
    #[arg(long, default_value_t = 60)]
    busy_timeout_secs: u64,

    #[arg(long)]
    no_progress: bool,

    /// Archive files, or directories to search for them.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

fn is_archive(path: &Path) -> bool {
    match ArchiveKind::from_path(path) {
        ArchiveKind::Zstd | ArchiveKind::Zip => true,
        ArchiveKind::Plain => matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("jsonl") | Some("ndjson") | Some("json")
        ),
    }
}

/// Expand directories into the archive files below them. Newest-named files first.
fn collect_inputs(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            for entry in WalkDir::new(input).min_depth(1).into_iter().filter_map(|e| e.ok()) {
                if entry.file_type().is_file() && is_archive(entry.path()) {
                    files.push(entry.into_path());
                }
            }
        } else {
            files.push(input.clone());
        }
    }
    files.sort_unstable_by(|a, b| b.cmp(a));
    files.dedup();
    files
}

fn main() -> Result<()> {
    init_tracing_once();
    let args = Args::parse();

    let mut opts = LoadOptions::default()
        .with_database(&args.db)
        .with_strategy(args.strategy)
        .with_env_overrides()
        .with_progress(!args.no_progress)
        .with_log_every(args.log_every)
        .with_busy_timeout(Duration::from_secs(args.busy_timeout_secs));
    if let Some(n) = args.batch_size {
        opts = opts.with_batch_size(n);
    }
    if let Some(n) = args.workers {
        opts = opts.with_workers(n);
    }
    if args.seen_capacity.is_some() {
        opts = opts.with_seen_capacity(args.seen_capacity);
    }
    if args.ignore_references {
        opts = opts.with_reference_policy(ReferencePolicy::Ignore);
    }

    let files = collect_inputs(&args.inputs);
    if files.is_empty() {
        bail!("no input archives found");
    }

    let outcomes = TweetLoader::from_options(opts).load_files(&files)?;
    for outcome in &outcomes {
        println!("{}", outcome.to_json());
    }

    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
    if failed > 0 {
        eprintln!("{failed} of {} files failed", outcomes.len());
        std::process::exit(1);
    }
    Ok(())
}
