use crate::util::env_usize;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// How documents are laid out in the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Whole documents in `posts_jsonb`.
    Denormalized,
    /// Relational rows, one INSERT per row.
    Normalized,
    /// Relational rows, one multi-row INSERT per entity type and batch.
    NormalizedBatch,
}

impl Strategy {
    pub fn is_normalized(self) -> bool {
        !matches!(self, Strategy::Denormalized)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Denormalized => "denormalized",
            Strategy::Normalized => "normalized",
            Strategy::NormalizedBatch => "normalized-batch",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "denormalized" => Ok(Strategy::Denormalized),
            "normalized" => Ok(Strategy::Normalized),
            "normalized-batch" | "batch" => Ok(Strategy::NormalizedBatch),
            other => Err(anyhow::anyhow!("unknown strategy {other:?}")),
        }
    }
}

/// What to do with reply/quote references that do not resolve by commit time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReferencePolicy {
    /// Fail the file's transaction if any referenced post is missing at commit.
    #[default]
    Enforce,
    /// Keep the reference ids as plain data, resolved or not.
    Ignore,
}

/// Loader options with defaults and builder chaining.
#[derive(Clone, Debug)]
pub struct LoadOptions {
    pub database: PathBuf,
    pub strategy: Strategy,
    pub batch_size: usize,              // rows per entity type before a flush
    pub workers: usize,                 // files loaded concurrently
    pub reference_policy: ReferencePolicy,
    pub seen_capacity: Option<usize>,   // None = remember every post id of a run
    pub low_memory_frac: f64,           // flush early below this free-memory fraction
    pub progress: bool,
    pub progress_label: Option<String>,
    pub log_every: u64,                 // 0 disables periodic read logs
    pub read_buffer_bytes: usize,
    pub busy_timeout: Duration,
    pub max_pending_batches: usize,     // batches buffered while another worker holds the write lock
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            database: PathBuf::from("tweets.sqlite"),
            strategy: Strategy::NormalizedBatch,
            batch_size: 1000,
            workers: 1, // writes still serialize on SQLite's lock; extra workers overlap decoding
            reference_policy: ReferencePolicy::Enforce,
            seen_capacity: None,
            low_memory_frac: 0.05,
            progress: true,
            progress_label: None,
            log_every: 0,
            read_buffer_bytes: 256 * 1024,
            busy_timeout: Duration::from_secs(60),
            max_pending_batches: 8,
        }
    }
}

impl LoadOptions {
    pub fn with_database(mut self, path: impl AsRef<Path>) -> Self {
        self.database = path.as_ref().to_path_buf();
        self
    }
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }
    pub fn with_batch_size(mut self, rows: usize) -> Self {
        self.batch_size = rows.max(1);
        self
    }
    pub fn with_workers(mut self, n: usize) -> Self {
        self.workers = n.max(1);
        self
    }
    pub fn with_reference_policy(mut self, policy: ReferencePolicy) -> Self {
        self.reference_policy = policy;
        self
    }
    pub fn with_seen_capacity(mut self, capacity: Option<usize>) -> Self {
        self.seen_capacity = capacity.map(|c| c.max(2));
        self
    }
    pub fn with_low_memory_threshold(mut self, frac: f64) -> Self {
        self.low_memory_frac = frac.clamp(0.0, 1.0);
        self
    }
    pub fn with_progress(mut self, yes: bool) -> Self {
        self.progress = yes;
        self
    }
    pub fn with_progress_label(mut self, label: impl Into<String>) -> Self {
        self.progress_label = Some(label.into());
        self
    }
    pub fn with_log_every(mut self, n: u64) -> Self {
        self.log_every = n;
        self
    }
    pub fn with_io_read_buffer(mut self, bytes: usize) -> Self {
        self.read_buffer_bytes = bytes.max(8 * 1024);
        self
    }
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
    pub fn with_max_pending_batches(mut self, n: usize) -> Self {
        self.max_pending_batches = n.max(1);
        self
    }

    /// Apply `TWEETLOAD_BATCH_SIZE` / `TWEETLOAD_WORKERS` / `TWEETLOAD_SEEN_CAPACITY`
    /// when set. Explicit builder calls made afterwards still win.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(n) = env_usize("TWEETLOAD_BATCH_SIZE") {
            self = self.with_batch_size(n);
        }
        if let Some(n) = env_usize("TWEETLOAD_WORKERS") {
            self = self.with_workers(n);
        }
        if let Some(n) = env_usize("TWEETLOAD_SEEN_CAPACITY") {
            self = self.with_seen_capacity(Some(n));
        }
        self
    }
}
