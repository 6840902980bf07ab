use crate::batch::{Accumulator, RawAccumulator};
use crate::concurrency::map_files_limited;
use crate::config::{LoadOptions, ReferencePolicy, Strategy};
use crate::dedupe::PostDeduplicator;
use crate::error::LoadError;
use crate::extract::extract;
use crate::load::{InsertMode, LoadCounts, Loader};
use crate::progress::{finish_load, load_progress_bar};
use crate::reader::{for_each_document, ReaderOptions};
use crate::memory::is_low_memory;
use crate::store::{LazyTransaction, Store};
use crate::util::init_tracing_once;
use anyhow::{Context, Result};
use indicatif::ProgressBar;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Result of loading one file: counts on success, the classified cause on failure.
/// A failed file has had its whole transaction rolled back.
#[derive(Debug)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub strategy: Strategy,
    pub elapsed: Duration,
    pub result: Result<LoadCounts, LoadError>,
}

impl FileOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn counts(&self) -> Option<&LoadCounts> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&LoadError> {
        self.result.as_ref().err()
    }

    /// One-line report for the orchestration layer.
    pub fn to_json(&self) -> Value {
        let mut v = json!({
            "path": self.path.display().to_string(),
            "strategy": self.strategy,
            "elapsed_ms": self.elapsed.as_millis() as u64,
            "ok": self.is_success(),
        });
        match &self.result {
            Ok(counts) => v["counts"] = json!(counts),
            Err(e) => v["error"] = json!({ "kind": e.kind(), "message": e.to_string() }),
        }
        v
    }
}

#[derive(Clone, Debug, Default)]
pub struct TweetLoader {
    pub(crate) opts: LoadOptions,
}

impl TweetLoader {
    pub fn new() -> Self {
        Self { opts: LoadOptions::default() }
    }

    pub fn from_options(opts: LoadOptions) -> Self {
        Self { opts }
    }

    pub fn options(&self) -> &LoadOptions {
        &self.opts
    }

    // -------- Builder methods --------
    pub fn database(mut self, path: impl AsRef<Path>) -> Self { self.opts = self.opts.with_database(path); self }
    pub fn strategy(mut self, strategy: Strategy) -> Self { self.opts = self.opts.with_strategy(strategy); self }
    pub fn batch_size(mut self, rows: usize) -> Self { self.opts = self.opts.with_batch_size(rows); self }
    pub fn workers(mut self, n: usize) -> Self { self.opts = self.opts.with_workers(n); self }
    pub fn reference_policy(mut self, policy: ReferencePolicy) -> Self { self.opts = self.opts.with_reference_policy(policy); self }
    pub fn seen_capacity(mut self, capacity: Option<usize>) -> Self { self.opts = self.opts.with_seen_capacity(capacity); self }
    pub fn low_memory_threshold(mut self, frac: f64) -> Self { self.opts = self.opts.with_low_memory_threshold(frac); self }
    pub fn progress(mut self, yes: bool) -> Self { self.opts = self.opts.with_progress(yes); self }
    pub fn progress_label(mut self, label: impl Into<String>) -> Self { self.opts = self.opts.with_progress_label(label); self }
    pub fn log_every(mut self, n: u64) -> Self { self.opts = self.opts.with_log_every(n); self }
    pub fn io_read_buffer(mut self, bytes: usize) -> Self { self.opts = self.opts.with_io_read_buffer(bytes); self }
    pub fn busy_timeout(mut self, timeout: Duration) -> Self { self.opts = self.opts.with_busy_timeout(timeout); self }
    pub fn max_pending_batches(mut self, n: usize) -> Self { self.opts = self.opts.with_max_pending_batches(n); self }

    // -------- Operations --------

    /// Create the tables for the configured strategy in the destination database.
    pub fn init_schema(&self) -> Result<()> {
        init_tracing_once();
        let store = Store::open(&self.opts.database, self.opts.busy_timeout)?;
        store.ensure_schema(self.opts.strategy)
    }

    /// Load one file under the configured strategy into the configured database.
    pub fn load_file(&self, path: &Path) -> FileOutcome {
        init_tracing_once();
        let pb = self.progress_bar(&[path.to_path_buf()]);
        let outcome = self.load_file_with_progress(path, pb.as_ref(), false);
        if let Some(pb) = pb {
            finish_load(&pb, 1, usize::from(!outcome.is_success()));
        }
        outcome
    }

    /// Load many files with at most `workers` in flight. Every file gets its own
    /// connection and transaction; outcomes come back in input order.
    pub fn load_files(&self, paths: &[PathBuf]) -> Result<Vec<FileOutcome>> {
        init_tracing_once();
        if paths.is_empty() {
            tracing::warn!("No input files given.");
            return Ok(Vec::new());
        }
        tracing::info!(files = paths.len(), workers = self.opts.workers, strategy = %self.opts.strategy, "planned files for loading");

        // Create the schema once up front so workers do not race on DDL.
        self.init_schema()?;

        let pb = self.progress_bar(paths);
        let outcomes =
            map_files_limited(paths, self.opts.workers, |path| self.load_file_with_progress(path, pb.as_ref(), true))?;

        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        if let Some(pb) = pb {
            finish_load(&pb, outcomes.len(), failed);
        }
        if failed > 0 {
            tracing::warn!(failed, total = outcomes.len(), "some files failed to load");
        }
        Ok(outcomes)
    }

    fn progress_bar(&self, paths: &[PathBuf]) -> Option<ProgressBar> {
        if !self.opts.progress {
            return None;
        }
        Some(load_progress_bar(paths, self.opts.strategy.as_str(), self.opts.progress_label.as_deref()))
    }

    fn load_file_with_progress(&self, path: &Path, pb: Option<&ProgressBar>, schema_ready: bool) -> FileOutcome {
        let started = Instant::now();
        let result = self.run_file(path, pb, schema_ready).map_err(LoadError::classify);
        let elapsed = started.elapsed();

        match &result {
            Ok(c) => tracing::info!(
                path = %path.display(),
                strategy = %self.opts.strategy,
                elapsed_ms = elapsed.as_millis() as u64,
                documents = c.documents,
                users = c.users,
                posts = c.posts,
                posts_skipped = c.posts_skipped,
                urls = c.urls,
                mentions = c.mentions,
                tags = c.tags,
                media = c.media,
                raw_documents = c.raw_documents,
                "file loaded"
            ),
            Err(e) => tracing::warn!(
                path = %path.display(),
                strategy = %self.opts.strategy,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %e,
                "file failed; transaction rolled back"
            ),
        }

        FileOutcome { path: path.to_path_buf(), strategy: self.opts.strategy, elapsed, result }
    }

    fn run_file(&self, path: &Path, pb: Option<&ProgressBar>, schema_ready: bool) -> Result<LoadCounts> {
        let store = Store::open(&self.opts.database, self.opts.busy_timeout)?;
        if !schema_ready {
            store.ensure_schema(self.opts.strategy)?;
        }

        let (counts, tx) = match self.opts.strategy {
            Strategy::Denormalized => self.load_denormalized(&store, path, pb)?,
            Strategy::Normalized => self.load_normalized(&store, path, pb, InsertMode::RowByRow)?,
            Strategy::NormalizedBatch => self.load_normalized(&store, path, pb, InsertMode::MultiRow)?,
        };

        tx.commit().with_context(|| format!("commit {}", path.display()))?;
        Ok(counts)
    }

    fn reader_options(&self) -> ReaderOptions {
        ReaderOptions { read_buffer_bytes: self.opts.read_buffer_bytes, log_every: self.opts.log_every }
    }

    fn write_queue<'c, B>(&self, store: &'c Store) -> WriteQueue<'c, B> {
        WriteQueue {
            tx: store.lazy_transaction(),
            pending: Vec::new(),
            max_pending: self.opts.max_pending_batches,
            low_memory_frac: self.opts.low_memory_frac,
        }
    }

    fn load_normalized<'c>(
        &self,
        store: &'c Store,
        path: &Path,
        pb: Option<&ProgressBar>,
        mode: InsertMode,
    ) -> Result<(LoadCounts, LazyTransaction<'c>)> {
        let mut loader = Loader::new(store.connection(), mode, self.opts.reference_policy);
        let mut dedup = PostDeduplicator::new(self.opts.seen_capacity);
        let mut acc = Accumulator::new(self.opts.batch_size).with_low_memory_threshold(self.opts.low_memory_frac);
        let mut queue = self.write_queue(store);

        let stats = for_each_document(path, &self.reader_options(), pb, |doc| {
            let mut rows = extract(&doc);
            dedup.admit(&mut rows);
            if let Some(batch) = acc.push(rows) {
                queue.push(batch, &mut |b| loader.write_batch(b))?;
            }
            Ok(())
        })?;
        if let Some(batch) = acc.finish() {
            queue.push(batch, &mut |b| loader.write_batch(b))?;
        }
        let tx = queue.finish(&mut |b| loader.write_batch(b))?;

        let mut counts = loader.finish()?;
        counts.documents = stats.documents;
        counts.malformed_lines = stats.malformed;
        counts.repeated_posts += dedup.dropped();
        Ok((counts, tx))
    }

    fn load_denormalized<'c>(
        &self,
        store: &'c Store,
        path: &Path,
        pb: Option<&ProgressBar>,
    ) -> Result<(LoadCounts, LazyTransaction<'c>)> {
        let mut loader = Loader::new(store.connection(), InsertMode::MultiRow, ReferencePolicy::Ignore);
        let mut acc = RawAccumulator::new(self.opts.batch_size);
        let mut queue = self.write_queue(store);

        let stats = for_each_document(path, &self.reader_options(), pb, |doc| {
            if let Some(docs) = acc.push(serde_json::to_string(&doc)?) {
                queue.push(docs, &mut |d: Vec<String>| loader.write_documents(&d))?;
            }
            Ok(())
        })?;
        if let Some(docs) = acc.finish() {
            queue.push(docs, &mut |d: Vec<String>| loader.write_documents(&d))?;
        }
        let tx = queue.finish(&mut |d: Vec<String>| loader.write_documents(&d))?;

        let mut counts = loader.finish()?;
        counts.documents = stats.documents;
        counts.malformed_lines = stats.malformed;
        Ok((counts, tx))
    }
}

/// Flushed batches waiting for the write lock. While another worker writes, this
/// file keeps decoding; once `max_pending` batches are queued or memory runs low
/// it blocks on the lock instead.
struct WriteQueue<'c, B> {
    tx: LazyTransaction<'c>,
    pending: Vec<B>,
    max_pending: usize,
    low_memory_frac: f64,
}

impl<'c, B> WriteQueue<'c, B> {
    fn push(&mut self, batch: B, write: &mut impl FnMut(B) -> Result<()>) -> Result<()> {
        self.pending.push(batch);
        if !self.tx.is_open() && !self.tx.try_begin()? {
            if self.pending.len() < self.max_pending && !is_low_memory(self.low_memory_frac) {
                return Ok(());
            }
            tracing::debug!(pending = self.pending.len(), "waiting for the write lock");
            self.tx.begin()?;
        }
        self.pending.drain(..).try_for_each(|b| write(b))
    }

    /// Write whatever is still queued and hand back the transaction, unopened if
    /// nothing was ever written.
    fn finish(mut self, write: &mut impl FnMut(B) -> Result<()>) -> Result<LazyTransaction<'c>> {
        if !self.pending.is_empty() {
            self.tx.begin()?;
            self.pending.drain(..).try_for_each(|b| write(b))?;
        }
        Ok(self.tx)
    }
}
