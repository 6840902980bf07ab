//! Concurrency helper: a bounded pool of workers pulling input files.

use anyhow::{Context, Result};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// Run `f` once per file with at most `limit` files in flight and return the results
/// in input order. Each call is independent; a failing file does not stop the others.
pub fn map_files_limited<T, F>(files: &[PathBuf], limit: usize, f: F) -> Result<Vec<T>>
where
    T: Send,
    F: Sync + Fn(&Path) -> T,
{
    if limit <= 1 || files.len() <= 1 {
        return Ok(files.iter().map(|p| f(p)).collect());
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(limit.min(files.len()))
        .thread_name(|i| format!("tweetload-worker-{i}"))
        .build()
        .context("build worker pool")?;
    Ok(pool.install(|| files.par_iter().with_max_len(1).map(|p| f(p)).collect()))
}
