//! Load progress: one byte-based bar over the compressed size of every input file.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

static GLOBAL_MP: OnceLock<Arc<MultiProgress>> = OnceLock::new();

/// Draw load bars inside `mp` (for callers that render their own bars too).
/// Only the first call has an effect.
pub fn set_global_multiprogress(mp: Arc<MultiProgress>) {
    let _ = GLOBAL_MP.set(mp);
}

/// Compressed size of the given inputs; unreadable files count as zero.
pub fn total_input_size(paths: &[PathBuf]) -> u64 {
    paths.iter().map(|p| fs::metadata(p).map(|m| m.len()).unwrap_or(0)).sum()
}

/// Bar sized to the inputs, labelled with the strategy (or `label` when given).
pub fn load_progress_bar(paths: &[PathBuf], strategy: &str, label: Option<&str>) -> ProgressBar {
    let total = total_input_size(paths);
    let pb = match GLOBAL_MP.get() {
        Some(mp) => mp.add(ProgressBar::new(total)),
        None => ProgressBar::new(total),
    };
    let style = ProgressStyle::with_template(
        "{spinner:.green} {prefix} {msg} {bytes:>10}/{total_bytes:<10} [{bar:.cyan/blue}] {percent:>3}%  \
         {binary_bytes_per_sec}  eta: {eta_precise}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉▊▋▌▍▎▏  ");
    pb.set_style(style);
    pb.set_prefix(label.unwrap_or(strategy).to_string());
    pb.set_message(format!("{} file(s)", paths.len()));
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

pub fn finish_load(pb: &ProgressBar, files: usize, failed: usize) {
    if failed == 0 {
        pb.finish_with_message(format!("{files} file(s) loaded"));
    } else {
        pb.abandon_with_message(format!("{} of {files} file(s) failed", failed));
    }
}
