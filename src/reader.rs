//! Record reader: stream newline-delimited post documents out of `.zst`, `.zip`
//! or plain archives, sanitizing bytes before JSON parsing.

use crate::error::LoadError;
use crate::util::open_with_backoff;
use anyhow::Result;
use indicatif::ProgressBar;
use serde_json::Value;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use zstd::stream::read::Decoder;

/// Container/compression of an input archive, chosen by file extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveKind {
    Zstd,
    Zip,
    Plain,
}

impl ArchiveKind {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()) {
            Some(ext) if ext == "zst" || ext == "zstd" => ArchiveKind::Zstd,
            Some(ext) if ext == "zip" => ArchiveKind::Zip,
            _ => ArchiveKind::Plain,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ReaderOptions {
    pub read_buffer_bytes: usize,
    /// Emit an info log every N documents (0 disables).
    pub log_every: u64,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self { read_buffer_bytes: 256 * 1024, log_every: 0 }
    }
}

/// Per-file line accounting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadStats {
    pub lines: u64,
    pub documents: u64,
    pub malformed: u64,
}

/// Counts compressed bytes pulled from the file so progress tracks the archive size.
struct CountingReader<R> {
    inner: R,
    counter: Arc<AtomicU64>,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.counter.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

impl<R: Seek> Seek for CountingReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

struct Progress<'a> {
    pb: Option<&'a ProgressBar>,
    counter: Arc<AtomicU64>,
    last: u64,
}

impl Progress<'_> {
    #[inline]
    fn tick(&mut self) {
        if let Some(pb) = self.pb {
            let cur = self.counter.load(Ordering::Relaxed);
            if cur > self.last {
                pb.inc(cur - self.last);
                self.last = cur;
            }
        }
    }
}

fn archive_error(path: &Path, e: impl std::fmt::Display) -> anyhow::Error {
    LoadError::Archive { path: path.to_path_buf(), message: e.to_string() }.into()
}

/// Remove NUL bytes and decode as UTF-8, substituting U+FFFD for invalid sequences.
pub fn sanitize_line(raw: &mut Vec<u8>) -> String {
    while matches!(raw.last(), Some(b'\n') | Some(b'\r')) {
        raw.pop();
    }
    raw.retain(|&b| b != 0);
    String::from_utf8_lossy(raw).into_owned()
}

/// Strip NUL characters from every string in a parsed document.
/// JSON `\u0000` escapes survive byte-level sanitizing and the store cannot hold them.
pub fn scrub_nulls(v: &mut Value) {
    match v {
        Value::String(s) => {
            if s.contains('\0') {
                s.retain(|c| c != '\0');
            }
        }
        Value::Array(items) => items.iter_mut().for_each(scrub_nulls),
        Value::Object(map) => map.values_mut().for_each(scrub_nulls),
        _ => {}
    }
}

/// Stream every post document of an archive into `on_doc`.
///
/// Malformed lines are skipped with a warning. Failures to open or decompress the
/// archive surface as `LoadError::Archive`; errors returned by `on_doc` propagate
/// unchanged. Nothing is buffered beyond the current line, so archives of any size stream.
pub fn for_each_document(
    path: &Path,
    opts: &ReaderOptions,
    pb: Option<&ProgressBar>,
    mut on_doc: impl FnMut(Value) -> Result<()>,
) -> Result<ReadStats> {
    let file = open_with_backoff(path, 16, 50).map_err(|e| archive_error(path, e))?;
    let counter = Arc::new(AtomicU64::new(0));
    let counting = CountingReader { inner: file, counter: counter.clone() };
    let mut progress = Progress { pb, counter, last: 0 };
    let mut stats = ReadStats::default();
    let cap = opts.read_buffer_bytes.max(8 * 1024);

    match ArchiveKind::from_path(path) {
        ArchiveKind::Zstd => {
            let mut decoder = Decoder::new(counting).map_err(|e| archive_error(path, e))?;
            decoder.window_log_max(31).map_err(|e| archive_error(path, e))?;
            let reader = BufReader::with_capacity(cap, decoder);
            stream_lines(path, reader, opts, &mut stats, &mut progress, &mut on_doc)?;
        }
        ArchiveKind::Zip => {
            let mut archive = zip::ZipArchive::new(counting).map_err(|e| archive_error(path, e))?;
            let mut names: Vec<String> = archive.file_names().map(str::to_owned).collect();
            names.sort_unstable_by(|a, b| b.cmp(a));
            for name in names {
                let entry = archive.by_name(&name).map_err(|e| archive_error(path, format!("{name}: {e}")))?;
                if entry.is_dir() {
                    continue;
                }
                tracing::debug!(archive = %path.display(), entry = %name, "reading zip entry");
                let reader = BufReader::with_capacity(cap, entry);
                stream_lines(path, reader, opts, &mut stats, &mut progress, &mut on_doc)?;
            }
        }
        ArchiveKind::Plain => {
            let reader = BufReader::with_capacity(cap, counting);
            stream_lines(path, reader, opts, &mut stats, &mut progress, &mut on_doc)?;
        }
    }

    progress.tick();
    Ok(stats)
}

fn stream_lines<R: BufRead>(
    path: &Path,
    mut reader: R,
    opts: &ReaderOptions,
    stats: &mut ReadStats,
    progress: &mut Progress<'_>,
    on_doc: &mut impl FnMut(Value) -> Result<()>,
) -> Result<()> {
    let mut raw = Vec::with_capacity(16 * 1024);
    loop {
        raw.clear();
        let n = reader.read_until(b'\n', &mut raw).map_err(|e| archive_error(path, e))?;
        if n == 0 {
            break;
        }
        stats.lines += 1;
        progress.tick();

        let line = sanitize_line(&mut raw);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut doc: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                stats.malformed += 1;
                tracing::warn!(path = %path.display(), line = stats.lines, error = %e, "skipping malformed line");
                continue;
            }
        };
        scrub_nulls(&mut doc);
        stats.documents += 1;
        if opts.log_every > 0 && stats.documents % opts.log_every == 0 {
            let id = doc.get("id").and_then(serde_json::Value::as_i64);
            tracing::info!(path = %path.display(), documents = stats.documents, id = ?id, "reading");
        }
        on_doc(doc)?;
    }
    Ok(())
}
