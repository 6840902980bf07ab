//! Batch accumulator: per-entity-type row buffers handed to the loader in bounded chunks.

use crate::memory::is_low_memory;
use crate::rows::{Extracted, PostMedia, PostMention, PostRow, PostTag, PostUrl, UserRow};
use ahash::AHashSet;

/// Rows of every entity type, written together in dependency order.
///
/// Post ids are unique within a batch: association rows are matched to their post
/// by id alone, so a second copy of a post is dropped with its associations on `push`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Batch {
    pub users: Vec<UserRow>,
    pub posts: Vec<PostRow>,
    pub urls: Vec<PostUrl>,
    pub mentions: Vec<PostMention>,
    pub tags: Vec<PostTag>,
    pub media: Vec<PostMedia>,
    post_ids: AHashSet<i64>,
    repeated: u64,
}

impl Batch {
    /// Add one document's rows. Returns false when its post was already in the batch
    /// (the user rows are still kept).
    pub fn push(&mut self, mut rows: Extracted) -> bool {
        let fresh = match rows.post_id() {
            Some(id) => self.post_ids.insert(id),
            None => true,
        };
        if !fresh {
            rows.drop_post();
            self.repeated += 1;
        }
        self.users.extend(rows.users);
        self.posts.extend(rows.post);
        self.urls.extend(rows.urls);
        self.mentions.extend(rows.mentions);
        self.tags.extend(rows.tags);
        self.media.extend(rows.media);
        fresh
    }

    /// Posts dropped by `push` because the batch already held their id.
    pub fn repeated_posts(&self) -> u64 {
        self.repeated
    }

    /// Size of the fullest per-type buffer.
    pub fn largest_buffer(&self) -> usize {
        [
            self.users.len(),
            self.posts.len(),
            self.urls.len(),
            self.mentions.len(),
            self.tags.len(),
            self.media.len(),
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }

    pub fn row_count(&self) -> usize {
        self.users.len() + self.posts.len() + self.urls.len() + self.mentions.len() + self.tags.len() + self.media.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }
}

/// Buffers extracted rows until any entity type reaches `threshold` rows, then hands
/// out the whole batch so posts always travel with the rows that reference them.
#[derive(Debug)]
pub struct Accumulator {
    batch: Batch,
    threshold: usize,
    low_memory_frac: f64,
    flushed: u64,
}

impl Accumulator {
    pub fn new(threshold: usize) -> Self {
        Self { batch: Batch::default(), threshold: threshold.max(1), low_memory_frac: 0.0, flushed: 0 }
    }

    /// Also flush early whenever available memory drops below `frac` (0.0 disables).
    pub fn with_low_memory_threshold(mut self, frac: f64) -> Self {
        self.low_memory_frac = frac;
        self
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Number of batches handed out so far.
    pub fn flushed(&self) -> u64 {
        self.flushed
    }

    pub fn push(&mut self, rows: Extracted) -> Option<Batch> {
        if !self.batch.push(rows) {
            tracing::debug!("post repeated within one batch; dropping the later copy");
        }
        let full = self.batch.largest_buffer() >= self.threshold;
        if full || (!self.batch.is_empty() && is_low_memory(self.low_memory_frac)) {
            if !full {
                tracing::debug!(rows = self.batch.row_count(), "low memory, flushing batch early");
            }
            return self.take();
        }
        None
    }

    /// Final partial flush once the input is exhausted.
    pub fn finish(mut self) -> Option<Batch> {
        self.take()
    }

    fn take(&mut self) -> Option<Batch> {
        if self.batch.is_empty() {
            return None;
        }
        self.flushed += 1;
        Some(std::mem::take(&mut self.batch))
    }
}

/// Same contract as `Accumulator`, for whole documents of the denormalized strategy.
#[derive(Debug)]
pub struct RawAccumulator {
    docs: Vec<String>,
    threshold: usize,
}

impl RawAccumulator {
    pub fn new(threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self { docs: Vec::with_capacity(threshold.min(64 * 1024)), threshold }
    }

    pub fn push(&mut self, doc: String) -> Option<Vec<String>> {
        self.docs.push(doc);
        if self.docs.len() >= self.threshold {
            return Some(std::mem::take(&mut self.docs));
        }
        None
    }

    pub fn finish(self) -> Option<Vec<String>> {
        if self.docs.is_empty() { None } else { Some(self.docs) }
    }
}
