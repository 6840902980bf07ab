use crate::rows::Extracted;
use ahash::AHashSet;

/// Per-run memory of the Post ids already handed to the loader.
///
/// A repeated post is dropped together with its association rows; user rows always
/// pass through. With a capacity the ids live in two generations of at most
/// `capacity / 2` each and the older generation is discarded when the newer one fills.
/// Forgetting an id only lets a duplicate reach the store, where the primary key skips
/// it, so new posts are never lost.
#[derive(Debug, Default)]
pub struct PostDeduplicator {
    current: AHashSet<i64>,
    previous: AHashSet<i64>,
    generation_cap: Option<usize>,
    dropped: u64,
}

impl PostDeduplicator {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            generation_cap: capacity.map(|c| (c / 2).max(1)),
            ..Default::default()
        }
    }

    pub fn contains(&self, id: i64) -> bool {
        self.current.contains(&id) || self.previous.contains(&id)
    }

    /// Record `id`; returns true when it had not been seen (or was forgotten).
    pub fn observe(&mut self, id: i64) -> bool {
        if self.contains(id) {
            return false;
        }
        if let Some(cap) = self.generation_cap {
            if self.current.len() >= cap {
                tracing::debug!(retained = self.current.len(), "rotating seen-post generation");
                self.previous = std::mem::take(&mut self.current);
            }
        }
        self.current.insert(id);
        true
    }

    /// Drop the post part of `rows` if its id was already emitted in this run.
    /// Returns false when the post was dropped.
    pub fn admit(&mut self, rows: &mut Extracted) -> bool {
        match rows.post_id() {
            Some(id) if !self.observe(id) => {
                rows.drop_post();
                self.dropped += 1;
                false
            }
            _ => true,
        }
    }

    /// Number of posts dropped as repeats so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Ids currently remembered.
    pub fn len(&self) -> usize {
        self.current.len() + self.previous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
