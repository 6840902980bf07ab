mod config;
mod error;
mod util;
mod memory;
mod progress;
mod concurrency;

mod reader;
mod rows;
mod extract;
mod dedupe;
mod batch;
mod schema;
mod store;
mod load;
mod pipeline;

pub use crate::config::{LoadOptions, ReferencePolicy, Strategy};
pub use crate::error::LoadError;
pub use crate::pipeline::{FileOutcome, TweetLoader};

// Pipeline stages, usable on their own.
pub use crate::reader::{for_each_document, sanitize_line, scrub_nulls, ArchiveKind, ReadStats, ReaderOptions};
pub use crate::rows::{Extracted, Geometry, PostMedia, PostMention, PostRow, PostTag, PostUrl, UserRow};
pub use crate::extract::{extract, geometry_of, normalize_timestamp};
pub use crate::dedupe::PostDeduplicator;
pub use crate::batch::{Accumulator, Batch, RawAccumulator};
pub use crate::load::{InsertMode, LoadCounts, Loader};

// Store access for setup and verification.
pub use crate::store::{LazyTransaction, Store, Table};
pub use crate::schema::{DENORMALIZED_DDL, NORMALIZED_DDL};

// Expose progress and tracing helpers to binaries.
pub use crate::progress::set_global_multiprogress;
pub use crate::util::init_tracing_once;
