//! SQLite store: connection setup, schema creation and the read helpers used for
//! reporting and verification.

use crate::config::Strategy;
use crate::schema::{DENORMALIZED_DDL, NORMALIZED_DDL};
use anyhow::{Context, Result};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

/// Tables written by the loader.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Table {
    Users,
    Posts,
    PostUrls,
    PostMentions,
    PostTags,
    PostMedia,
    PostsJsonb,
}

impl Table {
    pub const ASSOCIATIONS: [Table; 4] = [Table::PostUrls, Table::PostMentions, Table::PostTags, Table::PostMedia];

    pub fn name(self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::Posts => "posts",
            Table::PostUrls => "post_urls",
            Table::PostMentions => "post_mentions",
            Table::PostTags => "post_tags",
            Table::PostMedia => "post_media",
            Table::PostsJsonb => "posts_jsonb",
        }
    }
}

/// One connection to the destination database. Each worker opens its own.
pub struct Store {
    conn: Connection,
    busy_timeout: Duration,
}

impl Store {
    /// Open (or create) the database file. `busy_timeout` bounds each wait on
    /// another connection's lock.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path).with_context(|| format!("open database {}", path.display()))?;
        conn.busy_timeout(busy_timeout)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .with_context(|| format!("enable WAL on {}", path.display()))?;
        conn.execute_batch(
            "
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            ",
        )
        .with_context(|| format!("configure database {}", path.display()))?;
        Ok(Self { conn, busy_timeout })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn, busy_timeout: Duration::from_secs(5) })
    }

    /// Create the tables (and views) the strategy writes to. Idempotent.
    pub fn ensure_schema(&self, strategy: Strategy) -> Result<()> {
        let ddl = if strategy.is_normalized() { NORMALIZED_DDL } else { DENORMALIZED_DDL };
        self.conn
            .execute_batch(ddl)
            .with_context(|| format!("create schema for {strategy}"))
    }

    /// Start a write transaction now, holding the write lock until commit or drop.
    pub fn begin(&mut self) -> Result<Transaction<'_>> {
        Ok(self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    /// A write transaction that is only started once there is something to write.
    pub fn lazy_transaction(&self) -> LazyTransaction<'_> {
        LazyTransaction { conn: &self.conn, busy_timeout: self.busy_timeout, tx: None }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn count(&self, table: Table) -> Result<u64> {
        let sql = format!("SELECT count(*) FROM {}", table.name());
        let n: i64 = self.conn.query_row(&sql, [], |r| r.get(0))?;
        Ok(n as u64)
    }

    pub fn distinct_users(&self) -> Result<u64> {
        let n: i64 = self.conn.query_row("SELECT count(DISTINCT id_users) FROM users", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    /// Association rows whose post id has no `posts` row. Zero after any committed load.
    pub fn orphan_associations(&self) -> Result<u64> {
        let mut total = 0u64;
        for table in Table::ASSOCIATIONS {
            let sql = format!(
                "SELECT count(*) FROM {} a WHERE NOT EXISTS (SELECT 1 FROM posts p WHERE p.id_posts = a.id_posts)",
                table.name()
            );
            let n: i64 = self.conn.query_row(&sql, [], |r| r.get(0))?;
            total += n as u64;
        }
        Ok(total)
    }

    /// `Some(geo)` when the post exists; the inner value is the stored WKT or NULL.
    pub fn post_geometry(&self, id_posts: i64) -> Result<Option<Option<String>>> {
        Ok(self
            .conn
            .query_row("SELECT geo FROM posts WHERE id_posts = ?1", params![id_posts], |r| r.get(0))
            .optional()?)
    }

    /// Most used tags, ties broken alphabetically.
    pub fn tag_frequency(&self, limit: usize) -> Result<Vec<(String, u64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT tag, count FROM tag_frequency ORDER BY count DESC, tag LIMIT ?1")?;
        let rows = stmt
            .query_map(params![limit as i64], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? as u64)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Most frequent tag pairs appearing on the same post.
    pub fn tag_cooccurrence(&self, limit: usize) -> Result<Vec<(String, String, u64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT tag1, tag2, count FROM tag_cooccurrence ORDER BY count DESC, tag1, tag2 LIMIT ?1")?;
        let rows = stmt
            .query_map(params![limit as i64], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, i64>(2)? as u64))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(err.sqlite_error_code(), Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked))
}

/// One file's write transaction, opened on first use.
///
/// SQLite admits a single writer. Taking the lock late lets a worker decode and
/// extract its file while another worker commits; nothing has been written before
/// the lock is held, so waiting past `busy_timeout` is retried rather than failing.
pub struct LazyTransaction<'c> {
    conn: &'c Connection,
    busy_timeout: Duration,
    tx: Option<Transaction<'c>>,
}

impl<'c> LazyTransaction<'c> {
    pub fn is_open(&self) -> bool {
        self.tx.is_some()
    }

    /// Take the write lock if it is free right now. `Ok(false)` when another writer holds it.
    pub fn try_begin(&mut self) -> Result<bool> {
        if self.tx.is_some() {
            return Ok(true);
        }
        self.conn.busy_timeout(Duration::ZERO)?;
        let attempt = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate);
        self.conn.busy_timeout(self.busy_timeout)?;
        match attempt {
            Ok(tx) => {
                self.tx = Some(tx);
                Ok(true)
            }
            Err(e) if is_busy(&e) => Ok(false),
            Err(e) => Err(anyhow::Error::new(e).context("begin write transaction")),
        }
    }

    /// Wait for the write lock, however long the current writer keeps it.
    pub fn begin(&mut self) -> Result<()> {
        let mut waits = 0u32;
        while self.tx.is_none() {
            match Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate) {
                Ok(tx) => self.tx = Some(tx),
                Err(e) if is_busy(&e) => {
                    waits += 1;
                    tracing::debug!(waits, "write lock held by another writer");
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => return Err(anyhow::Error::new(e).context("begin write transaction")),
            }
        }
        Ok(())
    }

    /// Commit if anything was written. Dropping instead rolls back.
    pub fn commit(self) -> Result<()> {
        match self.tx {
            Some(tx) => Ok(tx.commit()?),
            None => Ok(()),
        }
    }
}
