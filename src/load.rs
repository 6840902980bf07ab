//! Loader: write batches into the store in dependency order.
//!
//! Users go first, then posts, then the four association tables. Posts are inserted
//! with `ON CONFLICT DO NOTHING RETURNING id_posts`, so an already-loaded post is
//! skipped without failing its siblings, and only the associations of posts that were
//! actually inserted are written.

use crate::config::ReferencePolicy;
use crate::error::LoadError;
use crate::rows::{PostMedia, PostMention, PostRow, PostTag, PostUrl, UserRow};
use crate::batch::Batch;
use ahash::{AHashMap, AHashSet};
use anyhow::{Context, Result};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;

/// Statement shape used for normalized rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertMode {
    /// One prepared INSERT per row.
    RowByRow,
    /// One multi-row INSERT per entity type, split only at the bind-parameter limit.
    MultiRow,
}

/// SQLite's default cap on bound parameters in one statement.
const MAX_BIND_PARAMS: usize = 32_766;

/// Rows written (or skipped) for one file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LoadCounts {
    pub documents: u64,
    pub malformed_lines: u64,
    pub repeated_posts: u64,
    pub batches: u64,
    pub users: u64,
    pub posts: u64,
    pub posts_skipped: u64,
    pub urls: u64,
    pub mentions: u64,
    pub tags: u64,
    pub media: u64,
    pub raw_documents: u64,
}

trait SqlRow {
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];
    fn bind(&self, out: &mut Vec<SqlValue>);
}

fn text(v: &Option<String>) -> SqlValue {
    v.clone().map_or(SqlValue::Null, SqlValue::Text)
}

fn int(v: Option<i64>) -> SqlValue {
    v.map_or(SqlValue::Null, SqlValue::Integer)
}

fn flag(v: Option<bool>) -> SqlValue {
    v.map_or(SqlValue::Null, |b| SqlValue::Integer(b as i64))
}

/// Country lists are stored as JSON arrays; an absent list stays NULL, an empty one is `[]`.
fn json_list(v: &Option<Vec<String>>) -> SqlValue {
    match v {
        Some(items) => serde_json::to_string(items).map_or(SqlValue::Null, SqlValue::Text),
        None => SqlValue::Null,
    }
}

impl SqlRow for UserRow {
    const TABLE: &'static str = "users";
    const COLUMNS: &'static [&'static str] = &[
        "id_users", "created_at", "updated_at", "url", "friends_count", "listed_count",
        "favourites_count", "statuses_count", "protected", "verified", "screen_name", "name",
        "location", "description", "withheld_in_countries",
    ];
    fn bind(&self, out: &mut Vec<SqlValue>) {
        out.extend([
            SqlValue::Integer(self.id_users),
            text(&self.created_at),
            text(&self.updated_at),
            text(&self.url),
            int(self.friends_count),
            int(self.listed_count),
            int(self.favourites_count),
            int(self.statuses_count),
            flag(self.protected),
            flag(self.verified),
            text(&self.screen_name),
            text(&self.name),
            text(&self.location),
            text(&self.description),
            json_list(&self.withheld_in_countries),
        ]);
    }
}

impl SqlRow for PostRow {
    const TABLE: &'static str = "posts";
    const COLUMNS: &'static [&'static str] = &[
        "id_posts", "id_users", "created_at", "in_reply_to_status_id", "in_reply_to_user_id",
        "quoted_status_id", "geo", "retweet_count", "quote_count", "favorite_count",
        "withheld_copyright", "withheld_in_countries", "source", "text", "country_code",
        "state_code", "lang", "place_name",
    ];
    fn bind(&self, out: &mut Vec<SqlValue>) {
        out.extend([
            SqlValue::Integer(self.id_posts),
            int(self.id_users),
            text(&self.created_at),
            int(self.in_reply_to_status_id),
            int(self.in_reply_to_user_id),
            int(self.quoted_status_id),
            self.geo.as_ref().map_or(SqlValue::Null, |g| SqlValue::Text(g.to_wkt())),
            int(self.retweet_count),
            int(self.quote_count),
            int(self.favorite_count),
            flag(self.withheld_copyright),
            json_list(&self.withheld_in_countries),
            text(&self.source),
            text(&self.text),
            text(&self.country_code),
            text(&self.state_code),
            text(&self.lang),
            text(&self.place_name),
        ]);
    }
}

impl SqlRow for PostUrl {
    const TABLE: &'static str = "post_urls";
    const COLUMNS: &'static [&'static str] = &["id_posts", "url"];
    fn bind(&self, out: &mut Vec<SqlValue>) {
        out.extend([SqlValue::Integer(self.id_posts), SqlValue::Text(self.url.clone())]);
    }
}

impl SqlRow for PostMention {
    const TABLE: &'static str = "post_mentions";
    const COLUMNS: &'static [&'static str] = &["id_posts", "id_users"];
    fn bind(&self, out: &mut Vec<SqlValue>) {
        out.extend([SqlValue::Integer(self.id_posts), SqlValue::Integer(self.id_users)]);
    }
}

impl SqlRow for PostTag {
    const TABLE: &'static str = "post_tags";
    const COLUMNS: &'static [&'static str] = &["id_posts", "tag"];
    fn bind(&self, out: &mut Vec<SqlValue>) {
        out.extend([SqlValue::Integer(self.id_posts), SqlValue::Text(self.tag.clone())]);
    }
}

impl SqlRow for PostMedia {
    const TABLE: &'static str = "post_media";
    const COLUMNS: &'static [&'static str] = &["id_posts", "url", "type"];
    fn bind(&self, out: &mut Vec<SqlValue>) {
        out.extend([SqlValue::Integer(self.id_posts), SqlValue::Text(self.url.clone()), text(&self.media_type)]);
    }
}

/// A whole document for the denormalized table.
struct RawDocument<'a>(&'a str);

impl SqlRow for RawDocument<'_> {
    const TABLE: &'static str = "posts_jsonb";
    const COLUMNS: &'static [&'static str] = &["data"];
    fn bind(&self, out: &mut Vec<SqlValue>) {
        out.push(SqlValue::Text(self.0.to_string()));
    }
}

fn insert_sql(table: &str, columns: &[&str], rows: usize, tail: &str) -> String {
    let tuple = format!("({})", vec!["?"; columns.len()].join(", "));
    format!(
        "INSERT INTO {table} ({}) VALUES {}{tail}",
        columns.join(", "),
        vec![tuple; rows].join(", ")
    )
}

fn rows_per_statement(columns: usize) -> usize {
    (MAX_BIND_PARAMS / columns.max(1)).max(1)
}

/// Append rows to a table with no uniqueness constraint. Returns rows written.
fn append_rows<R: SqlRow>(conn: &Connection, rows: &[R], mode: InsertMode) -> Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }
    let mut vals: Vec<SqlValue> = Vec::new();
    let mut written = 0u64;
    match mode {
        InsertMode::RowByRow => {
            let mut stmt = conn.prepare_cached(&insert_sql(R::TABLE, R::COLUMNS, 1, ""))?;
            for row in rows {
                vals.clear();
                row.bind(&mut vals);
                written += stmt.execute(params_from_iter(vals.iter()))? as u64;
            }
        }
        InsertMode::MultiRow => {
            for chunk in rows.chunks(rows_per_statement(R::COLUMNS.len())) {
                vals.clear();
                chunk.iter().for_each(|r| r.bind(&mut vals));
                let mut stmt = conn.prepare_cached(&insert_sql(R::TABLE, R::COLUMNS, chunk.len(), ""))?;
                written += stmt.execute(params_from_iter(vals.iter()))? as u64;
            }
        }
    }
    Ok(written)
}

/// Insert posts, skipping ids already present. Returns the ids actually inserted.
fn insert_posts(conn: &Connection, posts: &[PostRow], mode: InsertMode) -> Result<Vec<i64>> {
    const TAIL: &str = " ON CONFLICT (id_posts) DO NOTHING RETURNING id_posts";
    let mut inserted = Vec::with_capacity(posts.len());
    if posts.is_empty() {
        return Ok(inserted);
    }
    let mut vals: Vec<SqlValue> = Vec::new();
    match mode {
        InsertMode::RowByRow => {
            let mut stmt = conn.prepare_cached(&insert_sql(PostRow::TABLE, PostRow::COLUMNS, 1, TAIL))?;
            for post in posts {
                vals.clear();
                post.bind(&mut vals);
                if let Some(id) = stmt.query_row(params_from_iter(vals.iter()), |r| r.get::<_, i64>(0)).optional()? {
                    inserted.push(id);
                }
            }
        }
        InsertMode::MultiRow => {
            for chunk in posts.chunks(rows_per_statement(PostRow::COLUMNS.len())) {
                vals.clear();
                chunk.iter().for_each(|p| p.bind(&mut vals));
                let mut stmt = conn.prepare_cached(&insert_sql(PostRow::TABLE, PostRow::COLUMNS, chunk.len(), TAIL))?;
                let ids = stmt
                    .query_map(params_from_iter(vals.iter()), |r| r.get::<_, i64>(0))?
                    .collect::<rusqlite::Result<Vec<i64>>>()?;
                inserted.extend(ids);
            }
        }
    }
    Ok(inserted)
}

/// Writes batches into one open transaction and validates deferred references at the end.
pub struct Loader<'c> {
    conn: &'c Connection,
    mode: InsertMode,
    policy: ReferencePolicy,
    loaded_posts: AHashSet<i64>,
    pending_refs: AHashMap<i64, i64>, // referenced post -> first referencing post
    counts: LoadCounts,
}

impl<'c> Loader<'c> {
    /// `conn` is normally a `rusqlite::Transaction`; nothing here commits.
    pub fn new(conn: &'c Connection, mode: InsertMode, policy: ReferencePolicy) -> Self {
        Self {
            conn,
            mode,
            policy,
            loaded_posts: AHashSet::new(),
            pending_refs: AHashMap::new(),
            counts: LoadCounts::default(),
        }
    }

    pub fn counts(&self) -> &LoadCounts {
        &self.counts
    }

    /// Write one batch. Post ids are expected to be unique within it (`Batch::push`
    /// guarantees that); skipped posts lose their association rows by id.
    pub fn write_batch(&mut self, mut batch: Batch) -> Result<()> {
        self.counts.repeated_posts += batch.repeated_posts();
        self.counts.users += append_rows(self.conn, &batch.users, self.mode).context("insert users")?;

        let inserted = insert_posts(self.conn, &batch.posts, self.mode).context("insert posts")?;
        let skipped = (batch.posts.len() - inserted.len()) as u64;
        self.counts.posts += inserted.len() as u64;
        self.counts.posts_skipped += skipped;

        if skipped > 0 {
            let kept: AHashSet<i64> = inserted.iter().copied().collect();
            tracing::debug!(skipped, "posts already in store; dropping their associations");
            batch.urls.retain(|r| kept.contains(&r.id_posts));
            batch.mentions.retain(|r| kept.contains(&r.id_posts));
            batch.tags.retain(|r| kept.contains(&r.id_posts));
            batch.media.retain(|r| kept.contains(&r.id_posts));
        }

        if self.policy == ReferencePolicy::Enforce {
            let kept: AHashSet<i64> = inserted.iter().copied().collect();
            for post in batch.posts.iter().filter(|p| kept.contains(&p.id_posts)) {
                for target in post.referenced_posts() {
                    self.pending_refs.entry(target).or_insert(post.id_posts);
                }
            }
            self.loaded_posts.extend(inserted);
        }

        self.counts.urls += append_rows(self.conn, &batch.urls, self.mode).context("insert post_urls")?;
        self.counts.mentions += append_rows(self.conn, &batch.mentions, self.mode).context("insert post_mentions")?;
        self.counts.tags += append_rows(self.conn, &batch.tags, self.mode).context("insert post_tags")?;
        self.counts.media += append_rows(self.conn, &batch.media, self.mode).context("insert post_media")?;
        self.counts.batches += 1;
        Ok(())
    }

    /// Denormalized strategy: store documents verbatim.
    pub fn write_documents(&mut self, docs: &[String]) -> Result<()> {
        let rows: Vec<RawDocument<'_>> = docs.iter().map(|d| RawDocument(d)).collect();
        self.counts.raw_documents += append_rows(self.conn, &rows, self.mode).context("insert posts_jsonb")?;
        self.counts.batches += 1;
        Ok(())
    }

    /// Check every recorded reference against the posts of this transaction and the
    /// posts already committed. Call right before committing.
    pub fn finish(self) -> Result<LoadCounts> {
        let Loader { conn, policy, loaded_posts, pending_refs, counts, .. } = self;
        if policy == ReferencePolicy::Enforce && !pending_refs.is_empty() {
            let mut stmt = conn.prepare_cached("SELECT EXISTS (SELECT 1 FROM posts WHERE id_posts = ?1)")?;
            let mut pending: Vec<(i64, i64)> = pending_refs.into_iter().collect();
            pending.sort_unstable();
            tracing::debug!(references = pending.len(), "validating deferred post references");
            for (referenced_id, post_id) in pending {
                if loaded_posts.contains(&referenced_id) {
                    continue;
                }
                let exists: bool = stmt.query_row(params![referenced_id], |r| r.get(0))?;
                if !exists {
                    return Err(LoadError::UnresolvedReference { post_id, referenced_id }.into());
                }
            }
        }
        Ok(counts)
    }
}
