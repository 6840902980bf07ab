#![allow(dead_code)]

use rusqlite::Connection;
use serde_json::{json, Value};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temp directory that lives as long as the test holds it.
pub struct Workspace {
    _dir: TempDir,
    pub root: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        Self { _dir: dir, root }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn db(&self) -> PathBuf {
        self.root.join("tweets.sqlite")
    }
}

/// Write a compressed `.zst` archive with one document per line.
pub fn write_zst_lines(path: &Path, lines: &[String]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let f = File::create(path).unwrap();
    let mut enc = zstd::stream::write::Encoder::new(f, 3).unwrap();
    for l in lines {
        writeln!(&mut enc, "{}", l).unwrap();
    }
    enc.finish().unwrap();
}

/// Write a `.zip` archive with one JSONL entry per `(name, lines)` pair.
pub fn write_zip(path: &Path, entries: &[(&str, Vec<String>)]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let f = File::create(path).unwrap();
    let mut zw = zip::ZipWriter::new(f);
    let opts = zip::write::SimpleFileOptions::default();
    for (name, lines) in entries {
        zw.start_file(*name, opts).unwrap();
        for l in lines {
            writeln!(&mut zw, "{}", l).unwrap();
        }
    }
    zw.finish().unwrap();
}

/// Write raw bytes as a plain `.jsonl` file.
pub fn write_plain(path: &Path, bytes: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, bytes).unwrap();
}

pub fn lines(docs: &[Value]) -> Vec<String> {
    docs.iter().map(|d| d.to_string()).collect()
}

/// A complete tweet by `user_id`, carrying one url, `#rust` and `$TSLA`.
pub fn tweet(id: i64, user_id: i64) -> Value {
    json!({
        "id": id,
        "id_str": id.to_string(),
        "created_at": "Wed Oct 10 20:19:24 +0000 2018",
        "text": format!("tweet number {id} #rust $TSLA"),
        "lang": "en",
        "source": "<a href=\"https://example.com\">web</a>",
        "retweet_count": 1,
        "favorite_count": 2,
        "quote_count": 0,
        "in_reply_to_status_id": null,
        "in_reply_to_user_id": null,
        "quoted_status_id": null,
        "geo": null,
        "place": null,
        "user": {
            "id": user_id,
            "created_at": "Mon Jan 02 03:04:05 +0000 2012",
            "screen_name": format!("user{user_id}"),
            "name": format!("User {user_id}"),
            "location": null,
            "description": "just testing",
            "url": null,
            "protected": false,
            "verified": false,
            "friends_count": 10,
            "listed_count": 0,
            "favourites_count": 5,
            "statuses_count": 100
        },
        "entities": {
            "urls": [{ "expanded_url": format!("https://example.com/{id}") }],
            "user_mentions": [],
            "hashtags": [{ "text": "rust" }],
            "symbols": [{ "text": "TSLA" }]
        }
    })
}

/// `tweet` plus a mention of `mentioned`.
pub fn tweet_mentioning(id: i64, user_id: i64, mentioned: i64) -> Value {
    let mut t = tweet(id, user_id);
    t["entities"]["user_mentions"] = json!([
        { "id": mentioned, "screen_name": format!("user{mentioned}"), "name": format!("User {mentioned}") }
    ]);
    t
}

/// `tweet` replying to post `target` written by `target_user`.
pub fn reply(id: i64, user_id: i64, target: i64, target_user: i64) -> Value {
    let mut t = tweet(id, user_id);
    t["in_reply_to_status_id"] = json!(target);
    t["in_reply_to_user_id"] = json!(target_user);
    t["in_reply_to_screen_name"] = json!(format!("user{target_user}"));
    t
}

/// Every row of a query rendered as a string, for whole-table comparisons.
pub fn dump(conn: &Connection, sql: &str) -> Vec<String> {
    let mut stmt = conn.prepare(sql).unwrap();
    let n = stmt.column_count();
    stmt.query_map([], |r| {
        let mut parts = Vec::with_capacity(n);
        for i in 0..n {
            let v: rusqlite::types::Value = r.get(i)?;
            parts.push(format!("{v:?}"));
        }
        Ok(parts.join("|"))
    })
    .unwrap()
    .map(|r| r.unwrap())
    .collect()
}
