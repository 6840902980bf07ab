#[path = "common/mod.rs"]
mod common;

use common::*;
use serde_json::json;
use std::path::PathBuf;
use tweetload::{LoadError, ReferencePolicy, Store, Strategy, Table, TweetLoader};

fn loader(db: &std::path::Path) -> TweetLoader {
    TweetLoader::new().database(db).progress(false)
}

fn open(db: &std::path::Path) -> Store {
    Store::open(db, std::time::Duration::from_secs(5)).unwrap()
}

fn all_tables(store: &Store) -> Vec<Vec<String>> {
    let conn = store.connection();
    vec![
        dump(conn, "SELECT * FROM posts ORDER BY id_posts"),
        dump(conn, "SELECT * FROM users ORDER BY id_users, updated_at, screen_name, name, friends_count"),
        dump(conn, "SELECT * FROM post_urls ORDER BY id_posts, url"),
        dump(conn, "SELECT * FROM post_mentions ORDER BY id_posts, id_users"),
        dump(conn, "SELECT * FROM post_tags ORDER BY id_posts, tag"),
        dump(conn, "SELECT * FROM post_media ORDER BY id_posts, url"),
    ]
}

/// Loading the same archive twice leaves posts and associations unchanged;
/// only the users log grows.
#[test]
fn reload_is_idempotent_except_users() {
    let ws = Workspace::new();
    let input = ws.path("2020-01.zst");
    let docs: Vec<_> = (1..=20).map(|i| tweet_mentioning(i, i % 4, 50)).collect();
    write_zst_lines(&input, &lines(&docs));
    let db = ws.db();

    let first = loader(&db).load_file(&input);
    let counts = *first.counts().unwrap();
    assert_eq!(counts.posts, 20);
    assert_eq!(counts.users, 40);

    let store = open(&db);
    let before = all_tables(&store);
    drop(store);

    let second = loader(&db).load_file(&input);
    let again = second.counts().unwrap();
    assert_eq!(again.posts, 0);
    assert_eq!(again.posts_skipped, 20);
    assert_eq!(again.urls + again.tags + again.mentions + again.media, 0);

    let store = open(&db);
    let after = all_tables(&store);
    assert_eq!(before[0], after[0]);
    assert_eq!(before[2..], after[2..]);
    assert_eq!(store.count(Table::Users).unwrap(), 80);
    assert_eq!(store.distinct_users().unwrap(), 5);
}

/// Every association row points at a stored post, and repeats inside one file
/// are dropped before they reach the store.
#[test]
fn associations_always_reference_posts() {
    let ws = Workspace::new();
    let input = ws.path("dups.jsonl");
    let mut docs: Vec<_> = (1..=10).map(|i| tweet(i, 1)).collect();
    docs.extend((1..=5).map(|i| tweet(i, 2)));
    write_plain(&input, lines(&docs).join("\n").as_bytes());

    let out = loader(&ws.db()).batch_size(3).load_file(&input);
    let counts = out.counts().unwrap();
    assert_eq!(counts.documents, 15);
    assert_eq!(counts.repeated_posts, 5);
    assert_eq!(counts.posts, 10);
    assert_eq!(counts.users, 15);

    let store = open(&ws.db());
    assert_eq!(store.orphan_associations().unwrap(), 0);
    assert_eq!(store.count(Table::PostUrls).unwrap(), 10);
}

/// With references enforced and batches of one row, a reply that appears before
/// its target in the same file still loads.
#[test]
fn forward_reference_within_file() {
    let ws = Workspace::new();
    let input = ws.path("thread.zst");
    write_zst_lines(&input, &lines(&[reply(2, 1, 1, 9), reply(3, 9, 2, 1), tweet(1, 9)]));

    let out = loader(&ws.db())
        .batch_size(1)
        .reference_policy(ReferencePolicy::Enforce)
        .load_file(&input);
    assert!(out.is_success(), "{:?}", out.error());
    assert_eq!(out.counts().unwrap().posts, 3);
    assert!(out.counts().unwrap().batches >= 3);
}

/// A reply whose target is never seen fails the whole file and leaves nothing behind.
#[test]
fn unresolved_reference_rolls_back_file() {
    let ws = Workspace::new();
    let input = ws.path("broken-thread.zst");
    write_zst_lines(&input, &lines(&[tweet(1, 1), reply(2, 1, 404, 3), tweet(3, 1)]));

    let out = loader(&ws.db())
        .batch_size(1)
        .reference_policy(ReferencePolicy::Enforce)
        .load_file(&input);
    match out.error() {
        Some(LoadError::UnresolvedReference { post_id, referenced_id }) => {
            assert_eq!((*post_id, *referenced_id), (2, 404));
        }
        other => panic!("expected unresolved reference, got {other:?}"),
    }
    assert_eq!(out.to_json()["error"]["kind"], "unresolved_reference");

    let store = open(&ws.db());
    assert_eq!(store.count(Table::Posts).unwrap(), 0);
    assert_eq!(store.count(Table::Users).unwrap(), 0);
    assert_eq!(store.count(Table::PostTags).unwrap(), 0);
}

/// A batch mixing new and already-stored posts inserts the new ones only.
#[test]
fn partial_batch_skips_existing_posts() {
    let ws = Workspace::new();
    let seed = ws.path("a-seed.zst");
    let mixed = ws.path("b-mixed.zst");
    write_zst_lines(&seed, &lines(&[tweet(4, 1)]));
    write_zst_lines(&mixed, &lines(&(1..=6).map(|i| tweet(i, 1)).collect::<Vec<_>>()));

    for (strategy, name) in [(Strategy::Normalized, "normalized.sqlite"), (Strategy::NormalizedBatch, "batch.sqlite")] {
        let db = ws.path(name);
        assert!(loader(&db).strategy(strategy).load_file(&seed).is_success());
        let out = loader(&db).strategy(strategy).load_file(&mixed);
        let c = out.counts().unwrap();
        assert_eq!((c.posts, c.posts_skipped), (5, 1), "{strategy}");
        assert_eq!(c.tags, 10, "{strategy}");

        let store = open(&db);
        assert_eq!(store.count(Table::Posts).unwrap(), 6);
        assert_eq!(store.count(Table::PostTags).unwrap(), 12);
        assert_eq!(store.orphan_associations().unwrap(), 0);
    }
}

/// A post repeated inside one batch is stored once, even when the run-level
/// memory of seen ids has already forgotten it.
#[test]
fn repeat_within_batch_stores_one_copy() {
    let ws = Workspace::new();
    let input = ws.path("repeat.zst");
    let docs: Vec<_> = [1, 2, 3, 4, 5, 1].iter().map(|&i| tweet(i, 1)).collect();
    write_zst_lines(&input, &lines(&docs));

    let mut results = Vec::new();
    for (name, batch) in [("one.sqlite", 1usize), ("all.sqlite", 100usize)] {
        let db = ws.path(name);
        let out = loader(&db).batch_size(batch).seen_capacity(Some(2)).load_file(&input);
        let c = out.counts().unwrap();
        assert_eq!(c.posts, 5);
        assert_eq!(c.urls, 5);
        assert_eq!(c.tags, 10);

        let store = open(&db);
        assert_eq!(store.count(Table::Posts).unwrap(), 5);
        assert_eq!(store.count(Table::PostUrls).unwrap(), 5);
        assert_eq!(store.count(Table::PostTags).unwrap(), 10);
        results.push(all_tables(&store));
    }
    assert_eq!(results[0], results[1]);
}

/// Without an explicit policy a dangling reply fails the file; ignoring
/// references lets the same file commit.
#[test]
fn references_enforced_by_default() {
    let ws = Workspace::new();
    let input = ws.path("dangling.zst");
    write_zst_lines(&input, &lines(&[tweet(1, 1), reply(2, 1, 404, 3)]));

    let strict = loader(&ws.path("strict.sqlite")).load_file(&input);
    assert!(matches!(strict.error(), Some(LoadError::UnresolvedReference { referenced_id: 404, .. })));
    assert_eq!(open(&ws.path("strict.sqlite")).count(Table::Posts).unwrap(), 0);

    let lenient = loader(&ws.path("lenient.sqlite"))
        .reference_policy(ReferencePolicy::Ignore)
        .load_file(&input);
    assert!(lenient.is_success(), "{:?}", lenient.error());
    assert_eq!(lenient.counts().unwrap().posts, 2);
}

/// Absent and null geometry store NULL; a point at (0, 0) is kept.
#[test]
fn geometry_nulls_round_trip() {
    let ws = Workspace::new();
    let input = ws.path("geo.jsonl");
    let mut absent = tweet(1, 1);
    absent.as_object_mut().unwrap().remove("geo");
    absent.as_object_mut().unwrap().remove("place");
    let null = tweet(2, 1);
    let mut origin = tweet(3, 1);
    origin["geo"] = json!({ "type": "Point", "coordinates": [0, 0] });
    let mut boxed = tweet(4, 1);
    boxed["place"] = json!({
        "country_code": "US",
        "full_name": "Claremont, CA",
        "bounding_box": { "coordinates": [[[0.5, 1.5], [0.5, 2.5], [1.5, 2.5], [1.5, 1.5]]] }
    });
    write_plain(&input, lines(&[absent, null, origin, boxed]).join("\n").as_bytes());

    assert!(loader(&ws.db()).load_file(&input).is_success());
    let store = open(&ws.db());
    assert_eq!(store.post_geometry(1).unwrap(), Some(None));
    assert_eq!(store.post_geometry(2).unwrap(), Some(None));
    assert_eq!(store.post_geometry(3).unwrap(), Some(Some("POINT(0 0)".to_string())));
    assert_eq!(
        store.post_geometry(4).unwrap(),
        Some(Some("POLYGON((0.5 1.5, 0.5 2.5, 1.5 2.5, 1.5 1.5, 0.5 1.5))".to_string()))
    );
    assert_eq!(store.post_geometry(5).unwrap(), None);
}

/// Batch size changes how rows are grouped, never which rows end up stored.
#[test]
fn batch_size_does_not_change_result() {
    let ws = Workspace::new();
    let input = ws.path("big.zst");
    let mut docs = Vec::with_capacity(10_000);
    for i in 1..=10_000i64 {
        let mut d = if i % 10 == 0 { reply(i, i % 97, i - 1, (i - 1) % 97) } else { tweet_mentioning(i, i % 97, (i * 7) % 97) };
        if i % 25 == 0 {
            d["extended_entities"] = json!({ "media": [{ "media_url": format!("https://m.example.com/{i}.jpg"), "type": "photo" }] });
        }
        docs.push(d);
    }
    // Some repeats scattered through the file.
    for i in (1..=10_000i64).step_by(500) {
        docs.push(tweet(i, 1));
    }
    write_zst_lines(&input, &lines(&docs));

    let mut results = Vec::new();
    for (name, batch) in [("small.sqlite", 100usize), ("large.sqlite", 1000usize)] {
        let db: PathBuf = ws.path(name);
        let out = loader(&db).batch_size(batch).load_file(&input);
        let counts = out.counts().unwrap();
        assert_eq!(counts.posts, 10_000);
        assert_eq!(counts.repeated_posts, 20);
        results.push(all_tables(&open(&db)));
    }
    assert_eq!(results[0], results[1]);
}

/// The denormalized strategy keeps every parsed document, repeats included.
#[test]
fn denormalized_stores_documents() {
    let ws = Workspace::new();
    let input = ws.path("raw.zst");
    let mut l = lines(&[tweet(1, 1), tweet(2, 1), tweet(1, 1)]);
    l.push("not json".into());
    write_zst_lines(&input, &l);

    let out = loader(&ws.db()).strategy(Strategy::Denormalized).batch_size(2).load_file(&input);
    let counts = out.counts().unwrap();
    assert_eq!(counts.raw_documents, 3);
    assert_eq!(counts.malformed_lines, 1);
    assert_eq!(counts.batches, 2);
    assert_eq!(out.to_json()["strategy"], "denormalized");

    let store = open(&ws.db());
    assert_eq!(store.count(Table::PostsJsonb).unwrap(), 3);
    let texts = dump(store.connection(), "SELECT json_extract(data, '$.user.screen_name') FROM posts_jsonb");
    assert!(texts.iter().all(|t| t == "Text(\"user1\")"));
}

/// Files load in parallel; a corrupt archive fails alone and the others commit.
#[test]
fn parallel_files_isolate_failures() {
    let ws = Workspace::new();
    let mut files = Vec::new();
    for f in 0..4i64 {
        let path = ws.path(&format!("2020-0{}.zst", f + 1));
        let docs: Vec<_> = (0..50).map(|i| tweet(f * 1000 + i, f)).collect();
        write_zst_lines(&path, &lines(&docs));
        files.push(path);
    }
    let corrupt = ws.path("2020-05.zst");
    write_plain(&corrupt, b"\x28\xb5\x2f\xfd garbage after a zstd magic number");
    files.push(corrupt.clone());

    let outcomes = loader(&ws.db()).workers(3).load_files(&files).unwrap();
    assert_eq!(outcomes.len(), 5);
    for (o, f) in outcomes.iter().zip(&files) {
        assert_eq!(&o.path, f);
    }
    assert!(outcomes[..4].iter().all(|o| o.is_success()));
    assert!(matches!(outcomes[4].error(), Some(LoadError::Archive { .. })));
    assert_eq!(outcomes[4].to_json()["ok"], false);

    let store = open(&ws.db());
    assert_eq!(store.count(Table::Posts).unwrap(), 200);
    assert_eq!(store.orphan_associations().unwrap(), 0);
}

/// A worker waiting on the write lock longer than `busy_timeout` keeps going
/// instead of failing its file.
#[test]
fn long_writer_does_not_time_out_siblings() {
    let ws = Workspace::new();
    let mut files = Vec::new();
    for f in 0..2i64 {
        let path = ws.path(&format!("2020-0{}.zst", f + 1));
        let docs: Vec<_> = (1..=20_000).map(|i| tweet_mentioning(f * 100_000 + i, i % 50, 7)).collect();
        write_zst_lines(&path, &lines(&docs));
        files.push(path);
    }

    let outcomes = loader(&ws.db())
        .workers(2)
        .batch_size(100)
        .max_pending_batches(2)
        .busy_timeout(std::time::Duration::from_millis(200))
        .load_files(&files)
        .unwrap();
    for o in &outcomes {
        assert!(o.is_success(), "{}: {:?}", o.path.display(), o.error());
    }

    let store = open(&ws.db());
    assert_eq!(store.count(Table::Posts).unwrap(), 40_000);
    assert_eq!(store.orphan_associations().unwrap(), 0);
}

/// Tag rankings are derived from `post_tags`.
#[test]
fn tag_views_rank_tags() {
    let ws = Workspace::new();
    let input = ws.path("tags.jsonl");
    let mut docs: Vec<_> = (1..=3).map(|i| tweet(i, 1)).collect();
    let mut solo = tweet(4, 1);
    solo["entities"]["hashtags"] = json!([{ "text": "rust" }, { "text": "rust" }]);
    solo["entities"]["symbols"] = json!([]);
    docs.push(solo);
    write_plain(&input, lines(&docs).join("\n").as_bytes());

    assert!(loader(&ws.db()).load_file(&input).is_success());
    let store = open(&ws.db());
    assert_eq!(
        store.tag_frequency(10).unwrap(),
        vec![("#rust".to_string(), 4), ("$TSLA".to_string(), 3)]
    );
    assert_eq!(
        store.tag_cooccurrence(10).unwrap(),
        vec![("#rust".to_string(), "$TSLA".to_string(), 3)]
    );
}

/// A zip of hourly files loads like any other archive.
#[test]
fn zip_archive_loads() {
    let ws = Workspace::new();
    let input = ws.path("2020-01-01.zip");
    write_zip(
        &input,
        &[
            ("2020-01-01-00.jsonl", lines(&[tweet(1, 1), tweet(2, 2)])),
            ("2020-01-01-01.jsonl", lines(&[tweet(3, 1), tweet(1, 1)])),
        ],
    );

    let out = loader(&ws.db()).strategy(Strategy::Normalized).load_file(&input);
    let counts = out.counts().unwrap();
    assert_eq!(counts.documents, 4);
    assert_eq!(counts.posts, 3);
    assert_eq!(counts.repeated_posts, 1);
}
