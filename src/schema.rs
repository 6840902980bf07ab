//! DDL for the two output layouts.

/// Normalized layout. `users` is an append-only observation log (no key); `posts`
/// is keyed by id; association rows reference posts through foreign keys that are
/// only checked at commit, so a batch may reference posts written later in the
/// same transaction.
pub const NORMALIZED_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id_users              INTEGER NOT NULL,
    created_at            TEXT,
    updated_at            TEXT,
    url                   TEXT,
    friends_count         INTEGER,
    listed_count          INTEGER,
    favourites_count      INTEGER,
    statuses_count        INTEGER,
    protected             INTEGER,
    verified              INTEGER,
    screen_name           TEXT,
    name                  TEXT,
    location              TEXT,
    description           TEXT,
    withheld_in_countries TEXT
);
CREATE INDEX IF NOT EXISTS users_id_users_idx ON users (id_users);

CREATE TABLE IF NOT EXISTS posts (
    id_posts              INTEGER PRIMARY KEY,
    id_users              INTEGER,
    created_at            TEXT,
    in_reply_to_status_id INTEGER,
    in_reply_to_user_id   INTEGER,
    quoted_status_id      INTEGER,
    geo                   TEXT,
    retweet_count         INTEGER,
    quote_count           INTEGER,
    favorite_count        INTEGER,
    withheld_copyright    INTEGER,
    withheld_in_countries TEXT,
    source                TEXT,
    text                  TEXT,
    country_code          TEXT,
    state_code            TEXT,
    lang                  TEXT,
    place_name            TEXT
);
CREATE INDEX IF NOT EXISTS posts_id_users_idx ON posts (id_users);

CREATE TABLE IF NOT EXISTS post_urls (
    id_posts INTEGER NOT NULL REFERENCES posts (id_posts) DEFERRABLE INITIALLY DEFERRED,
    url      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS post_urls_id_posts_idx ON post_urls (id_posts);

CREATE TABLE IF NOT EXISTS post_mentions (
    id_posts INTEGER NOT NULL REFERENCES posts (id_posts) DEFERRABLE INITIALLY DEFERRED,
    id_users INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS post_mentions_id_posts_idx ON post_mentions (id_posts);

CREATE TABLE IF NOT EXISTS post_tags (
    id_posts INTEGER NOT NULL REFERENCES posts (id_posts) DEFERRABLE INITIALLY DEFERRED,
    tag      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS post_tags_id_posts_idx ON post_tags (id_posts);
CREATE INDEX IF NOT EXISTS post_tags_tag_idx ON post_tags (tag);

CREATE TABLE IF NOT EXISTS post_media (
    id_posts INTEGER NOT NULL REFERENCES posts (id_posts) DEFERRABLE INITIALLY DEFERRED,
    url      TEXT NOT NULL,
    type     TEXT
);
CREATE INDEX IF NOT EXISTS post_media_id_posts_idx ON post_media (id_posts);

-- Read-only rankings, always derived from post_tags. Duplicate tag rows on one
-- post are tolerated, so both count distinct posts.
CREATE VIEW IF NOT EXISTS tag_frequency AS
    SELECT tag, count(DISTINCT id_posts) AS count
      FROM post_tags
     GROUP BY tag;

CREATE VIEW IF NOT EXISTS tag_cooccurrence AS
    SELECT t1.tag AS tag1, t2.tag AS tag2, count(DISTINCT t1.id_posts) AS count
      FROM post_tags t1
      JOIN post_tags t2 ON t1.id_posts = t2.id_posts AND t1.tag < t2.tag
     GROUP BY t1.tag, t2.tag;
"#;

/// Denormalized layout: each document kept whole.
pub const DENORMALIZED_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS posts_jsonb (
    data TEXT NOT NULL CHECK (json_valid(data))
);
"#;
