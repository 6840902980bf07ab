//! Entity extraction: decompose one tweet document into relational rows.
//!
//! Missing or null source fields map to `None` (NULL in the store); nothing is
//! defaulted. Quoted and replied-to posts are not expanded, only their ids are kept.

use crate::rows::{Extracted, Geometry, PostMedia, PostMention, PostRow, PostTag, PostUrl, UserRow};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;

fn str_at(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn i64_at(v: &Value, key: &str) -> Option<i64> {
    v.get(key).and_then(Value::as_i64)
}

fn bool_at(v: &Value, key: &str) -> Option<bool> {
    v.get(key).and_then(Value::as_bool)
}

/// Numeric id, falling back to the `<key>_str` twin that the API ships alongside it.
fn id_at(v: &Value, key: &str) -> Option<i64> {
    i64_at(v, key).or_else(|| {
        v.get(format!("{key}_str").as_str())
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    })
}

fn string_list_at(v: &Value, key: &str) -> Option<Vec<String>> {
    let items = v.get(key)?.as_array()?;
    Some(items.iter().filter_map(Value::as_str).map(str::to_owned).collect())
}

/// Entity array from `extended_tweet` when present, else from the top level.
fn entity_list<'a>(doc: &'a Value, section: &str, key: &str) -> &'a [Value] {
    doc.get("extended_tweet")
        .and_then(|ext| ext.get(section))
        .and_then(|s| s.get(key))
        .and_then(Value::as_array)
        .or_else(|| doc.get(section).and_then(|s| s.get(key)).and_then(Value::as_array))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Normalize the API's `Wed Oct 10 20:19:24 +0000 2018` to RFC 3339.
/// Text in any other format is kept verbatim rather than dropped.
pub fn normalize_timestamp(raw: &str) -> String {
    let fmt = format_description!(
        "[weekday repr:short] [month repr:short] [day] [hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute] [year]"
    );
    OffsetDateTime::parse(raw, &fmt)
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_else(|| raw.to_string())
}

fn timestamp_at(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(normalize_timestamp)
}

fn coordinate_pair(v: &Value) -> Option<(f64, f64)> {
    let pair = v.as_array()?;
    match pair.as_slice() {
        [a, b, ..] => Some((a.as_f64()?, b.as_f64()?)),
        _ => None,
    }
}

/// `geo.coordinates` as a point; otherwise the place's bounding box as a closed polygon.
///
/// An absent `geo`, `"geo": null` and `"coordinates": null` all yield `None` and store
/// NULL; the `geo` column does not record which one the source used. The raw document
/// (denormalized strategy) keeps that shape. `(0, 0)` is a point, never NULL.
pub fn geometry_of(doc: &Value) -> Option<Geometry> {
    if let Some(point) = doc.pointer("/geo/coordinates").and_then(coordinate_pair) {
        return Some(Geometry::Point(point.0, point.1));
    }
    let ring = doc.pointer("/place/bounding_box/coordinates/0")?.as_array()?;
    let mut points: Vec<(f64, f64)> = ring.iter().map(coordinate_pair).collect::<Option<_>>()?;
    if points.is_empty() {
        return None;
    }
    if points.first() != points.last() {
        points.push(points[0]);
    }
    Some(Geometry::Polygon(points))
}

fn author_row(user: &Value, post_created_at: Option<&String>) -> Option<UserRow> {
    Some(UserRow {
        id_users: id_at(user, "id")?,
        created_at: timestamp_at(user, "created_at"),
        updated_at: post_created_at.cloned(),
        url: str_at(user, "url"),
        friends_count: i64_at(user, "friends_count"),
        listed_count: i64_at(user, "listed_count"),
        favourites_count: i64_at(user, "favourites_count"),
        statuses_count: i64_at(user, "statuses_count"),
        protected: bool_at(user, "protected"),
        verified: bool_at(user, "verified"),
        screen_name: str_at(user, "screen_name"),
        name: str_at(user, "name"),
        location: str_at(user, "location"),
        description: str_at(user, "description"),
        withheld_in_countries: string_list_at(user, "withheld_in_countries"),
    })
}

fn place_codes(doc: &Value) -> (Option<String>, Option<String>, Option<String>) {
    let place = match doc.get("place") {
        Some(p) if p.is_object() => p,
        _ => return (None, None, None),
    };
    let country_code = place.get("country_code").and_then(Value::as_str).map(str::to_lowercase);
    let place_name = str_at(place, "full_name");
    let state_code = match (country_code.as_deref(), place_name.as_deref()) {
        (Some("us"), Some(full)) => full
            .rsplit(',')
            .next()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| s.chars().count() <= 2),
        _ => None,
    };
    (country_code, state_code, place_name)
}

/// Derive all rows for one document.
pub fn extract(doc: &Value) -> Extracted {
    let mut out = Extracted::default();
    let created_at = timestamp_at(doc, "created_at");

    let author = doc.get("user").and_then(|u| author_row(u, created_at.as_ref()));
    let author_id = author.as_ref().map(|u| u.id_users);
    if let Some(a) = author {
        out.users.push(a);
    }

    let post_id = id_at(doc, "id");

    for m in entity_list(doc, "entities", "user_mentions") {
        let Some(uid) = id_at(m, "id") else { continue };
        if let Some(pid) = post_id {
            out.mentions.push(PostMention { id_posts: pid, id_users: uid });
        }
        if !out.users.iter().any(|u| u.id_users == uid) {
            out.users.push(UserRow::unhydrated(uid, str_at(m, "screen_name"), str_at(m, "name")));
        }
    }

    let reply_user = id_at(doc, "in_reply_to_user_id");
    if let Some(uid) = reply_user {
        if !out.users.iter().any(|u| u.id_users == uid) {
            out.users.push(UserRow::unhydrated(uid, str_at(doc, "in_reply_to_screen_name"), None));
        }
    }

    let Some(id_posts) = post_id else {
        tracing::debug!("document without post id; keeping user rows only");
        return out;
    };

    let text = doc
        .pointer("/extended_tweet/full_text")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .or_else(|| str_at(doc, "text"));
    let (country_code, state_code, place_name) = place_codes(doc);

    out.post = Some(PostRow {
        id_posts,
        id_users: author_id,
        created_at,
        in_reply_to_status_id: id_at(doc, "in_reply_to_status_id"),
        in_reply_to_user_id: reply_user,
        quoted_status_id: id_at(doc, "quoted_status_id"),
        geo: geometry_of(doc),
        retweet_count: i64_at(doc, "retweet_count"),
        quote_count: i64_at(doc, "quote_count"),
        favorite_count: i64_at(doc, "favorite_count"),
        withheld_copyright: bool_at(doc, "withheld_copyright"),
        withheld_in_countries: string_list_at(doc, "withheld_in_countries"),
        source: str_at(doc, "source"),
        text,
        country_code,
        state_code,
        lang: str_at(doc, "lang"),
        place_name,
    });

    out.urls = entity_list(doc, "entities", "urls")
        .iter()
        .filter_map(|u| str_at(u, "expanded_url"))
        .map(|url| PostUrl { id_posts, url })
        .collect();

    let hashtags = entity_list(doc, "entities", "hashtags").iter().filter_map(|h| str_at(h, "text")).map(|t| format!("#{t}"));
    let cashtags = entity_list(doc, "entities", "symbols").iter().filter_map(|c| str_at(c, "text")).map(|t| format!("${t}"));
    out.tags = hashtags.chain(cashtags).map(|tag| PostTag { id_posts, tag }).collect();

    out.media = entity_list(doc, "extended_entities", "media")
        .iter()
        .filter_map(|m| {
            Some(PostMedia { id_posts, url: str_at(m, "media_url")?, media_type: str_at(m, "type") })
        })
        .collect();

    out
}
