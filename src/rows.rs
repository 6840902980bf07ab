//! Relational rows produced by the extractor and consumed by the loader.

use std::fmt::Write as _;

/// A user observation. The `users` table is an append-only log keyed by
/// `id_users`; the same id may appear many times.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UserRow {
    pub id_users: i64,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub url: Option<String>,
    pub friends_count: Option<i64>,
    pub listed_count: Option<i64>,
    pub favourites_count: Option<i64>,
    pub statuses_count: Option<i64>,
    pub protected: Option<bool>,
    pub verified: Option<bool>,
    pub screen_name: Option<String>,
    pub name: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub withheld_in_countries: Option<Vec<String>>,
}

impl UserRow {
    /// A user known only by reference (mention or reply target).
    pub fn unhydrated(id_users: i64, screen_name: Option<String>, name: Option<String>) -> Self {
        Self { id_users, screen_name, name, ..Default::default() }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PostRow {
    pub id_posts: i64,
    pub id_users: Option<i64>,
    pub created_at: Option<String>,
    pub in_reply_to_status_id: Option<i64>,
    pub in_reply_to_user_id: Option<i64>,
    pub quoted_status_id: Option<i64>,
    pub geo: Option<Geometry>,
    pub retweet_count: Option<i64>,
    pub quote_count: Option<i64>,
    pub favorite_count: Option<i64>,
    pub withheld_copyright: Option<bool>,
    pub withheld_in_countries: Option<Vec<String>>,
    pub source: Option<String>,
    pub text: Option<String>,
    pub country_code: Option<String>,
    pub state_code: Option<String>,
    pub lang: Option<String>,
    pub place_name: Option<String>,
}

impl PostRow {
    /// Ids of other posts this post points at (reply target, quoted post).
    pub fn referenced_posts(&self) -> impl Iterator<Item = i64> + '_ {
        self.in_reply_to_status_id.into_iter().chain(self.quoted_status_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostUrl {
    pub id_posts: i64,
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostMention {
    pub id_posts: i64,
    pub id_users: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostTag {
    pub id_posts: i64,
    pub tag: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostMedia {
    pub id_posts: i64,
    pub url: String,
    pub media_type: Option<String>,
}

/// Spatial value of a post, written to the store as WKT.
#[derive(Clone, Debug, PartialEq)]
pub enum Geometry {
    Point(f64, f64),
    /// Closed ring (first point repeated at the end).
    Polygon(Vec<(f64, f64)>),
}

impl Geometry {
    pub fn to_wkt(&self) -> String {
        match self {
            Geometry::Point(x, y) => format!("POINT({x} {y})"),
            Geometry::Polygon(ring) => {
                let mut s = String::from("POLYGON((");
                for (i, (x, y)) in ring.iter().enumerate() {
                    if i > 0 {
                        s.push_str(", ");
                    }
                    let _ = write!(s, "{x} {y}");
                }
                s.push_str("))");
                s
            }
        }
    }
}

/// Everything derived from one post document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Extracted {
    pub users: Vec<UserRow>,
    pub post: Option<PostRow>,
    pub urls: Vec<PostUrl>,
    pub mentions: Vec<PostMention>,
    pub tags: Vec<PostTag>,
    pub media: Vec<PostMedia>,
}

impl Extracted {
    pub fn post_id(&self) -> Option<i64> {
        self.post.as_ref().map(|p| p.id_posts)
    }

    /// Forget the post and every row that depends on it; user rows are kept.
    pub fn drop_post(&mut self) {
        self.post = None;
        self.urls.clear();
        self.mentions.clear();
        self.tags.clear();
        self.media.clear();
    }
}
