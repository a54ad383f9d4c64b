//! Core types for reddit-dl
//!
//! The wire model ([`Envelope`], [`Kind`]) and the typed things the parser
//! produces from it ([`Thing`] and its payload structs).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;

/// The closed vocabulary of envelope kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    /// `t1`
    Comment,
    /// `t2`
    Account,
    /// `t3` (a link or self post)
    Post,
    /// `t4`
    Message,
    /// `t5`
    Subreddit,
    /// `t6`
    Award,
    /// `Listing`
    Listing,
    /// `more`
    More,
}

impl Kind {
    /// Every kind, in tag order
    pub const ALL: [Kind; 8] = [
        Kind::Comment,
        Kind::Account,
        Kind::Post,
        Kind::Message,
        Kind::Subreddit,
        Kind::Award,
        Kind::Listing,
        Kind::More,
    ];

    /// The wire tag for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Comment => "t1",
            Kind::Account => "t2",
            Kind::Post => "t3",
            Kind::Message => "t4",
            Kind::Subreddit => "t5",
            Kind::Award => "t6",
            Kind::Listing => "Listing",
            Kind::More => "more",
        }
    }

    /// Whether things of this kind can be referenced by a fullname (`t<digit>_<id>`)
    pub fn has_fullname(&self) -> bool {
        !matches!(self, Kind::Listing | Kind::More)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "t1" => Ok(Kind::Comment),
            "t2" => Ok(Kind::Account),
            "t3" => Ok(Kind::Post),
            "t4" => Ok(Kind::Message),
            "t5" => Ok(Kind::Subreddit),
            "t6" => Ok(Kind::Award),
            "Listing" => Ok(Kind::Listing),
            "more" => Ok(Kind::More),
            other => Err(ParseError::UnknownKind {
                kind: other.to_string(),
            }),
        }
    }
}

/// The `{kind, data}` wrapper around every thing on the wire
///
/// `data` is kept as raw JSON text and only decoded once the kind is known.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    /// Kind tag (`t1`, `Listing`, ...), not yet checked against the vocabulary
    pub kind: String,
    /// Undecoded payload
    pub data: Box<RawValue>,
}

impl Envelope {
    /// Build an envelope from a kind tag and a JSON payload
    pub fn new(kind: impl Into<String>, data: &serde_json::Value) -> serde_json::Result<Self> {
        Ok(Self {
            kind: kind.into(),
            data: serde_json::value::to_raw_value(data)?,
        })
    }

    /// Decode an envelope from raw bytes
    ///
    /// Empty input and a JSON `null` document are reported as nil input.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(ParseError::nil("empty envelope bytes"));
        }
        let envelope: Option<Envelope> = crate::parser::from_json(bytes)
            .map_err(|source| ParseError::Envelope { source })?;
        envelope.ok_or_else(|| ParseError::nil("envelope is null"))
    }
}

/// The `edited` field: `false`, `true`, or a timestamp on the wire
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub enum Edited {
    /// Never edited (`false` or absent)
    #[default]
    Never,
    /// Edited, but the wire carried `true` instead of a time
    Unspecified,
    /// Edited at this Unix time in seconds
    At(f64),
}

impl Edited {
    /// Whether the thing was edited at all
    pub fn is_edited(&self) -> bool {
        !matches!(self, Edited::Never)
    }
}

impl<'de> Deserialize<'de> for Edited {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct EditedVisitor;

        impl serde::de::Visitor<'_> for EditedVisitor {
            type Value = Edited;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a boolean or a numeric timestamp")
            }

            fn visit_bool<E: serde::de::Error>(self, v: bool) -> Result<Edited, E> {
                Ok(if v { Edited::Unspecified } else { Edited::Never })
            }

            fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Edited, E> {
                Ok(Edited::At(v))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Edited, E> {
                Ok(Edited::At(v as f64))
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Edited, E> {
                Ok(Edited::At(v as f64))
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Edited, E> {
                Ok(Edited::Never)
            }
        }

        deserializer.deserialize_any(EditedVisitor)
    }
}

/// A link or self post (`t3`)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Post {
    /// Base-36 id
    pub id: String,
    /// Fullname (`t3_<id>`)
    #[serde(default, deserialize_with = "null_default")]
    pub name: String,
    /// Title
    #[serde(default, deserialize_with = "null_default")]
    pub title: String,
    /// Author username (`[deleted]` for removed accounts)
    #[serde(default, deserialize_with = "null_default")]
    pub author: String,
    /// Subreddit display name
    #[serde(default, deserialize_with = "null_default")]
    pub subreddit: String,
    /// Subreddit fullname (`t5_<id>`)
    #[serde(default, deserialize_with = "null_default")]
    pub subreddit_id: String,
    /// Site-relative permalink
    #[serde(default, deserialize_with = "null_default")]
    pub permalink: String,
    /// Linked URL (the permalink for self posts)
    #[serde(default, deserialize_with = "null_default")]
    pub url: String,
    /// Self text (markdown)
    #[serde(default, deserialize_with = "null_default")]
    pub selftext: String,
    /// Fraction of upvotes in `[0, 1]`
    #[serde(default)]
    pub upvote_ratio: f64,
    /// Number of comments
    #[serde(default)]
    pub num_comments: u64,
    /// Net score
    #[serde(default)]
    pub score: i64,
    /// Legacy upvote count, always equal to `score`
    #[serde(default)]
    pub ups: i64,
    /// Legacy downvote count, always 0
    #[serde(default)]
    pub downs: i64,
    /// Creation time (Unix seconds), equal to `created_utc`
    #[serde(default)]
    pub created: Option<f64>,
    /// Creation time (Unix seconds, UTC)
    #[serde(default)]
    pub created_utc: Option<f64>,
    /// Edit state
    #[serde(default)]
    pub edited: Edited,
    /// NSFW flag
    #[serde(default)]
    pub over_18: bool,
    /// Pinned by moderators
    #[serde(default)]
    pub stickied: bool,
    /// Closed to new comments
    #[serde(default)]
    pub locked: bool,
}

/// A comment (`t1`) with its reply tree
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    /// Base-36 id
    pub id: String,
    /// Fullname (`t1_<id>`)
    #[serde(default, deserialize_with = "null_default")]
    pub name: String,
    /// Markdown body
    #[serde(default, deserialize_with = "null_default")]
    pub body: String,
    /// Author username
    #[serde(default, deserialize_with = "null_default")]
    pub author: String,
    /// Subreddit display name
    #[serde(default, deserialize_with = "null_default")]
    pub subreddit: String,
    /// Subreddit fullname (`t5_<id>`)
    #[serde(default, deserialize_with = "null_default")]
    pub subreddit_id: String,
    /// Fullname of the parent comment or post
    #[serde(default, deserialize_with = "null_default")]
    pub parent_id: String,
    /// Fullname of the post this comment belongs to
    #[serde(default, deserialize_with = "null_default")]
    pub link_id: String,
    /// Net score
    #[serde(default)]
    pub score: i64,
    /// Legacy upvote count, always equal to `score`
    #[serde(default)]
    pub ups: i64,
    /// Legacy downvote count, always 0
    #[serde(default)]
    pub downs: i64,
    /// Creation time (Unix seconds), equal to `created_utc`
    #[serde(default)]
    pub created: Option<f64>,
    /// Creation time (Unix seconds, UTC)
    #[serde(default)]
    pub created_utc: Option<f64>,
    /// Edit state
    #[serde(default)]
    pub edited: Edited,
    /// Pinned by moderators
    #[serde(default)]
    pub stickied: bool,
    /// Nesting depth as reported by the server
    #[serde(default)]
    pub depth: Option<u32>,
    /// Direct replies, in server order
    #[serde(skip_deserializing)]
    pub replies: Vec<Reply>,
}

impl Comment {
    /// Number of levels in this comment's tree (1 for a leaf)
    pub fn tree_depth(&self) -> usize {
        let mut deepest = 1;
        let mut stack: Vec<(&Comment, usize)> = vec![(self, 1)];
        while let Some((comment, level)) = stack.pop() {
            deepest = deepest.max(level);
            for reply in &comment.replies {
                if let Reply::Comment(child) = reply {
                    stack.push((child, level + 1));
                }
            }
        }
        deepest
    }

    /// Number of comments in this tree, including this one
    pub fn count(&self) -> usize {
        let mut total = 0;
        let mut stack = vec![self];
        while let Some(comment) = stack.pop() {
            total += 1;
            stack.extend(comment.replies.iter().filter_map(Reply::as_comment));
        }
        total
    }
}

/// One entry in a comment's replies: a comment or a placeholder for unfetched ones
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Reply {
    /// A decoded reply
    Comment(Comment),
    /// Replies not included in this response
    More(More),
}

impl Reply {
    /// The reply as a comment, if it is one
    pub fn as_comment(&self) -> Option<&Comment> {
        match self {
            Reply::Comment(c) => Some(c),
            Reply::More(_) => None,
        }
    }
}

/// Placeholder for comments that were not included in a response (`more`)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct More {
    /// Base-36 id, or `_` for "continue this thread" stubs
    pub id: String,
    /// Fullname of this placeholder
    #[serde(default, deserialize_with = "null_default")]
    pub name: String,
    /// Fullname of the comment the hidden replies belong to
    #[serde(default, deserialize_with = "null_default")]
    pub parent_id: String,
    /// Number of hidden comments
    #[serde(default)]
    pub count: u64,
    /// Depth of the hidden comments
    #[serde(default)]
    pub depth: u32,
    /// Ids of the hidden comments
    #[serde(default)]
    pub children: Vec<String>,
}

/// A user account (`t2`)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Base-36 id
    pub id: String,
    /// Username
    #[serde(default, deserialize_with = "null_default")]
    pub name: String,
    /// Karma from posts
    #[serde(default)]
    pub link_karma: i64,
    /// Karma from comments
    #[serde(default)]
    pub comment_karma: i64,
    /// Creation time (Unix seconds), equal to `created_utc`
    #[serde(default)]
    pub created: Option<f64>,
    /// Creation time (Unix seconds, UTC)
    #[serde(default)]
    pub created_utc: Option<f64>,
    /// Moderates at least one subreddit
    #[serde(default)]
    pub is_mod: bool,
    /// Email verified
    #[serde(default)]
    pub has_verified_email: bool,
}

/// A private message (`t4`)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Base-36 id
    pub id: String,
    /// Fullname (`t4_<id>`)
    #[serde(default, deserialize_with = "null_default")]
    pub name: String,
    /// Sender username
    #[serde(default, deserialize_with = "null_default")]
    pub author: String,
    /// Recipient username
    #[serde(default, deserialize_with = "null_default")]
    pub dest: String,
    /// Subject line
    #[serde(default, deserialize_with = "null_default")]
    pub subject: String,
    /// Markdown body
    #[serde(default, deserialize_with = "null_default")]
    pub body: String,
    /// Fullname of the message this one answers, if any
    #[serde(default, deserialize_with = "null_default")]
    pub parent_id: String,
    /// Subreddit for modmail and comment replies
    #[serde(default, deserialize_with = "null_default")]
    pub subreddit: String,
    /// Creation time (Unix seconds), equal to `created_utc`
    #[serde(default)]
    pub created: Option<f64>,
    /// Creation time (Unix seconds, UTC)
    #[serde(default)]
    pub created_utc: Option<f64>,
    /// Unread flag
    #[serde(default)]
    pub new: bool,
    /// Delivered as a comment reply notification
    #[serde(default)]
    pub was_comment: bool,
}

/// A subreddit (`t5`)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Subreddit {
    /// Base-36 id
    pub id: String,
    /// Fullname (`t5_<id>`)
    #[serde(default, deserialize_with = "null_default")]
    pub name: String,
    /// Display name without the `r/` prefix
    #[serde(default, deserialize_with = "null_default")]
    pub display_name: String,
    /// Title
    #[serde(default, deserialize_with = "null_default")]
    pub title: String,
    /// Sidebar blurb
    #[serde(default, deserialize_with = "null_default")]
    pub public_description: String,
    /// Subscriber count
    #[serde(default)]
    pub subscribers: u64,
    /// Creation time (Unix seconds), equal to `created_utc`
    #[serde(default)]
    pub created: Option<f64>,
    /// Creation time (Unix seconds, UTC)
    #[serde(default)]
    pub created_utc: Option<f64>,
    /// NSFW flag
    #[serde(default)]
    pub over18: bool,
}

/// An award (`t6`)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Award {
    /// Award id (`award_<uuid>` or `gid_<n>`)
    pub id: String,
    /// Display name
    #[serde(default, deserialize_with = "null_default")]
    pub name: String,
    /// Description
    #[serde(default, deserialize_with = "null_default")]
    pub description: String,
    /// Price in coins
    #[serde(default)]
    pub coin_price: u64,
    /// Times given
    #[serde(default)]
    pub count: u64,
}

/// A page of things with pagination cursors
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Listing {
    /// Children in server order
    pub children: Vec<Thing>,
    /// Cursor for the previous page
    pub before: Option<String>,
    /// Cursor for the next page
    pub after: Option<String>,
    /// Number of children the server says it sent
    pub dist: Option<u64>,
}

impl Listing {
    /// Number of children
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Whether the listing has no children
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

/// Any typed thing produced by the parser
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Thing {
    /// `t1`
    Comment(Comment),
    /// `t2`
    Account(Account),
    /// `t3`
    Post(Post),
    /// `t4`
    Message(Message),
    /// `t5`
    Subreddit(Subreddit),
    /// `t6`
    Award(Award),
    /// `Listing`
    Listing(Listing),
    /// `more`
    More(More),
}

impl Thing {
    /// The kind this thing was decoded from
    pub fn kind(&self) -> Kind {
        match self {
            Thing::Comment(_) => Kind::Comment,
            Thing::Account(_) => Kind::Account,
            Thing::Post(_) => Kind::Post,
            Thing::Message(_) => Kind::Message,
            Thing::Subreddit(_) => Kind::Subreddit,
            Thing::Award(_) => Kind::Award,
            Thing::Listing(_) => Kind::Listing,
            Thing::More(_) => Kind::More,
        }
    }

    /// The thing's id, if its kind has one
    pub fn id(&self) -> Option<&str> {
        match self {
            Thing::Comment(c) => Some(c.id()),
            Thing::Account(a) => Some(a.id()),
            Thing::Post(p) => Some(p.id()),
            Thing::Message(m) => Some(m.id()),
            Thing::Subreddit(s) => Some(s.id()),
            Thing::Award(a) => Some(a.id()),
            Thing::More(m) => Some(m.id.as_str()),
            Thing::Listing(_) => None,
        }
    }

    /// Unwrap a post
    pub fn into_post(self) -> Option<Post> {
        match self {
            Thing::Post(p) => Some(p),
            _ => None,
        }
    }

    /// Unwrap a comment
    pub fn into_comment(self) -> Option<Comment> {
        match self {
            Thing::Comment(c) => Some(c),
            _ => None,
        }
    }

    /// Unwrap a listing
    pub fn into_listing(self) -> Option<Listing> {
        match self {
            Thing::Listing(l) => Some(l),
            _ => None,
        }
    }
}

/// Things addressable by id
pub trait HasId {
    /// Kind of the thing
    const KIND: Kind;

    /// Base-36 id
    fn id(&self) -> &str;

    /// Fullname (`t<digit>_<id>`)
    fn fullname(&self) -> String {
        format!("{}_{}", Self::KIND, self.id())
    }
}

/// Things with a creation time
pub trait HasCreationTime {
    /// Creation time in Unix seconds, if the server sent one
    fn created_utc(&self) -> Option<f64>;

    /// Creation time as a UTC datetime
    fn created_at(&self) -> Option<DateTime<Utc>> {
        let secs = self.created_utc()?;
        DateTime::from_timestamp(secs.trunc() as i64, 0)
    }
}

/// Things that carry vote counts
pub trait Votable {
    /// Net score
    fn score(&self) -> i64;

    /// Legacy upvotes (equal to score)
    fn ups(&self) -> i64;

    /// Legacy downvotes (always 0)
    fn downs(&self) -> i64;
}

macro_rules! impl_has_id {
    ($($ty:ty => $kind:expr),* $(,)?) => {
        $(
            impl HasId for $ty {
                const KIND: Kind = $kind;

                fn id(&self) -> &str {
                    &self.id
                }
            }
        )*
    };
}

macro_rules! impl_created {
    ($($ty:ty),* $(,)?) => {
        $(
            impl HasCreationTime for $ty {
                fn created_utc(&self) -> Option<f64> {
                    self.created_utc
                }
            }
        )*
    };
}

macro_rules! impl_votable {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Votable for $ty {
                fn score(&self) -> i64 {
                    self.score
                }

                fn ups(&self) -> i64 {
                    self.ups
                }

                fn downs(&self) -> i64 {
                    self.downs
                }
            }
        )*
    };
}

impl_has_id!(
    Comment => Kind::Comment,
    Account => Kind::Account,
    Post => Kind::Post,
    Message => Kind::Message,
    Subreddit => Kind::Subreddit,
    Award => Kind::Award,
);
impl_created!(Comment, Account, Post, Message, Subreddit);
impl_votable!(Comment, Post);

/// Sort order for a comment tree
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentSort {
    /// Best (server default)
    #[default]
    Confidence,
    /// Highest score
    Top,
    /// Newest first
    New,
    /// Most controversial
    Controversial,
    /// Oldest first
    Old,
    /// Q&A mode
    Qa,
}

impl CommentSort {
    /// Query-string value
    pub fn as_str(&self) -> &'static str {
        match self {
            CommentSort::Confidence => "confidence",
            CommentSort::Top => "top",
            CommentSort::New => "new",
            CommentSort::Controversial => "controversial",
            CommentSort::Old => "old",
            CommentSort::Qa => "qa",
        }
    }
}

/// A request for one post and its comment tree
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentsRequest {
    /// Base-36 id of the post
    pub article: String,
    /// Subreddit the post lives in (optional, narrows the path)
    #[serde(default)]
    pub subreddit: Option<String>,
    /// Focus the tree on this comment id
    #[serde(default)]
    pub comment: Option<String>,
    /// Sort order
    #[serde(default)]
    pub sort: Option<CommentSort>,
    /// Maximum number of comments to return
    #[serde(default)]
    pub limit: Option<u32>,
    /// Maximum tree depth the server should return
    #[serde(default)]
    pub depth: Option<u32>,
}

impl CommentsRequest {
    /// Request the comments of `article`
    pub fn new(article: impl Into<String>) -> Self {
        Self {
            article: article.into(),
            ..Default::default()
        }
    }

    /// Restrict the path to `subreddit`
    pub fn in_subreddit(mut self, subreddit: impl Into<String>) -> Self {
        self.subreddit = Some(subreddit.into());
        self
    }

    /// Focus on one comment
    pub fn focus(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Set the sort order
    pub fn sort(mut self, sort: CommentSort) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Limit the number of comments
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Limit the tree depth the server sends
    pub fn depth(mut self, depth: u32) -> Self {
        self.depth = Some(depth);
        self
    }
}

/// A post with its decoded comment tree
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CommentsResult {
    /// The post the comments belong to
    pub post: Post,
    /// Top-level comments, each carrying its replies
    pub comments: Vec<Comment>,
    /// Top-level placeholders for comments not included in the response
    pub more: Vec<More>,
}

impl CommentsResult {
    /// Depth-first iteration over every comment in the tree
    pub fn walk(&self) -> impl Iterator<Item = &Comment> {
        let mut stack: Vec<&Comment> = self.comments.iter().rev().collect();
        std::iter::from_fn(move || {
            let next = stack.pop()?;
            stack.extend(next.replies.iter().rev().filter_map(Reply::as_comment));
            Some(next)
        })
    }
}

/// Treat JSON `null` as the type's default (the API sends null for deleted authors and the like)
fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
