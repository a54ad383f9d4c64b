//! Field invariants for decoded things.
//!
//! Each checker takes ownership of a freshly decoded thing, normalizes the
//! legacy fields (`created`/`created_utc`, `ups`/`downs`) and rejects values
//! outside the service's contract.

use crate::error::ParseError;
use crate::types::{Account, Award, Comment, Kind, Message, More, Post, Subreddit};

/// Longest accepted post title, in characters
pub const MAX_TITLE_CHARS: usize = 300;

/// Longest accepted comment body, in characters
pub const MAX_BODY_CHARS: usize = 10_000;

/// How far in the future a creation time may lie
pub const CLOCK_SKEW_GRACE_SECS: f64 = 300.0;

/// The service's launch (2005-06-23T00:00:00Z); nothing is older
pub const SERVICE_EPOCH: f64 = 1_119_484_800.0;

/// Whether `id` is a non-empty base-36 identifier (`[0-9a-z]+`)
pub fn is_base36_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase())
}

/// Whether `value` is a fullname (`t<1-6>_<base36>`)
pub fn is_fullname(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() > 3
        && bytes[0] == b't'
        && (b'1'..=b'6').contains(&bytes[1])
        && bytes[2] == b'_'
        && is_base36_id(&value[3..])
}

fn check_id(kind: Kind, id: &str) -> Result<(), ParseError> {
    if id.is_empty() {
        return Err(ParseError::invalid(kind, "id", "must not be empty"));
    }
    if !is_base36_id(id) {
        return Err(ParseError::invalid(
            kind,
            "id",
            format!("{id:?} is not a base-36 identifier"),
        ));
    }
    Ok(())
}

/// Optional fullname reference: empty is fine, anything else must be well-formed
fn check_fullname(kind: Kind, field: &'static str, value: &str) -> Result<(), ParseError> {
    if value.is_empty() || is_fullname(value) {
        Ok(())
    } else {
        Err(ParseError::invalid(
            kind,
            field,
            format!("{value:?} is not a fullname"),
        ))
    }
}

/// `name` on things with fullnames must name this very thing
fn check_self_name(kind: Kind, id: &str, name: &str) -> Result<(), ParseError> {
    if name.is_empty() {
        return Ok(());
    }
    let expected = format!("{kind}_{id}");
    if name == expected {
        Ok(())
    } else {
        Err(ParseError::invalid(
            kind,
            "name",
            format!("{name:?} does not match {expected:?}"),
        ))
    }
}

fn check_length(kind: Kind, field: &'static str, value: &str, max: usize) -> Result<(), ParseError> {
    let chars = value.chars().count();
    if chars > max {
        return Err(ParseError::invalid(
            kind,
            field,
            format!("{chars} characters exceeds the maximum of {max}"),
        ));
    }
    Ok(())
}

/// Fill a missing timestamp from its twin (`created_utc` wins a disagreement),
/// then bound it between the service epoch and now plus the skew grace.
fn normalize_created(
    kind: Kind,
    created: Option<f64>,
    created_utc: Option<f64>,
) -> Result<(Option<f64>, Option<f64>), ParseError> {
    let Some(ts) = created_utc.or(created) else {
        return Ok((None, None));
    };

    if !ts.is_finite() || ts <= 0.0 {
        return Err(ParseError::invalid(
            kind,
            "created_utc",
            format!("{ts} is not a positive timestamp"),
        ));
    }
    if ts < SERVICE_EPOCH {
        return Err(ParseError::invalid(
            kind,
            "created_utc",
            format!("{ts} predates the service epoch"),
        ));
    }
    let latest = chrono::Utc::now().timestamp() as f64 + CLOCK_SKEW_GRACE_SECS;
    if ts > latest {
        return Err(ParseError::invalid(
            kind,
            "created_utc",
            format!("{ts} lies in the future"),
        ));
    }
    Ok((Some(ts), Some(ts)))
}

pub(super) fn post(mut post: Post) -> Result<Post, ParseError> {
    let kind = Kind::Post;
    check_id(kind, &post.id)?;
    check_self_name(kind, &post.id, &post.name)?;
    check_fullname(kind, "subreddit_id", &post.subreddit_id)?;
    check_length(kind, "title", &post.title, MAX_TITLE_CHARS)?;
    if !(0.0..=1.0).contains(&post.upvote_ratio) {
        return Err(ParseError::invalid(
            kind,
            "upvote_ratio",
            format!("{} is outside [0, 1]", post.upvote_ratio),
        ));
    }
    (post.created, post.created_utc) = normalize_created(kind, post.created, post.created_utc)?;
    post.ups = post.score;
    post.downs = 0;
    Ok(post)
}

/// Flat fields only; replies are attached by the caller
pub(super) fn comment(mut comment: Comment) -> Result<Comment, ParseError> {
    let kind = Kind::Comment;
    check_id(kind, &comment.id)?;
    check_self_name(kind, &comment.id, &comment.name)?;
    check_fullname(kind, "subreddit_id", &comment.subreddit_id)?;
    check_fullname(kind, "parent_id", &comment.parent_id)?;
    check_fullname(kind, "link_id", &comment.link_id)?;
    check_length(kind, "body", &comment.body, MAX_BODY_CHARS)?;
    (comment.created, comment.created_utc) =
        normalize_created(kind, comment.created, comment.created_utc)?;
    comment.ups = comment.score;
    comment.downs = 0;
    Ok(comment)
}

pub(super) fn account(mut account: Account) -> Result<Account, ParseError> {
    let kind = Kind::Account;
    check_id(kind, &account.id)?;
    (account.created, account.created_utc) =
        normalize_created(kind, account.created, account.created_utc)?;
    Ok(account)
}

pub(super) fn message(mut message: Message) -> Result<Message, ParseError> {
    let kind = Kind::Message;
    check_id(kind, &message.id)?;
    check_self_name(kind, &message.id, &message.name)?;
    check_fullname(kind, "parent_id", &message.parent_id)?;
    (message.created, message.created_utc) =
        normalize_created(kind, message.created, message.created_utc)?;
    Ok(message)
}

pub(super) fn subreddit(mut subreddit: Subreddit) -> Result<Subreddit, ParseError> {
    let kind = Kind::Subreddit;
    check_id(kind, &subreddit.id)?;
    check_self_name(kind, &subreddit.id, &subreddit.name)?;
    (subreddit.created, subreddit.created_utc) =
        normalize_created(kind, subreddit.created, subreddit.created_utc)?;
    Ok(subreddit)
}

/// Award ids are not base-36 (`award_<uuid>`, `gid_1`); only require a plain token
pub(super) fn award(award: Award) -> Result<Award, ParseError> {
    let valid = !award.id.is_empty()
        && award
            .id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(award)
    } else {
        Err(ParseError::invalid(
            Kind::Award,
            "id",
            format!("{:?} is not an award identifier", award.id),
        ))
    }
}

/// `_` is the id of "continue this thread" placeholders
pub(super) fn more(more: More) -> Result<More, ParseError> {
    let kind = Kind::More;
    if more.id != "_" {
        check_id(kind, &more.id)?;
    }
    check_fullname(kind, "parent_id", &more.parent_id)?;
    if let Some(bad) = more.children.iter().find(|c| !is_base36_id(c)) {
        return Err(ParseError::invalid(
            kind,
            "children",
            format!("{bad:?} is not a base-36 identifier"),
        ));
    }
    Ok(more)
}
