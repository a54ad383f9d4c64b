//! Kind dispatch -- turns envelopes into typed things.
//!
//! Split into focused submodules:
//! - [`comment`] - Comment decoding and the depth-bounded reply recursion
//! - [`listing`] - Listing decoding and the `[post, comments]` response shape
//! - [`validate`] - Field invariants checked on every decoded thing
//!
//! Payloads stay as raw JSON until the kind is known, and each decode step
//! only looks one level into the document. Unknown fields (however deeply
//! nested) are skipped without recursion, so hostile documents cannot blow
//! the stack; the only recursion is over reply trees, bounded by
//! [`Parser::max_depth`].

mod comment;
mod listing;
mod validate;


use std::borrow::Cow;

use serde::Deserialize;
use serde_json::value::RawValue;

use crate::error::ParseError;
use crate::types::{Account, Award, Envelope, Kind, Message, More, Post, Subreddit, Thing};

pub use validate::{
    CLOCK_SKEW_GRACE_SECS, MAX_BODY_CHARS, MAX_TITLE_CHARS, SERVICE_EPOCH, is_base36_id,
    is_fullname,
};

/// Default bound on reply recursion
pub const DEFAULT_MAX_DEPTH: usize = 50;

/// Largest reply depth a parser will expand
///
/// Decoding recurses once per reply level, so this keeps the stack bounded
/// on a default-sized thread whatever depth is configured.
pub const MAX_DEPTH_LIMIT: usize = 200;

/// Borrowed view of an envelope, decoded straight out of a parent's raw payload
#[derive(Deserialize)]
pub(crate) struct EnvelopeRef<'a> {
    #[serde(borrow)]
    kind: Cow<'a, str>,
    #[serde(borrow)]
    data: &'a RawValue,
}

impl<'a> EnvelopeRef<'a> {
    fn from_envelope(envelope: &'a Envelope) -> Self {
        Self {
            kind: Cow::Borrowed(envelope.kind.as_str()),
            data: &envelope.data,
        }
    }

    /// Decode a child envelope; `None` is a `null` slot in the parent
    fn from_raw(raw: Option<&'a RawValue>, context: &str) -> Result<Self, ParseError> {
        let raw = raw.ok_or_else(|| ParseError::nil(context.to_string()))?;
        from_json(raw.get().as_bytes()).map_err(|source| ParseError::Envelope { source })
    }

    fn kind(&self) -> Result<Kind, ParseError> {
        self.kind.parse()
    }
}

/// Decodes envelopes into [`Thing`]s
///
/// Parsing is a pure function of the input bytes (apart from the wall-clock
/// bound on creation times), so parsing the same envelope twice yields equal
/// things.
///
/// # Example
///
/// ```
/// use reddit_dl::parser::Parser;
/// use reddit_dl::types::{Kind, Thing};
///
/// let parser = Parser::default();
/// let thing = parser
///     .parse_slice(br#"{"kind":"t3","data":{"id":"abc123","title":"Hello"}}"#, Some(Kind::Post))
///     .unwrap();
/// match thing {
///     Thing::Post(post) => assert_eq!(post.title, "Hello"),
///     other => panic!("unexpected {:?}", other.kind()),
/// }
/// ```
#[derive(Clone, Copy, Debug)]
pub struct Parser {
    max_depth: usize,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl Parser {
    /// Create a parser that expands reply trees down to `max_depth`
    ///
    /// A comment at depth `max_depth` (the root is depth 0) is returned with
    /// no replies, so a decoded tree has at most `max_depth + 1` levels.
    /// Values above [`MAX_DEPTH_LIMIT`] are clamped to it.
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth: max_depth.min(MAX_DEPTH_LIMIT),
        }
    }

    /// Maximum reply depth that is expanded
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Decode one envelope
    ///
    /// When `expected` is given, an envelope of any other kind fails with
    /// [`ParseError::KindMismatch`].
    pub fn parse(&self, envelope: &Envelope, expected: Option<Kind>) -> Result<Thing, ParseError> {
        self.parse_ref(&EnvelopeRef::from_envelope(envelope), expected, 0)
    }

    /// Decode one envelope from raw bytes
    ///
    /// Empty input and a JSON `null` document fail with [`ParseError::NilInput`].
    pub fn parse_slice(&self, bytes: &[u8], expected: Option<Kind>) -> Result<Thing, ParseError> {
        let envelope = Envelope::from_slice(bytes)?;
        self.parse(&envelope, expected)
    }

    fn parse_ref(
        &self,
        envelope: &EnvelopeRef<'_>,
        expected: Option<Kind>,
        depth: usize,
    ) -> Result<Thing, ParseError> {
        let kind = envelope.kind()?;
        if let Some(expected) = expected
            && expected != kind
        {
            return Err(ParseError::KindMismatch {
                expected: expected.to_string(),
                actual: kind.to_string(),
            });
        }
        self.dispatch(kind, envelope.data, depth)
    }

    fn dispatch(&self, kind: Kind, data: &RawValue, depth: usize) -> Result<Thing, ParseError> {
        match kind {
            Kind::Comment => self.decode_comment(data, depth).map(Thing::Comment),
            Kind::Account => {
                let account: Account = decode(kind, data)?;
                validate::account(account).map(Thing::Account)
            }
            Kind::Post => decode_post(data).map(Thing::Post),
            Kind::Message => {
                let message: Message = decode(kind, data)?;
                validate::message(message).map(Thing::Message)
            }
            Kind::Subreddit => {
                let subreddit: Subreddit = decode(kind, data)?;
                validate::subreddit(subreddit).map(Thing::Subreddit)
            }
            Kind::Award => {
                let award: Award = decode(kind, data)?;
                validate::award(award).map(Thing::Award)
            }
            Kind::Listing => self.decode_listing(data, depth).map(Thing::Listing),
            Kind::More => decode_more(data).map(Thing::More),
        }
    }
}

/// Deserialize without serde_json's nesting limit.
///
/// Every target type here is shallow; deep input can only reach the raw-value
/// and ignored-field paths, which skip nested values iteratively.
pub(crate) fn from_json<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> serde_json::Result<T> {
    let mut de = serde_json::Deserializer::from_slice(bytes);
    de.disable_recursion_limit();
    let value = T::deserialize(&mut de)?;
    de.end()?;
    Ok(value)
}

/// Decode a payload of a known kind
fn decode<'a, T: Deserialize<'a>>(kind: Kind, data: &'a RawValue) -> Result<T, ParseError> {
    from_json(data.get().as_bytes()).map_err(|source| ParseError::Decode { kind, source })
}

fn decode_post(data: &RawValue) -> Result<Post, ParseError> {
    let post: Post = decode(Kind::Post, data)?;
    validate::post(post)
}

fn decode_more(data: &RawValue) -> Result<More, ParseError> {
    let more: More = decode(Kind::More, data)?;
    validate::more(more)
}
