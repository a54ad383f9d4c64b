//! Listing decoding and the `[post, comments]` response shape.
//!
//! A listing is atomic: the first child that fails aborts the whole listing
//! with that child's error, tagged with its index.

use serde::Deserialize;
use serde_json::value::RawValue;

use crate::error::ParseError;
use crate::types::{CommentsResult, Envelope, Kind, Listing, Post, Reply, Thing};

use super::{EnvelopeRef, Parser, decode, decode_post, from_json};

#[derive(Deserialize)]
struct ListingData<'a> {
    #[serde(default, borrow)]
    children: Option<Vec<Option<&'a RawValue>>>,
    #[serde(default)]
    before: Option<String>,
    #[serde(default)]
    after: Option<String>,
    #[serde(default)]
    dist: Option<u64>,
}

/// Cursors and counts of a listing, without its children
struct ListingMeta {
    before: Option<String>,
    after: Option<String>,
    dist: Option<u64>,
}

impl Parser {
    /// Decode a `Listing` envelope
    ///
    /// Fails with [`ParseError::KindMismatch`] for any other kind and with
    /// [`ParseError::Child`] naming the index of the first bad child.
    pub fn parse_listing(&self, envelope: &Envelope) -> Result<Listing, ParseError> {
        if envelope.kind != Kind::Listing.as_str() {
            return Err(ParseError::KindMismatch {
                expected: Kind::Listing.to_string(),
                actual: envelope.kind.clone(),
            });
        }
        self.decode_listing(&envelope.data, 0)
    }

    /// Decode listing data whose children sit at `depth`
    ///
    /// A listing directly inside a listing counts as one level of nesting and
    /// is truncated to its cursors past the depth bound, like a reply tree.
    pub(super) fn decode_listing(&self, data: &RawValue, depth: usize) -> Result<Listing, ParseError> {
        let (children, meta) = self.decode_children(data, |envelope| {
            if envelope.kind == Kind::Listing.as_str() {
                self.decode_nested_listing(envelope.data, depth + 1)
                    .map(Thing::Listing)
            } else {
                self.parse_ref(envelope, None, depth)
            }
        })?;
        Ok(Listing {
            children,
            before: meta.before,
            after: meta.after,
            dist: meta.dist,
        })
    }

    fn decode_nested_listing(&self, data: &RawValue, depth: usize) -> Result<Listing, ParseError> {
        if depth <= self.max_depth {
            return self.decode_listing(data, depth);
        }
        tracing::debug!(
            depth,
            max_depth = self.max_depth,
            "Nested listing truncated at maximum depth"
        );
        let listing: ListingData<'_> = decode(Kind::Listing, data)?;
        Ok(Listing {
            children: Vec::new(),
            before: listing.before,
            after: listing.after,
            dist: listing.dist,
        })
    }

    /// Decode listing data whose children must be comments or `more` placeholders
    pub(super) fn decode_reply_listing(
        &self,
        data: &RawValue,
        depth: usize,
    ) -> Result<Vec<Reply>, ParseError> {
        let (replies, _) =
            self.decode_children(data, |envelope| self.decode_reply(envelope, depth))?;
        Ok(replies)
    }

    fn decode_children<T>(
        &self,
        data: &RawValue,
        mut decode_child: impl FnMut(&EnvelopeRef<'_>) -> Result<T, ParseError>,
    ) -> Result<(Vec<T>, ListingMeta), ParseError> {
        let listing: ListingData<'_> = decode(Kind::Listing, data)?;
        let raw_children = listing.children.unwrap_or_default();

        let mut children = Vec::with_capacity(raw_children.len());
        for (index, raw) in raw_children.into_iter().enumerate() {
            let child = EnvelopeRef::from_raw(raw, "listing child is null")
                .and_then(|envelope| decode_child(&envelope))
                .map_err(|e| ParseError::Child {
                    index,
                    source: Box::new(e),
                })?;
            children.push(child);
        }

        Ok((
            children,
            ListingMeta {
                before: listing.before,
                after: listing.after,
                dist: listing.dist,
            },
        ))
    }

    /// Decode the body of a comments request: `[post, comments]`
    ///
    /// The first element may be the post itself or a one-post Listing (the
    /// shape the live API returns); the second must be a Listing of comments
    /// and `more` placeholders.
    pub fn parse_comments_response(&self, bytes: &[u8]) -> Result<CommentsResult, ParseError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(ParseError::nil("empty comments response"));
        }

        let parts: Option<Vec<Option<&RawValue>>> =
            from_json(bytes).map_err(|e| ParseError::Response {
                reason: format!("expected a two-element array: {e}"),
            })?;
        let parts = parts.ok_or_else(|| ParseError::nil("comments response is null"))?;
        let [post_raw, comments_raw]: [Option<&RawValue>; 2] =
            parts.try_into().map_err(|parts: Vec<_>| ParseError::Response {
                reason: format!("expected 2 elements, got {}", parts.len()),
            })?;

        let post = self.decode_response_post(post_raw).map_err(|e| ParseError::Child {
            index: 0,
            source: Box::new(e),
        })?;

        let replies = self
            .decode_response_comments(comments_raw)
            .map_err(|e| ParseError::Child {
                index: 1,
                source: Box::new(e),
            })?;

        let mut result = CommentsResult {
            post,
            ..Default::default()
        };
        for reply in replies {
            match reply {
                Reply::Comment(c) => result.comments.push(c),
                Reply::More(m) => result.more.push(m),
            }
        }
        Ok(result)
    }

    fn decode_response_post(&self, raw: Option<&RawValue>) -> Result<Post, ParseError> {
        let envelope = EnvelopeRef::from_raw(raw, "post element is null")?;
        match envelope.kind()? {
            Kind::Post => decode_post(envelope.data),
            Kind::Listing => {
                let listing = self.decode_listing(envelope.data, 0)?;
                let found = listing.children.len();
                let mut children = listing.children.into_iter();
                match (children.next(), children.next()) {
                    (Some(Thing::Post(post)), None) => Ok(post),
                    (Some(other), None) => Err(ParseError::KindMismatch {
                        expected: Kind::Post.to_string(),
                        actual: other.kind().to_string(),
                    }),
                    _ => Err(ParseError::Response {
                        reason: format!("post listing must hold exactly one post, found {found}"),
                    }),
                }
            }
            other => Err(ParseError::KindMismatch {
                expected: format!("{} or {}", Kind::Post, Kind::Listing),
                actual: other.to_string(),
            }),
        }
    }

    fn decode_response_comments(&self, raw: Option<&RawValue>) -> Result<Vec<Reply>, ParseError> {
        let envelope = EnvelopeRef::from_raw(raw, "comments element is null")?;
        if envelope.kind != Kind::Listing.as_str() {
            return Err(ParseError::KindMismatch {
                expected: Kind::Listing.to_string(),
                actual: envelope.kind.into_owned(),
            });
        }
        self.decode_reply_listing(envelope.data, 0)
    }
}
