//! Comment decoding with depth-bounded reply recursion.

use serde::Deserialize;
use serde_json::value::RawValue;

use crate::error::ParseError;
use crate::types::{Comment, Kind, Reply};

use super::{EnvelopeRef, Parser, decode, decode_more, from_json, validate};

/// The `replies` field on its own: absent, `""`, `null`, or a Listing envelope
#[derive(Deserialize)]
struct RepliesField<'a> {
    #[serde(default, borrow)]
    replies: Option<&'a RawValue>,
}

impl Parser {
    /// Decode a comment sitting at `depth` (root = 0) and, unless the depth
    /// bound is reached, its replies.
    pub(super) fn decode_comment(&self, data: &RawValue, depth: usize) -> Result<Comment, ParseError> {
        let comment: Comment = decode(Kind::Comment, data)?;
        let mut comment = validate::comment(comment)?;

        let RepliesField { replies } = decode(Kind::Comment, data)?;
        let Some(raw) = replies else {
            return Ok(comment);
        };
        if is_empty_replies(raw) {
            return Ok(comment);
        }

        if depth >= self.max_depth {
            tracing::debug!(
                comment = %comment.id,
                depth,
                max_depth = self.max_depth,
                "Reply tree truncated at maximum depth"
            );
            return Ok(comment);
        }

        comment.replies = self
            .decode_replies(raw, depth + 1)
            .map_err(|e| ParseError::Replies {
                id: comment.id.clone(),
                source: Box::new(e),
            })?;
        Ok(comment)
    }

    /// Decode a replies Listing envelope whose children sit at `depth`
    fn decode_replies(&self, raw: &RawValue, depth: usize) -> Result<Vec<Reply>, ParseError> {
        if raw.get().starts_with('"') {
            return Err(ParseError::invalid(
                Kind::Comment,
                "replies",
                "expected an empty string or a Listing",
            ));
        }
        let envelope: EnvelopeRef<'_> = from_json(raw.get().as_bytes())
            .map_err(|source| ParseError::Envelope { source })?;
        if envelope.kind != Kind::Listing.as_str() {
            return Err(ParseError::KindMismatch {
                expected: Kind::Listing.to_string(),
                actual: envelope.kind.into_owned(),
            });
        }
        self.decode_reply_listing(envelope.data, depth)
    }

    /// Decode one child of a comment listing: a comment or a `more` placeholder
    pub(super) fn decode_reply(
        &self,
        envelope: &EnvelopeRef<'_>,
        depth: usize,
    ) -> Result<Reply, ParseError> {
        match envelope.kind()? {
            Kind::Comment => self.decode_comment(envelope.data, depth).map(Reply::Comment),
            Kind::More => decode_more(envelope.data).map(Reply::More),
            other => Err(ParseError::KindMismatch {
                expected: format!("{} or {}", Kind::Comment, Kind::More),
                actual: other.to_string(),
            }),
        }
    }
}

/// `""` and `null` both mean "no replies"
fn is_empty_replies(raw: &RawValue) -> bool {
    matches!(raw.get(), "\"\"" | "null")
}
