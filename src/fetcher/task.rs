//! A single comments fetch.

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::types::{CommentsRequest, CommentsResult};
use crate::validation::Field;

use super::{CommentsFetcher, InFlight};

impl CommentsFetcher {
    /// Fetch and decode the comment tree described by `request`
    ///
    /// The request is validated before anything is sent, then the call waits
    /// on the shared rate limiter and issues exactly one transport request.
    /// Cancellation is observed before the limiter, while waiting and while
    /// the request is in flight; a body that arrives after cancellation is
    /// not parsed.
    pub async fn fetch(
        &self,
        cancel: &CancellationToken,
        request: &CommentsRequest,
    ) -> Result<CommentsResult> {
        let _in_flight = InFlight::enter(&self.inner.active);
        self.fetch_one(cancel, request).await
    }

    pub(super) async fn fetch_one(
        &self,
        cancel: &CancellationToken,
        request: &CommentsRequest,
    ) -> Result<CommentsResult> {
        if cancel.is_cancelled() {
            return Err(Error::cancelled(format!("fetch of {}", request.article)));
        }
        self.validate_request(request)?;

        self.inner.limiter.wait(cancel).await?;

        let api_request = request.to_api_request();
        tracing::debug!(
            article = %request.article,
            path = %api_request.path(),
            "Fetching comments"
        );

        let body = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(Error::cancelled(format!("fetch of {}", request.article)));
            }
            body = self.inner.transport.send(cancel, &api_request) => body?,
        };

        if cancel.is_cancelled() {
            return Err(Error::cancelled(format!("fetch of {}", request.article)));
        }

        let result = self.inner.parser.parse_comments_response(&body)?;
        tracing::debug!(
            article = %request.article,
            bytes = body.len(),
            comments = result.comments.len(),
            more = result.more.len(),
            "Decoded comment tree"
        );
        Ok(result)
    }

    fn validate_request(&self, request: &CommentsRequest) -> Result<()> {
        let validator = &self.inner.validator;
        validator.validate(Field::Article, &request.article)?;
        if let Some(subreddit) = &request.subreddit {
            validator.validate(Field::Subreddit, subreddit)?;
        }
        if let Some(comment) = &request.comment {
            validator.validate(Field::Comment, comment)?;
        }
        Ok(())
    }
}
