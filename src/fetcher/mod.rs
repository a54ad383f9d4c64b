//! Comment fetching -- one tree at a time or many under a concurrency ceiling.
//!
//! Split into focused submodules:
//! - [`task`] - A single fetch: validate, wait on the rate limiter, send, decode
//! - [`batch`] - Bounded-concurrency fan-out with ordered results and cancellation

mod batch;
mod task;


use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::auth::PasswordGrant;
use crate::config::{Config, FetchConfig};
use crate::error::{Error, Result};
use crate::parser::{MAX_DEPTH_LIMIT, Parser};
use crate::rate_limiter::{RateLimiter, TokenBucket, Unlimited};
use crate::transport::{HttpTransport, Transport};
use crate::validation::{RegexValidator, Validator};

pub use crate::config::FailurePolicy;
pub use batch::BatchResults;

/// Fetches comment trees through a [`Transport`]
///
/// Cloning is cheap; clones share the transport, the rate limiter and the
/// in-flight gauge.
///
/// # Example
///
/// ```no_run
/// use reddit_dl::{CommentsFetcher, CommentsRequest, Config};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> reddit_dl::Result<()> {
/// let fetcher = CommentsFetcher::from_config(&Config::default())?;
/// let cancel = CancellationToken::new();
///
/// let requests = vec![CommentsRequest::new("abc123"), CommentsRequest::new("def456")];
/// let results = fetcher.fetch_many(&cancel, requests).await?;
/// for (index, tree) in results.successes() {
///     println!("{index}: {} comments", tree.walk().count());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CommentsFetcher {
    inner: Arc<FetcherInner>,
}

struct FetcherInner {
    transport: Arc<dyn Transport>,
    limiter: Arc<dyn RateLimiter>,
    validator: Arc<dyn Validator>,
    parser: Parser,
    max_concurrency: usize,
    batch_timeout: Option<Duration>,
    failure_policy: FailurePolicy,
    /// Fetches currently running (single and batched)
    active: Arc<AtomicUsize>,
}

impl std::fmt::Debug for CommentsFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommentsFetcher")
            .field("max_concurrency", &self.inner.max_concurrency)
            .field("max_depth", &self.inner.parser.max_depth())
            .field("batch_timeout", &self.inner.batch_timeout)
            .field("failure_policy", &self.inner.failure_policy)
            .field("active_tasks", &self.active_tasks())
            .finish_non_exhaustive()
    }
}

impl CommentsFetcher {
    /// Start building a fetcher around a custom transport
    pub fn builder() -> CommentsFetcherBuilder {
        CommentsFetcherBuilder::default()
    }

    /// Build a fetcher with the HTTP transport, token-bucket limiter and
    /// regex validator described by `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let limiter: Arc<dyn RateLimiter> = if config.rate_limit.enabled {
            Arc::new(TokenBucket::from_config(&config.rate_limit))
        } else {
            Arc::new(Unlimited)
        };

        let mut transport = HttpTransport::new(&config.client, config.retry.clone())?
            .with_rate_limit_feedback(Arc::clone(&limiter));
        if let Some(credentials) = &config.credentials {
            let auth = PasswordGrant::new(&config.client, credentials.clone())?;
            transport = transport.with_auth(Arc::new(auth));
        }

        Self::builder()
            .transport(Arc::new(transport))
            .rate_limiter(limiter)
            .fetch_config(config.fetch.clone())
            .build()
    }

    /// Number of fetches currently in flight
    ///
    /// Every fetch started by [`fetch_many`](Self::fetch_many) has finished
    /// by the time it returns, so this is zero afterwards unless other
    /// fetches run concurrently.
    pub fn active_tasks(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// The parser used to decode responses
    pub fn parser(&self) -> &Parser {
        &self.inner.parser
    }
}

/// Builder for [`CommentsFetcher`]
#[derive(Default)]
pub struct CommentsFetcherBuilder {
    transport: Option<Arc<dyn Transport>>,
    limiter: Option<Arc<dyn RateLimiter>>,
    validator: Option<Arc<dyn Validator>>,
    fetch: FetchConfig,
}

impl CommentsFetcherBuilder {
    /// Transport used for every request (required)
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Shared rate limiter (default: [`Unlimited`])
    #[must_use]
    pub fn rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Request field validator (default: [`RegexValidator`])
    #[must_use]
    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Replace all fetch settings at once
    #[must_use]
    pub fn fetch_config(mut self, fetch: FetchConfig) -> Self {
        self.fetch = fetch;
        self
    }

    /// Maximum requests in flight per batch
    #[must_use]
    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.fetch.max_concurrency = max_concurrency;
        self
    }

    /// Reply depth expanded by the parser, at most [`MAX_DEPTH_LIMIT`]
    #[must_use]
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.fetch.max_depth = max_depth;
        self
    }

    /// Deadline for a whole batch
    #[must_use]
    pub fn batch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch.batch_timeout = Some(timeout);
        self
    }

    /// Reaction to failing requests in a batch
    #[must_use]
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.fetch.failure_policy = policy;
        self
    }

    /// Check the settings and build the fetcher
    pub fn build(self) -> Result<CommentsFetcher> {
        let transport = self
            .transport
            .ok_or_else(|| Error::config("a transport is required", "transport"))?;
        if self.fetch.max_concurrency == 0 {
            return Err(Error::config(
                "max_concurrency must be at least 1",
                "fetch.max_concurrency",
            ));
        }
        if self.fetch.max_depth > MAX_DEPTH_LIMIT {
            return Err(Error::config(
                format!("max_depth must be at most {MAX_DEPTH_LIMIT}"),
                "fetch.max_depth",
            ));
        }
        let validator = match self.validator {
            Some(validator) => validator,
            None => Arc::new(RegexValidator::new()?),
        };

        Ok(CommentsFetcher {
            inner: Arc::new(FetcherInner {
                transport,
                limiter: self.limiter.unwrap_or_else(|| Arc::new(Unlimited)),
                validator,
                parser: Parser::new(self.fetch.max_depth),
                max_concurrency: self.fetch.max_concurrency,
                batch_timeout: self.fetch.batch_timeout,
                failure_policy: self.fetch.failure_policy,
                active: Arc::new(AtomicUsize::new(0)),
            }),
        })
    }
}

/// Counts one running fetch for as long as it is alive
///
/// Dropped on every exit path (return, error, cancellation, panic).
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
