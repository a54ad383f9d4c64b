//! Retry logic with exponential backoff
//!
//! Transient transport failures (timeouts, refused connections, 5xx answers,
//! 429 rate limiting) are retried with exponential backoff and optional
//! jitter. Everything else fails on the first attempt.
//!
//! ```no_run
//! use reddit_dl::config::RetryConfig;
//! use reddit_dl::retry::with_retry;
//! use reddit_dl::Error;
//!
//! # async fn example() -> reddit_dl::Result<()> {
//! let body = with_retry(&RetryConfig::default(), || async {
//!     reqwest::get("https://www.reddit.com/comments/abc123.json")
//!         .await?
//!         .error_for_status()?
//!         .bytes()
//!         .await
//!         .map_err(Error::from)
//! })
//! .await?;
//! # let _ = body;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Errors that say whether another attempt could succeed
pub trait IsRetryable {
    /// `true` for transient failures worth another attempt
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Http { status, .. } => *status >= 500,
            Error::RateLimited { .. } => true,
            Error::Config { .. }
            | Error::Parse(_)
            | Error::Validation { .. }
            | Error::NotFound(_)
            | Error::Auth(_)
            | Error::Cancelled(_)
            | Error::Timeout { .. }
            | Error::Batch { .. }
            | Error::Aggregate { .. }
            | Error::TaskFailed { .. }
            | Error::Serialization(_)
            | Error::Other(_) => false,
        }
    }
}

/// Run `operation`, retrying transient failures with exponential backoff
///
/// The operation runs once, then up to `config.max_attempts` more times while
/// it keeps failing with a retryable error. Returns the first success or the
/// last error.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Request succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "Request failed, retrying"
                );

                let wait = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };
                tokio::time::sleep(wait).await;

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "Request failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::debug!(error = %e, "Request failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Scale `delay` by a random factor in `[1, 2]`
fn add_jitter(delay: Duration) -> Duration {
    let jitter_factor: f64 = rand::thread_rng().gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
