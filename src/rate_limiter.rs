//! Request rate limiting
//!
//! Every fetch waits on a shared [`RateLimiter`] before it reaches the
//! transport. [`TokenBucket`] paces requests to a configured budget and also
//! honors the server's own `x-ratelimit-*` accounting reported through
//! [`RateLimiter::observe`].

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::RateLimitConfig;
use crate::error::{Error, Result};

/// One request's worth of tokens, in milli-tokens
const TOKEN: u64 = 1_000;

/// Longest single sleep between budget checks
const MAX_POLL: Duration = Duration::from_millis(250);

/// The server's view of the request budget, taken from response headers
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RateLimitHeaders {
    /// Requests left in the current window (`x-ratelimit-remaining`)
    pub remaining: Option<f64>,
    /// Requests used in the current window (`x-ratelimit-used`)
    pub used: Option<u64>,
    /// Time until the window resets (`x-ratelimit-reset`, seconds)
    pub reset: Option<Duration>,
}

impl RateLimitHeaders {
    /// Read the `x-ratelimit-*` headers; missing or unparsable values are `None`
    pub fn from_headers(headers: &HeaderMap) -> Self {
        fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
            headers.get(name)?.to_str().ok().map(str::trim)
        }

        Self {
            remaining: header(headers, "x-ratelimit-remaining").and_then(|v| v.parse().ok()),
            used: header(headers, "x-ratelimit-used").and_then(|v| v.parse().ok()),
            reset: header(headers, "x-ratelimit-reset")
                .and_then(|v| v.parse::<f64>().ok())
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok()),
        }
    }

    /// Whether any rate-limit header was present
    pub fn is_empty(&self) -> bool {
        self.remaining.is_none() && self.used.is_none() && self.reset.is_none()
    }
}

/// Shared gate every request passes before it is sent
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Wait until one more request may be sent
    ///
    /// Returns [`Error::Cancelled`] as soon as `cancel` fires.
    async fn wait(&self, cancel: &CancellationToken) -> Result<()>;

    /// Feed back the budget the server reported on a response
    fn observe(&self, _headers: RateLimitHeaders) {}
}

/// A limiter that never waits
#[derive(Clone, Copy, Debug, Default)]
pub struct Unlimited;

#[async_trait]
impl RateLimiter for Unlimited {
    async fn wait(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::cancelled("rate limiter wait"));
        }
        Ok(())
    }
}

/// Lock-free token bucket of request permits
///
/// Tokens refill continuously at `requests_per_period / period` and the
/// bucket holds at most `burst` requests. When the server reports an
/// exhausted budget, every caller is held until the advertised reset.
#[derive(Debug)]
pub struct TokenBucket {
    /// Bucket capacity in milli-tokens
    capacity: u64,
    /// Refill rate in milli-tokens per second
    refill_rate: f64,
    /// Available milli-tokens
    tokens: AtomicU64,
    /// Last refill timestamp (nanoseconds since an arbitrary epoch)
    last_refill: AtomicU64,
    /// No request may start before this timestamp (0 = not paused)
    paused_until: AtomicU64,
}

impl TokenBucket {
    /// Create a bucket allowing `requests_per_period` requests per `period`,
    /// with at most `burst` of them back to back
    ///
    /// ```
    /// use reddit_dl::rate_limiter::TokenBucket;
    /// use std::time::Duration;
    ///
    /// // 600 requests per 10 minutes, 10 at once
    /// let limiter = TokenBucket::new(600, Duration::from_secs(600), 10);
    /// assert_eq!(limiter.available(), 10);
    /// ```
    #[must_use]
    pub fn new(requests_per_period: u32, period: Duration, burst: u32) -> Self {
        let capacity = u64::from(burst.max(1)) * TOKEN;
        let period_secs = period.as_secs_f64().max(f64::MIN_POSITIVE);
        Self {
            capacity,
            refill_rate: f64::from(requests_per_period) * TOKEN as f64 / period_secs,
            tokens: AtomicU64::new(capacity),
            last_refill: AtomicU64::new(now_nanos()),
            paused_until: AtomicU64::new(0),
        }
    }

    /// Build a bucket from configuration
    #[must_use]
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests_per_period, config.period, config.burst)
    }

    /// Whole requests that may be sent right now
    pub fn available(&self) -> u64 {
        self.refill_tokens();
        self.tokens.load(Ordering::SeqCst) / TOKEN
    }

    fn try_take(&self) -> bool {
        self.refill_tokens();
        self.tokens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| t.checked_sub(TOKEN))
            .is_ok()
    }

    /// Time until one whole token is available at the refill rate
    fn time_to_next_token(&self) -> Duration {
        let missing = TOKEN.saturating_sub(self.tokens.load(Ordering::SeqCst));
        if self.refill_rate <= 0.0 {
            return MAX_POLL;
        }
        Duration::from_secs_f64(missing as f64 / self.refill_rate)
    }

    fn pause_remaining(&self) -> Option<Duration> {
        let until = self.paused_until.load(Ordering::SeqCst);
        let now = now_nanos();
        (until > now).then(|| Duration::from_nanos(until - now))
    }

    fn refill_tokens(&self) {
        let now = now_nanos();
        let last = self.last_refill.load(Ordering::SeqCst);
        let elapsed_secs = now.saturating_sub(last) as f64 / 1_000_000_000.0;
        let to_add = (self.refill_rate * elapsed_secs) as u64;

        if to_add > 0
            && self
                .last_refill
                .compare_exchange(last, now, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            let capacity = self.capacity;
            let _ = self
                .tokens
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| {
                    Some(t.saturating_add(to_add).min(capacity))
                });
        }
    }
}

#[async_trait]
impl RateLimiter for TokenBucket {
    async fn wait(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(Error::cancelled("rate limiter wait"));
            }

            let delay = match self.pause_remaining() {
                Some(pause) => pause,
                None if self.try_take() => return Ok(()),
                None => self.time_to_next_token(),
            };

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::cancelled("rate limiter wait")),
                _ = tokio::time::sleep(delay.clamp(Duration::from_millis(1), MAX_POLL)) => {}
            }
        }
    }

    fn observe(&self, headers: RateLimitHeaders) {
        let (Some(remaining), Some(reset)) = (headers.remaining, headers.reset) else {
            return;
        };
        if remaining >= 1.0 {
            return;
        }

        let reset_nanos = u64::try_from(reset.as_nanos()).unwrap_or(u64::MAX);
        let until = now_nanos().saturating_add(reset_nanos);
        let previous = self.paused_until.fetch_max(until, Ordering::SeqCst);
        if previous < until {
            tracing::warn!(
                used = headers.used,
                reset_ms = reset.as_millis(),
                "Server request budget exhausted, pausing until reset"
            );
        }
    }
}

/// Monotonic time in nanoseconds since the first call in this process
fn now_nanos() -> u64 {
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let start = START.get_or_init(Instant::now);
    start.elapsed().as_nanos() as u64
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[tokio::test]
    async fn burst_is_available_immediately() {
        let limiter = TokenBucket::new(1, Duration::from_secs(3600), 5);
        let cancel = CancellationToken::new();

        let start = Instant::now();
        for _ in 0..5 {
            limiter.wait(&cancel).await.unwrap();
        }

        assert!(start.elapsed() < Duration::from_millis(50));
        assert_eq!(limiter.available(), 0);
    }

    #[tokio::test]
    async fn requests_past_the_burst_are_paced() {
        // 50 per second: one token every 20ms
        let limiter = TokenBucket::new(50, Duration::from_secs(1), 1);
        let cancel = CancellationToken::new();

        let start = Instant::now();
        for _ in 0..4 {
            limiter.wait(&cancel).await.unwrap();
        }
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(50), "waited {elapsed:?}");
        assert!(elapsed < Duration::from_secs(1), "waited {elapsed:?}");
    }

    #[tokio::test]
    async fn zero_burst_still_admits_one_request() {
        let limiter = TokenBucket::new(10, Duration::from_secs(1), 0);
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test]
    async fn waiting_is_cancellable() {
        let limiter = TokenBucket::new(1, Duration::from_secs(3600), 1);
        let cancel = CancellationToken::new();
        limiter.wait(&cancel).await.unwrap();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let err = limiter.wait(&cancel).await.unwrap_err();

        assert!(err.is_cancellation());
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn already_cancelled_token_fails_without_consuming() {
        let limiter = TokenBucket::new(10, Duration::from_secs(1), 3);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(limiter.wait(&cancel).await.is_err());
        assert_eq!(limiter.available(), 3);
    }

    #[tokio::test]
    async fn exhausted_server_budget_pauses_callers() {
        let limiter = TokenBucket::new(600, Duration::from_secs(600), 10);
        limiter.observe(RateLimitHeaders {
            remaining: Some(0.0),
            used: Some(600),
            reset: Some(Duration::from_millis(150)),
        });

        let start = Instant::now();
        limiter.wait(&CancellationToken::new()).await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(140));
    }

    #[tokio::test]
    async fn remaining_budget_does_not_pause() {
        let limiter = TokenBucket::new(600, Duration::from_secs(600), 10);
        limiter.observe(RateLimitHeaders {
            remaining: Some(42.0),
            used: Some(558),
            reset: Some(Duration::from_secs(300)),
        });

        let start = Instant::now();
        limiter.wait(&CancellationToken::new()).await.unwrap();

        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn unlimited_never_waits_but_honors_cancellation() {
        let cancel = CancellationToken::new();
        for _ in 0..1000 {
            Unlimited.wait(&cancel).await.unwrap();
        }

        cancel.cancel();
        assert!(Unlimited.wait(&cancel).await.is_err());
    }

    #[test]
    fn headers_are_parsed_leniently() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("598.0"));
        headers.insert("x-ratelimit-used", HeaderValue::from_static("2"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static(" 417 "));

        let parsed = RateLimitHeaders::from_headers(&headers);
        assert_eq!(parsed.remaining, Some(598.0));
        assert_eq!(parsed.used, Some(2));
        assert_eq!(parsed.reset, Some(Duration::from_secs(417)));

        let mut garbage = HeaderMap::new();
        garbage.insert("x-ratelimit-reset", HeaderValue::from_static("-5"));
        garbage.insert("x-ratelimit-used", HeaderValue::from_static("lots"));
        let parsed = RateLimitHeaders::from_headers(&garbage);
        assert!(parsed.is_empty());
    }

    #[test]
    fn oversized_reset_header_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1e30"));

        let parsed = RateLimitHeaders::from_headers(&headers);
        assert_eq!(parsed.remaining, Some(0.0));
        assert_eq!(parsed.reset, None);

        let limiter = TokenBucket::new(600, Duration::from_secs(600), 10);
        limiter.observe(parsed);
        assert!(limiter.pause_remaining().is_none());
    }

    #[tokio::test]
    async fn longest_possible_reset_pauses_without_overflow() {
        let limiter = TokenBucket::new(600, Duration::from_secs(600), 10);
        limiter.observe(RateLimitHeaders {
            remaining: Some(0.0),
            used: None,
            reset: Some(Duration::MAX),
        });
        assert!(limiter.pause_remaining().is_some());

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            canceller.cancel();
        });

        let err = limiter.wait(&cancel).await.unwrap_err();
        assert!(err.is_cancellation());
    }
}
