//! API transport
//!
//! [`Transport`] is the seam between the fetcher and the network: it takes an
//! [`ApiRequest`] and returns the raw response body. [`HttpTransport`] is the
//! reqwest-backed implementation with bearer auth, retries and rate-limit
//! header feedback.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::AuthProvider;
use crate::config::{ClientConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::rate_limiter::{RateLimitHeaders, RateLimiter};
use crate::retry::with_retry;
use crate::types::CommentsRequest;

/// A GET request against the API, relative to the base URL
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApiRequest {
    /// Path segments; each one is percent-encoded on its own
    pub segments: Vec<String>,
    /// Query parameters in send order
    pub query: Vec<(String, String)>,
}

impl ApiRequest {
    /// The request path, for logs and error messages
    pub fn path(&self) -> String {
        let mut path = String::new();
        for segment in &self.segments {
            path.push('/');
            path.push_str(segment);
        }
        path
    }
}

impl CommentsRequest {
    /// The API call that fetches this comment tree
    ///
    /// ```
    /// use reddit_dl::types::{CommentSort, CommentsRequest};
    ///
    /// let request = CommentsRequest::new("abc123")
    ///     .in_subreddit("rust")
    ///     .sort(CommentSort::New)
    ///     .to_api_request();
    /// assert_eq!(request.path(), "/r/rust/comments/abc123");
    /// ```
    pub fn to_api_request(&self) -> ApiRequest {
        let mut segments = Vec::with_capacity(6);
        if let Some(subreddit) = &self.subreddit {
            segments.push("r".to_string());
            segments.push(subreddit.clone());
        }
        segments.push("comments".to_string());
        segments.push(self.article.clone());
        if let Some(comment) = &self.comment {
            segments.push("_".to_string());
            segments.push(comment.clone());
        }

        let mut query = Vec::with_capacity(4);
        if let Some(sort) = self.sort {
            query.push(("sort".to_string(), sort.as_str().to_string()));
        }
        if let Some(limit) = self.limit {
            query.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(depth) = self.depth {
            query.push(("depth".to_string(), depth.to_string()));
        }
        query.push(("raw_json".to_string(), "1".to_string()));

        ApiRequest { segments, query }
    }
}

/// Sends API requests and returns raw response bodies
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform `request`, giving up with [`Error::Cancelled`] once `cancel` fires
    async fn send(&self, cancel: &CancellationToken, request: &ApiRequest) -> Result<Vec<u8>>;
}

/// reqwest-backed [`Transport`]
pub struct HttpTransport {
    http_client: reqwest::Client,
    base_url: Url,
    retry: RetryConfig,
    auth: Option<Arc<dyn AuthProvider>>,
    limiter: Option<Arc<dyn RateLimiter>>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url.as_str())
            .field("retry", &self.retry)
            .field("authenticated", &self.auth.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Create a transport for `client.base_url`
    pub fn new(client: &ClientConfig, retry: RetryConfig) -> Result<Self> {
        let base_url = Url::parse(&client.base_url).map_err(|e| {
            Error::config(
                format!("base_url is not a valid URL: {e}"),
                "client.base_url",
            )
        })?;
        if base_url.cannot_be_a_base() {
            return Err(Error::config(
                format!("base_url cannot be a base: {base_url}"),
                "client.base_url",
            ));
        }

        let http_client = reqwest::Client::builder()
            .timeout(client.timeout)
            .user_agent(client.user_agent.as_str())
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
            retry,
            auth: None,
            limiter: None,
        })
    }

    /// Send a bearer token from `auth` with every request
    #[must_use]
    pub fn with_auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Report each response's `x-ratelimit-*` headers to `limiter`
    #[must_use]
    pub fn with_rate_limit_feedback(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    fn url_for(&self, request: &ApiRequest) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::Other(format!("cannot extend base URL {}", self.base_url)))?
            .pop_if_empty()
            .extend(&request.segments);
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }
        Ok(url)
    }

    async fn send_once(&self, url: &Url, path: &str) -> Result<Vec<u8>> {
        let mut builder = self.http_client.get(url.clone());
        if let Some(auth) = &self.auth {
            builder = builder.bearer_auth(auth.bearer_token().await?);
        }

        let response = builder.send().await?;

        if let Some(limiter) = &self.limiter {
            let headers = RateLimitHeaders::from_headers(response.headers());
            if !headers.is_empty() {
                limiter.observe(headers);
            }
        }

        let status = response.status();
        tracing::debug!(path, status = status.as_u16(), "API response");

        match status.as_u16() {
            200..=299 => Ok(response.bytes().await?.to_vec()),
            401 | 403 => {
                if let Some(auth) = &self.auth {
                    auth.invalidate().await;
                }
                Err(Error::Auth(format!("HTTP {} from {path}", status.as_u16())))
            }
            404 => Err(Error::NotFound(path.to_string())),
            429 => Err(Error::RateLimited {
                path: path.to_string(),
            }),
            code => Err(Error::Http {
                status: code,
                path: path.to_string(),
            }),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, cancel: &CancellationToken, request: &ApiRequest) -> Result<Vec<u8>> {
        let path = request.path();
        if cancel.is_cancelled() {
            return Err(Error::cancelled(format!("request {path}")));
        }
        let url = self.url_for(request)?;

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(path = %path, "Request cancelled in flight");
                Err(Error::cancelled(format!("request {path}")))
            }
            result = with_retry(&self.retry, || self.send_once(&url, &path)) => result,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use crate::error::ErrorKind;
    use crate::types::CommentSort;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    fn transport(server: &MockServer, max_attempts: u32) -> HttpTransport {
        let client = ClientConfig {
            base_url: server.uri(),
            ..ClientConfig::default()
        };
        HttpTransport::new(&client, fast_retry(max_attempts)).unwrap()
    }

    fn request(article: &str) -> ApiRequest {
        CommentsRequest::new(article).to_api_request()
    }

    // -----------------------------------------------------------------------
    // Request building
    // -----------------------------------------------------------------------

    #[test]
    fn bare_article_path() {
        let request = CommentsRequest::new("abc123").to_api_request();

        assert_eq!(request.path(), "/comments/abc123");
        assert_eq!(
            request.query,
            vec![("raw_json".to_string(), "1".to_string())]
        );
    }

    #[test]
    fn full_request_path_and_query() {
        let request = CommentsRequest::new("abc123")
            .in_subreddit("rust")
            .focus("k1")
            .sort(CommentSort::Top)
            .limit(100)
            .depth(8)
            .to_api_request();

        assert_eq!(request.path(), "/r/rust/comments/abc123/_/k1");
        let query: Vec<(&str, &str)> = request
            .query
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(
            query,
            vec![
                ("sort", "top"),
                ("limit", "100"),
                ("depth", "8"),
                ("raw_json", "1")
            ]
        );
    }

    #[test]
    fn segments_are_encoded_one_by_one() {
        let client = ClientConfig {
            base_url: "https://api.example.com/v1/".to_string(),
            ..ClientConfig::default()
        };
        let transport = HttpTransport::new(&client, RetryConfig::default()).unwrap();

        let url = transport
            .url_for(&ApiRequest {
                segments: vec!["comments".to_string(), "a/b c".to_string()],
                query: vec![("q".to_string(), "x&y".to_string())],
            })
            .unwrap();

        assert_eq!(
            url.as_str(),
            "https://api.example.com/v1/comments/a%2Fb%20c?q=x%26y"
        );
    }

    #[test]
    fn invalid_base_url_is_a_config_error() {
        let client = ClientConfig {
            base_url: "::not a url::".to_string(),
            ..ClientConfig::default()
        };
        let err = HttpTransport::new(&client, RetryConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    // -----------------------------------------------------------------------
    // Responses
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn success_returns_the_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/comments/abc123"))
            .and(query_param("raw_json", "1"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[1,2]"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport(&server, 0).with_auth(Arc::new(StaticToken::new("tok")));
        let body = transport
            .send(&CancellationToken::new(), &request("abc123"))
            .await
            .unwrap();

        assert_eq!(body, b"[1,2]");
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/comments/gone"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let err = transport(&server, 3)
            .send(&CancellationToken::new(), &request("gone"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NotFound(ref p) if p == "/comments/gone"));
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/comments/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/comments/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let body = transport(&server, 3)
            .send(&CancellationToken::new(), &request("flaky"))
            .await
            .unwrap();

        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn rate_limited_until_retries_run_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let err = transport(&server, 2)
            .send(&CancellationToken::new(), &request("busy"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RateLimited { .. }));
    }

    struct CountingAuth {
        invalidated: AtomicUsize,
    }

    #[async_trait]
    impl AuthProvider for CountingAuth {
        async fn bearer_token(&self) -> Result<String> {
            Ok("stale".to_string())
        }

        async fn invalidate(&self) {
            self.invalidated.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn unauthorized_invalidates_the_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let auth = Arc::new(CountingAuth {
            invalidated: AtomicUsize::new(0),
        });
        let err = transport(&server, 3)
            .with_auth(auth.clone())
            .send(&CancellationToken::new(), &request("abc"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(auth.invalidated.load(Ordering::SeqCst), 1);
    }

    #[derive(Default)]
    struct RecordingLimiter {
        seen: Mutex<Vec<RateLimitHeaders>>,
    }

    #[async_trait]
    impl RateLimiter for RecordingLimiter {
        async fn wait(&self, _cancel: &CancellationToken) -> Result<()> {
            Ok(())
        }

        fn observe(&self, headers: RateLimitHeaders) {
            self.seen.lock().unwrap().push(headers);
        }
    }

    #[tokio::test]
    async fn rate_limit_headers_are_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-ratelimit-remaining", "597.0")
                    .insert_header("x-ratelimit-used", "3")
                    .insert_header("x-ratelimit-reset", "120")
                    .set_body_string("[]"),
            )
            .mount(&server)
            .await;

        let limiter = Arc::new(RecordingLimiter::default());
        transport(&server, 0)
            .with_rate_limit_feedback(limiter.clone())
            .send(&CancellationToken::new(), &request("abc"))
            .await
            .unwrap();

        let seen = limiter.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].remaining, Some(597.0));
        assert_eq!(seen[0].used, Some(3));
        assert_eq!(seen[0].reset, Some(Duration::from_secs(120)));
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn cancelled_token_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = transport(&server, 0)
            .send(&cancel, &request("abc"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn in_flight_request_is_abandoned_on_cancel() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("[]")
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let err = transport(&server, 0)
            .send(&cancel, &request("slow"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
