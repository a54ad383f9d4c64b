//! Configuration types for reddit-dl

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::parser::{DEFAULT_MAX_DEPTH, MAX_DEPTH_LIMIT};

/// Main configuration for the comments client
///
/// Every sub-config has sensible defaults, so `Config::default()` (or an
/// empty JSON object) is a working configuration for anonymous access.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP client settings (endpoints, user agent, timeout)
    #[serde(default)]
    pub client: ClientConfig,

    /// Fetch behavior (concurrency, reply depth, batch deadline)
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Client-side request budget
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Retry behavior for transient transport failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// OAuth credentials (None = unauthenticated requests)
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

impl Config {
    /// Check the settings that have no usable meaning when zero or empty
    pub fn validate(&self) -> Result<()> {
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
        if self.client.base_url.trim().is_empty() {
            return Err(Error::config("base_url must not be empty", "client.base_url"));
        }
        if url::Url::parse(&self.client.base_url).is_err() {
            return Err(Error::config(
                format!("base_url is not a valid URL: {}", self.client.base_url),
                "client.base_url",
            ));
        }
        if self.client.user_agent.trim().is_empty() {
            return Err(Error::config(
                "user_agent must not be empty",
                "client.user_agent",
            ));
        }
        if self.rate_limit.enabled {
            if self.rate_limit.requests_per_period == 0 {
                return Err(Error::config(
                    "requests_per_period must be at least 1 when rate limiting is enabled",
                    "rate_limit.requests_per_period",
                ));
            }
            if self.rate_limit.period.is_zero() {
                return Err(Error::config(
                    "period must be non-zero when rate limiting is enabled",
                    "rate_limit.period",
                ));
            }
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "backoff_multiplier must be at least 1.0",
                "retry.backoff_multiplier",
            ));
        }
        Ok(())
    }
}

/// HTTP client configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// API base URL (default: "https://oauth.reddit.com")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// OAuth token endpoint (default: "https://www.reddit.com/api/v1/access_token")
    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_url: default_token_url(),
            user_agent: default_user_agent(),
            timeout: default_request_timeout(),
        }
    }
}

/// How a batch reacts to a failing request
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure in its slot and keep fetching the rest
    #[default]
    CollectAll,
    /// Cancel the batch on the first failure and return that error
    FailFast,
}

/// Fetch behavior configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Maximum requests in flight at once (default: 10)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Reply depth expanded by the parser (default: 50)
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Deadline for a whole batch (None = no deadline)
    #[serde(default, with = "optional_duration_serde")]
    pub batch_timeout: Option<Duration>,

    /// Reaction to failing requests in a batch (default: collect all)
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_depth: default_max_depth(),
            batch_timeout: None,
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// Client-side rate limiting configuration
///
/// The defaults mirror the documented OAuth budget of 600 requests per
/// 10 minutes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable client-side rate limiting (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Requests allowed per period (default: 600)
    #[serde(default = "default_requests_per_period")]
    pub requests_per_period: u32,

    /// Length of the budget period (default: 600 seconds)
    #[serde(default = "default_period", with = "duration_serde")]
    pub period: Duration,

    /// Requests that may be issued back to back before pacing starts (default: 10)
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_period: default_requests_per_period(),
            period: default_period(),
            burst: default_burst(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// OAuth2 "script" application credentials for the password grant
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// Application client id
    pub client_id: String,
    /// Application client secret
    pub client_secret: String,
    /// Account username
    pub username: String,
    /// Account password
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn default_base_url() -> String {
    "https://oauth.reddit.com".to_string()
}

fn default_token_url() -> String {
    "https://www.reddit.com/api/v1/access_token".to_string()
}

fn default_user_agent() -> String {
    concat!("rust:reddit-dl:v", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_concurrency() -> usize {
    10
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_true() -> bool {
    true
}

fn default_requests_per_period() -> u32 {
    600
}

fn default_period() -> Duration {
    Duration::from_secs(600)
}

fn default_burst() -> u32 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
