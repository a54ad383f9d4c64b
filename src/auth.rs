//! Bearer-token providers for authenticated API access

use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::config::{ClientConfig, Credentials};
use crate::error::{Error, Result};

/// Tokens are refreshed this long before the server-side expiry
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Longest lifetime trusted from the token endpoint
const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Supplies the bearer token sent with every API request
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// A currently valid access token
    async fn bearer_token(&self) -> Result<String>;

    /// Forget any cached token after the server rejected it
    async fn invalidate(&self) {}
}

/// A fixed, externally obtained token
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    /// Wrap an access token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(<redacted>)")
    }
}

#[async_trait]
impl AuthProvider for StaticToken {
    async fn bearer_token(&self) -> Result<String> {
        if self.0.is_empty() {
            return Err(Error::Auth("static token is empty".to_string()));
        }
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// OAuth2 password grant for script applications
///
/// The token is fetched on first use and cached until shortly before it
/// expires. Concurrent callers share one refresh.
pub struct PasswordGrant {
    http_client: reqwest::Client,
    token_url: String,
    credentials: Credentials,
    cached: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for PasswordGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordGrant")
            .field("token_url", &self.token_url)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl PasswordGrant {
    /// Create a provider that requests tokens from `client.token_url`
    pub fn new(client: &ClientConfig, credentials: Credentials) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(client.timeout)
            .user_agent(client.user_agent.as_str())
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            token_url: client.token_url.clone(),
            credentials,
            cached: Mutex::new(None),
        })
    }

    async fn request_token(&self) -> Result<CachedToken> {
        tracing::debug!(
            token_url = %self.token_url,
            username = %self.credentials.username,
            "Requesting access token"
        );

        let response = self
            .http_client
            .post(&self.token_url)
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .form(&[
                ("grant_type", "password"),
                ("username", self.credentials.username.as_str()),
                ("password", self.credentials.password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Auth(format!("token endpoint unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Auth(format!(
                "token endpoint answered HTTP {}",
                status.as_u16()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Auth(format!("token response could not be decoded: {e}")))?;
        if let Some(error) = body.error {
            return Err(Error::Auth(format!("token endpoint refused grant: {error}")));
        }
        let token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Auth("token response carried no access_token".to_string()))?;
        let lifetime =
            Duration::from_secs(body.expires_in.unwrap_or(3600)).min(MAX_TOKEN_LIFETIME);
        let now = Instant::now();

        tracing::info!(
            expires_in_secs = lifetime.as_secs(),
            "Obtained access token"
        );
        Ok(CachedToken {
            token,
            expires_at: now.checked_add(lifetime).unwrap_or(now),
        })
    }
}

#[async_trait]
impl AuthProvider for PasswordGrant {
    async fn bearer_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(current) = cached.as_ref()
            && Instant::now() + REFRESH_MARGIN < current.expires_at
        {
            return Ok(current.token.clone());
        }

        let fresh = self.request_token().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    async fn invalidate(&self) {
        if self.cached.lock().await.take().is_some() {
            tracing::debug!("Cached access token invalidated");
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> Credentials {
        Credentials {
            client_id: "app".to_string(),
            client_secret: "secret".to_string(),
            username: "someone".to_string(),
            password: "hunter2".to_string(),
        }
    }

    fn client_config(server: &MockServer) -> ClientConfig {
        ClientConfig {
            token_url: format!("{}/api/v1/access_token", server.uri()),
            ..ClientConfig::default()
        }
    }

    #[tokio::test]
    async fn static_token_is_returned_as_is() {
        let provider = StaticToken::new("abc");
        assert_eq!(provider.bearer_token().await.unwrap(), "abc");
        assert!(!format!("{provider:?}").contains("abc"));
    }

    #[tokio::test]
    async fn empty_static_token_is_an_auth_error() {
        let err = StaticToken::new("").bearer_token().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
    }

    #[tokio::test]
    async fn password_grant_fetches_once_and_caches() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/access_token"))
            .and(header_exists("authorization"))
            .and(body_string_contains("grant_type=password"))
            .and(body_string_contains("username=someone"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok-1",
                "token_type": "bearer",
                "expires_in": 86400,
                "scope": "*"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = PasswordGrant::new(&client_config(&server), credentials()).unwrap();

        assert_eq!(provider.bearer_token().await.unwrap(), "tok-1");
        assert_eq!(provider.bearer_token().await.unwrap(), "tok-1");
    }

    #[tokio::test]
    async fn short_lived_tokens_are_refreshed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok",
                "expires_in": 30
            })))
            .expect(2)
            .mount(&server)
            .await;

        let provider = PasswordGrant::new(&client_config(&server), credentials()).unwrap();
        provider.bearer_token().await.unwrap();
        provider.bearer_token().await.unwrap();
    }

    #[tokio::test]
    async fn invalidate_forces_a_new_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok",
                "expires_in": 3600
            })))
            .expect(2)
            .mount(&server)
            .await;

        let provider = PasswordGrant::new(&client_config(&server), credentials()).unwrap();
        provider.bearer_token().await.unwrap();
        provider.invalidate().await;
        provider.bearer_token().await.unwrap();
    }

    #[tokio::test]
    async fn refused_grant_is_an_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/access_token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"error": "invalid_grant"})),
            )
            .mount(&server)
            .await;

        let provider = PasswordGrant::new(&client_config(&server), credentials()).unwrap();
        let err = provider.bearer_token().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert!(err.to_string().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn unauthorized_token_endpoint_is_an_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/access_token"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let provider = PasswordGrant::new(&client_config(&server), credentials()).unwrap();
        let err = provider.bearer_token().await.unwrap_err();

        assert!(matches!(err, Error::Auth(ref msg) if msg.contains("401")));
    }

    #[tokio::test]
    async fn unreachable_token_endpoint_is_an_auth_error() {
        let server = MockServer::start().await;
        let config = client_config(&server);
        drop(server);

        let provider = PasswordGrant::new(&config, credentials()).unwrap();
        let err = provider.bearer_token().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert!(!crate::retry::IsRetryable::is_retryable(&err));
    }

    #[tokio::test]
    async fn undecodable_token_response_is_an_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let provider = PasswordGrant::new(&client_config(&server), credentials()).unwrap();
        let err = provider.bearer_token().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Authentication);
    }

    #[tokio::test]
    async fn huge_expires_in_is_clamped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok",
                "expires_in": u64::MAX
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = PasswordGrant::new(&client_config(&server), credentials()).unwrap();
        assert_eq!(provider.bearer_token().await.unwrap(), "tok");
        assert_eq!(provider.bearer_token().await.unwrap(), "tok");
    }
}
