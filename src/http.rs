//! Shared outbound HTTP client
//!
//! All outbound requests (upstream fingerprint checks and provider fetches)
//! go through [`HttpClient`], which applies one policy: a per-request
//! timeout, a bounded number of attempts with exponential backoff, and no
//! retry on 4xx responses.

use crate::error::{CacheError, Result};
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

/// Environment variable holding an optional GitHub token
pub const ENV_GITHUB_TOKEN: &str = "GITHUB_TOKEN";
/// Environment variable overriding the per-request timeout (seconds)
pub const ENV_HTTP_TIMEOUT_SECS: &str = "MATERIAL3_HTTP_TIMEOUT_SECS";

/// Retry and timeout policy for outbound requests
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Timeout for a single attempt
    pub timeout: Duration,
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry; doubled on every further retry
    pub initial_backoff: Duration,
    /// Upper bound for a single backoff delay
    pub max_backoff: Duration,
    /// Bearer token sent to the GitHub API
    pub github_token: Option<String>,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
            github_token: None,
            user_agent: format!("material3-cache/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpConfig {
    /// Defaults overridden by `GITHUB_TOKEN` and `MATERIAL3_HTTP_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = Self::default();

        if let Ok(token) = std::env::var(ENV_GITHUB_TOKEN) {
            if !token.trim().is_empty() {
                config.github_token = Some(token.trim().to_string());
            }
        }

        if let Ok(raw) = std::env::var(ENV_HTTP_TIMEOUT_SECS) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                CacheError::Config(format!(
                    "{} must be an integer, got {:?}",
                    ENV_HTTP_TIMEOUT_SECS, raw
                ))
            })?;
            config.timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Backoff before retry number `retry` (1-based), without jitter
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1).min(16));
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// reqwest client plus the retry policy
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    config: HttpConfig,
}

impl HttpClient {
    pub fn new(config: HttpConfig) -> Result<Self> {
        if config.max_attempts == 0 {
            return Err(CacheError::Config(
                "max_attempts must be greater than 0".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CacheError::Config(e.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// GET `url` and decode the body as JSON
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.send_with_retry(url, "application/vnd.github+json").await?;
        let bytes = response.bytes().await.map_err(|e| self.map_error(url, e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// GET `url` and return the body as text
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.send_with_retry(url, "text/plain, */*").await?;
        response.text().await.map_err(|e| self.map_error(url, e))
    }

    async fn send_with_retry(&self, url: &str, accept: &str) -> Result<reqwest::Response> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.send_once(url, accept).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_client_error() => {
                    debug!("Not retrying {} after client error: {}", url, e);
                    return Err(e);
                }
                Err(e) if attempt >= self.config.max_attempts => {
                    warn!("Giving up on {} after {} attempts: {}", url, attempt, e);
                    return Err(e);
                }
                Err(e) => {
                    let delay = with_jitter(self.config.backoff_for(attempt));
                    warn!(
                        "Request to {} failed (attempt {}/{}), retrying after {:?}: {}",
                        url, attempt, self.config.max_attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn send_once(&self, url: &str, accept: &str) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .get(url)
            .header(USER_AGENT, &self.config.user_agent)
            .header(ACCEPT, accept);

        if let Some(token) = &self.config.github_token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = request.send().await.map_err(|e| self.map_error(url, e))?;
        let status = response.status();

        if status.is_success() {
            debug!("GET {} -> {}", url, status);
            Ok(response)
        } else {
            Err(status_error(status, url))
        }
    }

    fn map_error(&self, url: &str, e: reqwest::Error) -> CacheError {
        if e.is_timeout() {
            CacheError::Timeout {
                timeout_seconds: self.config.timeout.as_secs(),
                context: format!("GET {}", url),
            }
        } else {
            CacheError::Http(format!("GET {}: {}", url, e))
        }
    }
}

fn status_error(status: StatusCode, url: &str) -> CacheError {
    CacheError::UpstreamStatus {
        status: status.as_u16(),
        url: url.to_string(),
    }
}

/// Add up to 10% random jitter
fn with_jitter(delay: Duration) -> Duration {
    delay.mul_f64(1.0 + rand::random::<f64>() * 0.1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn fast_config() -> HttpConfig {
        HttpConfig {
            timeout: Duration::from_secs(2),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            ..Default::default()
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = HttpConfig {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            ..Default::default()
        };

        assert_eq!(config.backoff_for(1), Duration::from_millis(100));
        assert_eq!(config.backoff_for(2), Duration::from_millis(200));
        assert_eq!(config.backoff_for(3), Duration::from_millis(350));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let config = HttpConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(HttpClient::new(config).is_err());
    }

    #[tokio::test]
    async fn test_get_json_sends_token() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/repos/a/b/commits/main")
                    .header("authorization", "Bearer secret");
                then.status(200).json_body(serde_json::json!({"sha": "abc"}));
            })
            .await;

        let client = HttpClient::new(HttpConfig {
            github_token: Some("secret".to_string()),
            ..fast_config()
        })
        .unwrap();

        let body: serde_json::Value = client
            .get_json(&server.url("/repos/a/b/commits/main"))
            .await
            .unwrap();

        assert_eq!(body["sha"], "abc");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/missing");
                then.status(404);
            })
            .await;

        let client = HttpClient::new(fast_config()).unwrap();
        let err = client.get_text(&server.url("/missing")).await.unwrap_err();

        assert!(matches!(err, CacheError::UpstreamStatus { status: 404, .. }));
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_up_to_limit() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/flaky");
                then.status(503);
            })
            .await;

        let client = HttpClient::new(fast_config()).unwrap();
        let err = client.get_text(&server.url("/flaky")).await.unwrap_err();

        assert!(matches!(err, CacheError::UpstreamStatus { status: 503, .. }));
        mock.assert_hits_async(3).await;
    }
}
