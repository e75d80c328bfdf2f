//! Shared HTTP plumbing for job-board scrapers.
//!
//! Provides a configured [`reqwest::Client`] with browser-like headers and a
//! rotating User-Agent, a small retry helper for transient failures, and the
//! politeness pause scrapers take between targets.

use crate::error::WatchError;
use rand::seq::SliceRandom;
use std::time::Duration;

/// Per-request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Realistic browser User-Agent strings, one picked per client.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:133.0) Gecko/20100101 Firefox/133.0",
];

/// Retry behaviour for transient HTTP failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay before the second attempt; doubles afterwards.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(750),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            base_delay: Duration::ZERO,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Build a [`reqwest::Client`] for job-board scraping.
///
/// # Errors
///
/// Returns [`WatchError::Http`] if the client cannot be constructed.
pub fn build_client() -> Result<reqwest::Client, WatchError> {
    reqwest::Client::builder()
        .cookie_store(true)
        .timeout(REQUEST_TIMEOUT)
        .user_agent(random_user_agent())
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| WatchError::Http(format!("failed to build HTTP client: {e}")))
}

/// Select a random User-Agent string from the rotation list.
pub fn random_user_agent() -> &'static str {
    let mut rng = rand::thread_rng();
    USER_AGENTS
        .choose(&mut rng)
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Send `request`, retrying 429/5xx responses and connect/timeout errors.
///
/// # Errors
///
/// Returns [`WatchError::Http`] once attempts are exhausted, on a
/// non-retryable error status, or when the request body cannot be cloned.
pub async fn send_with_retry(
    request: reqwest::RequestBuilder,
    policy: RetryPolicy,
) -> Result<reqwest::Response, WatchError> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        let req = request
            .try_clone()
            .ok_or_else(|| WatchError::Http("request cannot be retried".into()))?;
        let last = attempt >= attempts;
        match req.send().await {
            Ok(resp) if is_retryable_status(resp.status()) && !last => {
                tracing::debug!(status = %resp.status(), attempt, url = %resp.url(), "retrying after status");
            }
            Ok(resp) => {
                return resp
                    .error_for_status()
                    .map_err(|e| WatchError::Http(format!("HTTP error: {e}")));
            }
            Err(e) if (e.is_connect() || e.is_timeout()) && !last => {
                tracing::debug!(error = %e, attempt, "retrying after transport error");
            }
            Err(e) => return Err(WatchError::Http(format!("request failed: {e}"))),
        }
        tokio::time::sleep(policy.delay_for(attempt)).await;
        attempt += 1;
    }
}

/// Politeness pause between targets. Non-positive or non-finite values skip it.
pub async fn polite_delay(seconds: f64) {
    if seconds.is_finite() && seconds > 0.0 {
        tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn random_user_agent_returns_valid_ua() {
        let ua = random_user_agent();
        assert!(USER_AGENTS.contains(&ua));
        assert!(ua.contains("Mozilla/5.0"));
    }

    #[test]
    fn build_client_succeeds() {
        assert!(build_client().is_ok());
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            attempts: 4,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/board"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/board"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let client = build_client().unwrap();
        let resp = send_with_retry(
            client.get(format!("{}/board", server.uri())),
            RetryPolicy::immediate(3),
        )
        .await
        .unwrap();
        assert_eq!(resp.text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn gives_up_after_last_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let client = build_client().unwrap();
        let err = send_with_retry(client.get(server.uri()), RetryPolicy::immediate(2))
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::Http(_)));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = build_client().unwrap();
        assert!(send_with_retry(client.get(server.uri()), RetryPolicy::immediate(3))
            .await
            .is_err());
    }
}
