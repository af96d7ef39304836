//! Webhook POST with explicit retry-and-backoff.
//!
//! The retry bound must be reproducible and testable: an explicit loop with
//! an attempt counter and computed delay, not hidden in middleware.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::{error, warn};

use stackwatch_shared::{Result, StackwatchError};

/// Per-channel retry policy: up to `max_attempts` tries with exponential
/// backoff. A server-supplied `Retry-After` is honored as a floor for the
/// next delay.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `attempt + 1`: base doubled per attempt,
    /// raised to the server hint when one was supplied.
    fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let backoff = self.base_delay.checked_mul(multiplier).unwrap_or(Duration::MAX);
        match retry_after {
            Some(hint) => backoff.max(hint),
            None => backoff,
        }
    }
}

/// POST a JSON payload until the channel accepts it or the retry budget is
/// exhausted. Rate limits (429) and server errors (5xx) retry; other client
/// errors fail immediately.
pub(crate) async fn post_with_retry(
    client: &Client,
    channel: &str,
    url: &str,
    headers: &std::collections::BTreeMap<String, String>,
    body: &serde_json::Value,
    policy: &RetryPolicy,
) -> Result<()> {
    let mut attempt = 0u32;

    loop {
        let mut request = client.post(url).json(body);
        for (key, value) in headers {
            request = request.header(key, value);
        }

        let outcome = match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(());
                }
                let retryable =
                    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
                let retry_after = retry_after_hint(&response);
                if !retryable {
                    error!(channel, status = status.as_u16(), "webhook rejected alert");
                    return Err(StackwatchError::notify(channel, format!("HTTP {status}")));
                }
                (format!("HTTP {status}"), retry_after)
            }
            Err(e) => (e.to_string(), None),
        };

        attempt += 1;
        if attempt >= policy.max_attempts {
            error!(channel, attempts = attempt, error = %outcome.0, "retry budget exhausted");
            return Err(StackwatchError::notify(
                channel,
                format!("{} after {} attempts", outcome.0, attempt),
            ));
        }

        let delay = policy.delay_for(attempt - 1, outcome.1);
        warn!(
            channel,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %outcome.0,
            "webhook attempt failed, backing off"
        );
        tokio::time::sleep(delay).await;
    }
}

/// `Retry-After` in seconds, when the server sent one.
fn retry_after_hint(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|secs| *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> Client {
        Client::builder().build().unwrap()
    }

    #[tokio::test]
    async fn rate_limit_retries_and_honors_retry_after_floor() {
        let server = MockServer::start().await;

        // First attempt: 429 with a 1-second hint; second attempt succeeds.
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
        };

        let started = Instant::now();
        let result = post_with_retry(
            &client(),
            "slack",
            &server.uri(),
            &Default::default(),
            &serde_json::json!({"text": "hi"}),
            &policy,
        )
        .await;

        assert!(result.is_ok());
        // The hint (1s) floors the 10ms backoff.
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn exhausted_budget_is_an_error_with_bounded_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
        };

        let result = post_with_retry(
            &client(),
            "discord",
            &server.uri(),
            &Default::default(),
            &serde_json::json!({}),
            &policy,
        )
        .await;

        let err = result.expect_err("must exhaust");
        assert!(matches!(err, StackwatchError::Notify { .. }));
        assert!(err.to_string().contains("3 attempts"));
    }

    #[tokio::test]
    async fn client_error_fails_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
        };

        let result = post_with_retry(
            &client(),
            "webhook",
            &server.uri(),
            &Default::default(),
            &serde_json::json!({}),
            &policy,
        )
        .await;

        assert!(result.is_err());
    }

    #[test]
    fn backoff_doubles_and_respects_hint() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        };
        assert_eq!(policy.delay_for(0, None), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1, None), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2, None), Duration::from_secs(4));
        assert_eq!(
            policy.delay_for(0, Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
        assert_eq!(
            policy.delay_for(2, Some(Duration::from_secs(3))),
            Duration::from_secs(4)
        );
    }
}
