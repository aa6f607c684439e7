//! # Request Scheduler
//!
//! Shared HTTP access for enrichment jobs with bounded retries.
//!
//! Connection failures, `429` and `5xx` responses are retried with
//! exponential backoff. Other non-success statuses fail immediately.

use recon_core::TransformError;
use serde::Serialize;
use std::time::Duration;

/// Attempts per request, including the first one.
pub const DEFAULT_ATTEMPTS: u32 = 5;

/// Delay before the first retry; doubled for each further retry.
pub const BACKOFF_BASE_MS: u64 = 250;

enum Failure {
    Retryable(String),
    Fatal(String),
}

/// Retrying wrapper around a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct Scheduler {
    http: reqwest::Client,
    attempts: u32,
    backoff: Duration,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    #[must_use]
    pub fn with_client(http: reqwest::Client) -> Self {
        Self {
            http,
            attempts: DEFAULT_ATTEMPTS,
            backoff: Duration::from_millis(BACKOFF_BASE_MS),
        }
    }

    /// Set the attempt budget. At least one attempt is always made.
    #[must_use]
    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// GET `url` and return the response body.
    pub async fn fetch(&self, url: &str) -> Result<String, TransformError> {
        self.execute(|| self.http.get(url)).await
    }

    /// POST `form` url-encoded to `url` and return the response body.
    pub async fn post_form<T>(&self, url: &str, form: &T) -> Result<String, TransformError>
    where
        T: Serialize + ?Sized,
    {
        self.execute(|| self.http.post(url).form(form)).await
    }

    async fn execute<F>(&self, build: F) -> Result<String, TransformError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match send(build()).await {
                Ok(body) => return Ok(body),
                Err(Failure::Retryable(reason)) if attempt < self.attempts => {
                    let delay = backoff_delay(self.backoff, attempt);
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "request failed, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(Failure::Retryable(reason) | Failure::Fatal(reason)) => {
                    return Err(TransformError::Request(reason));
                }
            }
        }
    }
}

async fn send(request: reqwest::RequestBuilder) -> Result<String, Failure> {
    let response = request
        .send()
        .await
        .map_err(|e| Failure::Retryable(e.to_string()))?;
    let status = response.status();
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(Failure::Retryable(format!("HTTP {status}")));
    }
    if !status.is_success() {
        return Err(Failure::Fatal(format!("HTTP {status}")));
    }
    response
        .text()
        .await
        .map_err(|e| Failure::Retryable(e.to_string()))
}

/// Delay after the given failed attempt (1-based).
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}
