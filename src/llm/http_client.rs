// src/llm/http_client.rs
// Shared HTTP client configuration for all LLM providers

use crate::error::{KingfisherError, Result};
use reqwest::Client;
use std::time::Duration;
use tracing::warn;

/// Default maximum retry attempts for transient failures
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default base backoff duration between retries (doubles each attempt)
const DEFAULT_BASE_BACKOFF_SECS: u64 = 1;
/// Default connect timeout
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Random jitter added on top of each backoff, as a fraction of the delay.
/// Keeps concurrent agents from retrying against the provider in lockstep.
const BACKOFF_JITTER_FRACTION: f64 = 0.3;

/// Backoff with up to `BACKOFF_JITTER_FRACTION` of random extra delay
fn jittered(backoff: Duration) -> Duration {
    backoff + backoff.mul_f64(rand::random::<f64>() * BACKOFF_JITTER_FRACTION)
}

/// Shared HTTP client for LLM providers with transient-error retry.
pub struct LlmHttpClient {
    client: Client,
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl LlmHttpClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: Duration::from_secs(DEFAULT_BASE_BACKOFF_SECS),
        }
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Execute a POST with retry on 429/5xx/transport errors.
    ///
    /// Non-transient failures are classified so callers can distinguish
    /// auth, not-found, rate-limit, timeout, and transport errors.
    pub async fn execute_with_retry(
        &self,
        request_id: &str,
        url: &str,
        api_key: &str,
        body: String,
        timeout: Duration,
    ) -> Result<String> {
        let mut attempts = 0;
        let mut backoff = self.base_backoff;

        loop {
            let response_result = self
                .client
                .post(url)
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Content-Type", "application/json")
                .timeout(timeout)
                .body(body.clone())
                .send()
                .await;

            match response_result {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        let error_body = response.text().await.unwrap_or_default();

                        if attempts < self.max_attempts
                            && (status.as_u16() == 429 || status.is_server_error())
                        {
                            let delay = jittered(backoff);
                            warn!(
                                request_id = %request_id,
                                status = %status,
                                "Transient error, retrying in {:?}...",
                                delay
                            );
                            tokio::time::sleep(delay).await;
                            attempts += 1;
                            backoff *= 2;
                            continue;
                        }

                        return Err(classify_status(status.as_u16(), &error_body));
                    }

                    return Ok(response.text().await?);
                }
                Err(e) => {
                    if attempts < self.max_attempts {
                        let delay = jittered(backoff);
                        warn!(
                            request_id = %request_id,
                            error = %e,
                            "Request failed, retrying in {:?}...",
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        attempts += 1;
                        backoff *= 2;
                        continue;
                    }
                    return Err(classify_transport(&e));
                }
            }
        }
    }
}

impl Default for LlmHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Map an HTTP status to a classified LLM error
fn classify_status(status: u16, body: &str) -> KingfisherError {
    let snippet: String = body.chars().take(200).collect();
    let class = match status {
        401 | 403 => "auth",
        404 => "not_found",
        429 => "rate_limited",
        _ => "api",
    };
    KingfisherError::Llm(format!("{class}: status {status}: {snippet}"))
}

/// Map a reqwest error to a classified LLM error
fn classify_transport(error: &reqwest::Error) -> KingfisherError {
    if error.is_timeout() {
        KingfisherError::Llm(format!("timeout: {error}"))
    } else {
        KingfisherError::Llm(format!("transport: {error}"))
    }
}
