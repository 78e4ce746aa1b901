//! Blocking JSON GET with retries, jittered exponential backoff, and the
//! circuit breaker. Shared by the HTTP-backed sources.

use rand::Rng;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::circuit_breaker::CircuitBreaker;
use super::SourceError;

pub struct HttpJson {
    client: reqwest::blocking::Client,
    breaker: Arc<CircuitBreaker>,
    max_retries: u32,
    base_delay: Duration,
}

impl HttpJson {
    pub fn new(breaker: Arc<CircuitBreaker>) -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| SourceError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            breaker,
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        })
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Backoff for retry `attempt` (1-based): `base * 2^(attempt-1)` plus up to 50% jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_delay * 2u32.saturating_pow(attempt - 1);
        let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 2);
        base + Duration::from_millis(jitter_ms)
    }

    /// GET `url` with `query` and decode the body as `T`.
    ///
    /// `label` identifies the request in logs; query strings are never logged
    /// since they may carry API tokens.
    pub fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        label: &str,
    ) -> Result<T, SourceError> {
        if !self.breaker.is_allowed() {
            return Err(SourceError::CircuitBreakerTripped);
        }

        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff(attempt);
                debug!(label, attempt, delay_ms = delay.as_millis() as u64, "retrying request");
                std::thread::sleep(delay);
            }

            if !self.breaker.is_allowed() {
                return Err(SourceError::CircuitBreakerTripped);
            }

            let resp = match self.client.get(url).query(query).send() {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    last_error = Some(SourceError::NetworkUnreachable(e.without_url().to_string()));
                    continue;
                }
                Err(e) => return Err(SourceError::NetworkUnreachable(e.without_url().to_string())),
            };

            let status = resp.status();

            if status == reqwest::StatusCode::FORBIDDEN {
                self.breaker.trip();
                return Err(SourceError::CircuitBreakerTripped);
            }

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                self.breaker.record_failure();
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                warn!(label, retry_after, "rate limited");
                last_error = Some(SourceError::RateLimited {
                    retry_after_secs: retry_after,
                });
                continue;
            }

            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(SourceError::AuthenticationRequired(format!(
                    "{label}: provider rejected credentials"
                )));
            }

            if !status.is_success() {
                self.breaker.record_failure();
                last_error = Some(SourceError::Other(format!("HTTP {status} for {label}")));
                continue;
            }

            let body = resp.json::<T>().map_err(|e| {
                SourceError::ResponseFormatChanged(format!(
                    "failed to parse response for {label}: {}",
                    e.without_url()
                ))
            })?;
            self.breaker.record_success();
            return Ok(body);
        }

        Err(last_error.unwrap_or_else(|| SourceError::Other("max retries exceeded".into())))
    }
}
