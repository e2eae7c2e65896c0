// Rate-limited HTTP client
//
// The single path for outbound vendor-API calls. Every request waits for a
// slot from the shared `AdaptiveThrottle`, rate-limit and transient
// failures are retried with capped exponential backoff, and a run-level
// cancellation token aborts queued or in-flight calls.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::error::Error;
use crate::throttle::AdaptiveThrottle;
use crate::transport::TransportConfig;

/// Retry schedule for rate-limited and transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Backoff before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on any single wait, including server `Retry-After` hints.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff with jitter.
    ///
    /// `delay = min(initial * 2^attempt, max) * (1 +- 0.25)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial_backoff.as_secs_f64() * 2.0_f64.powi(exponent);
        let capped = base.min(self.max_backoff.as_secs_f64());

        // Deterministic "jitter" seeded from the attempt number.
        let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
        let with_jitter = (capped * jitter_factor).clamp(0.0, self.max_backoff.as_secs_f64());

        Duration::from_secs_f64(with_jitter)
    }
}

/// Async HTTP client that routes every call through the shared throttle.
///
/// Cheap to share behind an `Arc`; the throttle state is one value for the
/// whole process so concurrent workers never exceed the budget.
pub struct RateLimitedClient {
    http: reqwest::Client,
    throttle: Arc<AdaptiveThrottle>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl RateLimitedClient {
    /// Build a client from a `TransportConfig` and a shared throttle.
    pub fn new(transport: &TransportConfig, throttle: Arc<AdaptiveThrottle>) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, throttle))
    }

    /// Wrap a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, throttle: Arc<AdaptiveThrottle>) -> Self {
        Self {
            http,
            throttle,
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the retry schedule.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Attach the run-level cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn throttle(&self) -> &Arc<AdaptiveThrottle> {
        &self.throttle
    }

    /// Send a request, retrying rate-limited and transient failures.
    ///
    /// Returns the successful response. Non-retryable HTTP failures come
    /// back as `Error::Api` / `Error::InvalidApiKey`.
    pub async fn call(&self, request: reqwest::Request) -> Result<reqwest::Response, Error> {
        let mut attempt: u32 = 0;

        loop {
            let req = request.try_clone().ok_or(Error::NotRetryable)?;

            tokio::select! {
                () = self.cancel.cancelled() => return Err(Error::Cancelled),
                () = self.throttle.acquire() => {}
            }

            let issued_at = Instant::now();
            debug!(method = %req.method(), url = %req.url(), attempt, "sending request");
            let sent = tokio::select! {
                () = self.cancel.cancelled() => return Err(Error::Cancelled),
                res = self.http.execute(req) => res,
            };

            let outcome = match sent {
                Ok(resp) => classify(resp).await,
                Err(e) => Err(Error::Transport(e)),
            };

            let err = match outcome {
                Ok(resp) => {
                    self.throttle.record_success();
                    return Ok(resp);
                }
                Err(err) => err,
            };

            let server_hint = match &err {
                Error::RateLimited { retry_after_secs } => {
                    self.throttle.record_rate_limited(issued_at);
                    Some(Duration::from_secs(*retry_after_secs))
                }
                _ => {
                    self.throttle.record_failure();
                    None
                }
            };

            if !err.is_transient() || attempt >= self.retry.max_retries {
                return Err(err);
            }

            let wait = server_hint
                .map_or_else(|| self.retry.backoff(attempt), |hint| hint.max(self.retry.backoff(attempt)))
                .min(self.retry.max_backoff);
            warn!(
                url = %request.url(),
                attempt,
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "retrying request"
            );

            tokio::select! {
                () = self.cancel.cancelled() => return Err(Error::Cancelled),
                () = tokio::time::sleep(wait) => {}
            }
            attempt += 1;
        }
    }

    /// GET a JSON document through the throttle.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
        headers: HeaderMap,
    ) -> Result<T, Error> {
        let request = self.http.get(url).query(query).headers(headers).build()?;
        let resp = self.call(request).await?;
        let body = resp.text().await?;

        serde_json::from_str(&body).map_err(|e| {
            let preview: String = body.chars().take(200).collect();
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body: body.clone(),
            }
        })
    }
}

/// Split a response into success or a typed error.
async fn classify(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(0);
        return Err(Error::RateLimited { retry_after_secs });
    }

    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(Error::InvalidApiKey);
    }

    let raw = resp.text().await.unwrap_or_default();
    Err(Error::Api {
        status: status.as_u16(),
        message: if raw.is_empty() {
            status.to_string()
        } else {
            raw.chars().take(200).collect()
        },
    })
}
