//! Shared rate-limited HTTP client (L2).
//!
//! One [`HttpClient`] is shared across every source client. It owns a
//! per-host token bucket map, a global concurrency semaphore, and the retry
//! policy described in spec §4.1. It never panics or propagates a raw
//! `reqwest` error past its boundary — callers get a [`HttpOutcome`].

use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, RetryConfig};
use crate::Error;

/// Configuration for the shared HTTP client.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
    pub danger_accept_invalid_certs: bool,
    pub max_concurrent_sockets: usize,
    pub institutional_proxy_url: Option<String>,
    pub retry: RetryConfig,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: "genomics-corpus/0.1 (pipeline; contact unset)".to_string(),
            danger_accept_invalid_certs: false,
            max_concurrent_sockets: 32,
            institutional_proxy_url: None,
            retry: RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(30),
                multiplier: 2.0,
                jitter: 0.2,
                attempt_timeout: Duration::from_secs(30),
            },
        }
    }
}

/// Reason an HTTP call did not yield usable bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpErrorKind {
    Timeout,
    Network,
    HttpStatus(u16),
    TooManyRedirects,
    InvalidResponse,
}

#[derive(Debug, Clone)]
pub struct HttpError {
    pub kind: HttpErrorKind,
    pub detail: String,
    pub retry_after: Option<Duration>,
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.detail)
    }
}

pub type HttpOutcome = Result<(Vec<u8>, String), HttpError>;

/// Classify an [`HttpError`] into the crate-wide error type so the circuit
/// breaker's `should_trigger_circuit_breaker` policy can decide whether this
/// attempt counts against the host's breaker.
fn http_error_to_crate_error(e: HttpError) -> Error {
    match e.kind {
        HttpErrorKind::Timeout => Error::NetworkTimeout {
            timeout: Duration::from_secs(0),
            message: e.detail,
        },
        HttpErrorKind::Network => Error::ConnectionRefused { endpoint: e.detail },
        HttpErrorKind::TooManyRedirects => Error::InternalServerError(e.detail),
        HttpErrorKind::InvalidResponse => Error::Parse {
            context: "http response body".to_string(),
            message: e.detail,
        },
        HttpErrorKind::HttpStatus(429) => Error::RateLimitExceeded {
            retry_after: e.retry_after.unwrap_or(Duration::from_secs(1)),
        },
        HttpErrorKind::HttpStatus(status) if (500..600).contains(&status) => Error::ServiceUnavailable {
            service: "http".to_string(),
            reason: e.detail,
        },
        HttpErrorKind::HttpStatus(status) => Error::InvalidInput {
            field: "http_status".to_string(),
            reason: format!("{status}: {}", e.detail),
        },
    }
}

/// Reconstruct an [`HttpError`] from a crate-wide error that came back out of
/// the circuit breaker. Lossy on exact status code, but preserves the
/// retryability class the caller's retry loop checks against.
fn crate_error_to_http_error(e: Error) -> HttpError {
    match e {
        Error::NetworkTimeout { message, .. } => HttpError {
            kind: HttpErrorKind::Timeout,
            detail: message,
            retry_after: None,
        },
        Error::ConnectionRefused { endpoint } => HttpError {
            kind: HttpErrorKind::Network,
            detail: endpoint,
            retry_after: None,
        },
        Error::RateLimitExceeded { retry_after } => HttpError {
            kind: HttpErrorKind::HttpStatus(429),
            detail: "rate limited".to_string(),
            retry_after: Some(retry_after),
        },
        Error::ServiceUnavailable { reason, .. } => HttpError {
            kind: HttpErrorKind::HttpStatus(503),
            detail: reason,
            retry_after: None,
        },
        other => HttpError {
            kind: HttpErrorKind::InvalidResponse,
            detail: other.to_string(),
            retry_after: None,
        },
    }
}

/// Per-host token bucket: refills at `requests_per_second`.
struct TokenBucket {
    requests_per_second: f64,
    last_acquire: Option<Instant>,
}

impl TokenBucket {
    fn new(requests_per_second: f64) -> Self {
        Self {
            requests_per_second,
            last_acquire: None,
        }
    }

    async fn acquire(&mut self) {
        let min_interval = Duration::from_secs_f64(1.0 / self.requests_per_second.max(0.01));
        if let Some(last) = self.last_acquire {
            let elapsed = last.elapsed();
            if elapsed < min_interval {
                tokio::time::sleep(min_interval - elapsed).await;
            }
        }
        self.last_acquire = Some(Instant::now());
    }
}

/// Shared, rate-limited HTTP client used by every L3 source.
pub struct HttpClient {
    client: reqwest::Client,
    config: HttpClientConfig,
    buckets: Mutex<HashMap<String, TokenBucket>>,
    default_rate: f64,
    socket_limit: Arc<Semaphore>,
    /// One circuit breaker per host, so a source's mirrors or an
    /// institutional proxy going down doesn't also throttle unrelated hosts.
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig, default_rate_per_second: f64) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .danger_accept_invalid_certs(config.danger_accept_invalid_certs)
            .build()?;

        Ok(Self {
            socket_limit: Arc::new(Semaphore::new(config.max_concurrent_sockets)),
            client,
            default_rate: default_rate_per_second,
            buckets: Mutex::new(HashMap::new()),
            breakers: Mutex::new(HashMap::new()),
            config,
        })
    }

    async fn breaker_for(&self, host: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().await;
        breakers
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(host.to_string(), CircuitBreakerConfig::default())))
            .clone()
    }

    /// Set or replace the per-host rate for `host` (requests per second).
    pub async fn set_host_rate(&self, host: &str, requests_per_second: f64) {
        let mut buckets = self.buckets.lock().await;
        buckets.insert(host.to_string(), TokenBucket::new(requests_per_second));
    }

    async fn wait_for_token(&self, host: &str) {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(host.to_string())
            .or_insert_with(|| TokenBucket::new(self.default_rate));
        bucket.acquire().await;
    }

    fn rewrite_for_proxy(&self, url: &str) -> String {
        match &self.config.institutional_proxy_url {
            Some(proxy) => format!("{proxy}/login?url={}", urlencoding::encode(url)),
            None => url.to_string(),
        }
    }

    /// GET `url`, honoring per-host rate limits and the retry policy.
    /// `use_proxy` applies the configured institutional-proxy rewrite.
    pub async fn get(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        use_proxy: bool,
    ) -> HttpOutcome {
        let target = if use_proxy {
            self.rewrite_for_proxy(url)
        } else {
            url.to_string()
        };
        let host = reqwest::Url::parse(&target)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "unknown-host".to_string());
        let breaker = self.breaker_for(&host).await;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.wait_for_token(&host).await;
            let _permit = self.socket_limit.acquire().await;

            let mut request = self.client.get(&target);
            for (k, v) in headers {
                request = request.header(k, v);
            }

            let breaker_result = breaker
                .call(|| async {
                    let send_result = request.send().await;
                    self.interpret_response(send_result).await.map_err(http_error_to_crate_error)
                })
                .await;

            let outcome: HttpOutcome = match breaker_result {
                Ok(pair) => Ok(pair),
                Err(Error::CircuitBreakerOpen { service }) => Err(HttpError {
                    kind: HttpErrorKind::Network,
                    detail: format!("circuit open for {service}, not attempting request"),
                    retry_after: None,
                }),
                Err(other) => Err(crate_error_to_http_error(other)),
            };

            match &outcome {
                Ok(_) => return outcome,
                Err(err) => {
                    let retryable = matches!(
                        err.kind,
                        HttpErrorKind::Timeout
                            | HttpErrorKind::Network
                            | HttpErrorKind::HttpStatus(408)
                            | HttpErrorKind::HttpStatus(429)
                            | HttpErrorKind::HttpStatus(502)
                            | HttpErrorKind::HttpStatus(503)
                            | HttpErrorKind::HttpStatus(504)
                    );
                    if !retryable || attempt >= self.config.retry.max_attempts {
                        warn!(url = %target, attempt, error = %err, "giving up on request");
                        return outcome;
                    }
                    let delay = err
                        .retry_after
                        .unwrap_or_else(|| self.backoff_delay(attempt));
                    debug!(url = %target, attempt, delay_ms = delay.as_millis() as u64, "retrying request");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.config.retry.initial_delay.as_millis() as f64;
        let exp_ms = base_ms * self.config.retry.multiplier.powi(attempt as i32 - 1);
        let capped_ms = exp_ms.min(self.config.retry.max_delay.as_millis() as f64);
        let jitter_ms = rand::thread_rng().gen_range(0.0..=(capped_ms * self.config.retry.jitter));
        Duration::from_millis((capped_ms + jitter_ms) as u64)
    }

    async fn interpret_response(
        &self,
        send_result: Result<reqwest::Response, reqwest::Error>,
    ) -> HttpOutcome {
        let response = match send_result {
            Ok(r) => r,
            Err(e) => {
                let kind = if e.is_timeout() {
                    HttpErrorKind::Timeout
                } else if e.is_redirect() {
                    HttpErrorKind::TooManyRedirects
                } else {
                    HttpErrorKind::Network
                };
                return Err(HttpError {
                    kind,
                    detail: e.to_string(),
                    retry_after: None,
                });
            }
        };

        let status = response.status();
        let final_url = response.url().to_string();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);

        if !status.is_success() {
            return Err(HttpError {
                kind: HttpErrorKind::HttpStatus(status.as_u16()),
                detail: format!("HTTP {status}"),
                retry_after,
            });
        }

        match response.bytes().await {
            Ok(bytes) => Ok((bytes.to_vec(), final_url)),
            Err(e) => Err(HttpError {
                kind: HttpErrorKind::InvalidResponse,
                detail: e.to_string(),
                retry_after: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn http_client_builds_with_defaults() {
        let client = HttpClient::new(HttpClientConfig::default(), 5.0);
        assert!(client.is_ok());
    }

    #[test]
    fn backoff_grows_with_attempt() {
        let client = HttpClient::new(HttpClientConfig::default(), 5.0).unwrap();
        let first = client.backoff_delay(1);
        let third = client.backoff_delay(3);
        assert!(third >= first);
    }

    #[tokio::test]
    async fn proxy_rewrite_prefixes_url() {
        let mut config = HttpClientConfig::default();
        config.institutional_proxy_url = Some("https://proxy.example.edu".to_string());
        let client = HttpClient::new(config, 5.0).unwrap();
        let rewritten = client.rewrite_for_proxy("https://doi.org/10.1/x");
        assert!(rewritten.starts_with("https://proxy.example.edu/login?url="));
    }
}
