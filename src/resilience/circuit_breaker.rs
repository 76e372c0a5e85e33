//! Per-host circuit breaker for the shared HTTP client (L2). `HttpClient`
//! keeps one of these per host (`src/http_client.rs`) so a dead mirror or a
//! stuck institutional proxy trips open instead of being retried forever,
//! while unrelated hosts keep flowing normally.

use crate::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum CircuitState {
    Closed,
    /// Requests are rejected immediately until `recovery_timeout` elapses.
    Open { opened_at: Instant },
    /// Limited probe requests allowed to test whether the host recovered.
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures (within `failure_timeout`) to open the circuit.
    pub failure_threshold: u32,
    /// Consecutive half-open successes to close the circuit again.
    pub success_threshold: u32,
    /// A failure older than this no longer counts toward `failure_threshold`
    /// — a host that failed once an hour ago shouldn't trip on today's first
    /// retry.
    pub failure_timeout: Duration,
    /// How long the circuit stays open before allowing a half-open probe.
    pub recovery_timeout: Duration,
    /// Probe requests allowed while half-open.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            failure_timeout: Duration::from_secs(60),
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct CircuitMetrics {
    failure_count: u32,
    success_count: u32,
    total_requests: u64,
    last_failure_time: Option<Instant>,
    half_open_calls: u32,
}

/// One breaker per host. Cheap to clone (`Arc`-backed internals) and safe to
/// share across the tasks hitting the same host concurrently.
pub struct CircuitBreaker {
    host: String,
    config: CircuitBreakerConfig,
    state: Arc<RwLock<CircuitState>>,
    metrics: Arc<RwLock<CircuitMetrics>>,
}

impl CircuitBreaker {
    pub fn new(host: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            host: host.into(),
            config,
            state: Arc::new(RwLock::new(CircuitState::Closed)),
            metrics: Arc::new(RwLock::new(CircuitMetrics::default())),
        }
    }

    /// Run `operation` guarded by this host's breaker. Only errors that
    /// `should_trigger_circuit_breaker` classifies as host-health signals
    /// count against the breaker — a 404 or bad-input error doesn't mean the
    /// host is down.
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if !self.can_execute().await {
            return Err(Error::CircuitBreakerOpen {
                service: self.host.clone(),
            });
        }

        let start_time = Instant::now();
        let result = operation().await;
        let elapsed_ms = start_time.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => {
                self.on_success().await;
                debug!(host = %self.host, elapsed_ms, "breaker: request succeeded");
            }
            Err(error) => {
                if error.should_trigger_circuit_breaker() {
                    self.on_failure().await;
                    debug!(host = %self.host, elapsed_ms, error = %error, "breaker: request counted as failure");
                }
            }
        }

        result
    }

    async fn can_execute(&self) -> bool {
        let mut state = self.state.write().await;
        let mut metrics = self.metrics.write().await;

        match &*state {
            CircuitState::Closed => true,
            CircuitState::Open { opened_at } => {
                if opened_at.elapsed() >= self.config.recovery_timeout {
                    *state = CircuitState::HalfOpen;
                    metrics.half_open_calls = 1;
                    info!(host = %self.host, "breaker: open -> half-open");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if metrics.half_open_calls < self.config.half_open_max_calls {
                    metrics.half_open_calls += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    async fn on_success(&self) {
        let mut state = self.state.write().await;
        let mut metrics = self.metrics.write().await;

        metrics.total_requests += 1;

        match &*state {
            CircuitState::Closed => {
                metrics.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                metrics.success_count += 1;
                if metrics.success_count >= self.config.success_threshold {
                    *state = CircuitState::Closed;
                    metrics.failure_count = 0;
                    metrics.success_count = 0;
                    metrics.half_open_calls = 0;
                    info!(host = %self.host, "breaker: half-open -> closed");
                }
            }
            CircuitState::Open { .. } => {
                *state = CircuitState::Closed;
                metrics.failure_count = 0;
                metrics.success_count = 0;
            }
        }
    }

    async fn on_failure(&self) {
        let mut state = self.state.write().await;
        let mut metrics = self.metrics.write().await;

        // A failure outside the counting window doesn't compound with a
        // fresh run of failures; start the streak over.
        if let Some(last) = metrics.last_failure_time {
            if last.elapsed() >= self.config.failure_timeout {
                metrics.failure_count = 0;
            }
        }

        metrics.total_requests += 1;
        metrics.failure_count += 1;
        metrics.last_failure_time = Some(Instant::now());

        match &*state {
            CircuitState::Closed => {
                if metrics.failure_count >= self.config.failure_threshold {
                    *state = CircuitState::Open {
                        opened_at: Instant::now(),
                    };
                    warn!(host = %self.host, failures = metrics.failure_count, "breaker: closed -> open");
                }
            }
            CircuitState::HalfOpen => {
                *state = CircuitState::Open {
                    opened_at: Instant::now(),
                };
                metrics.success_count = 0;
                metrics.half_open_calls = 0;
                warn!(host = %self.host, "breaker: half-open -> open");
            }
            CircuitState::Open { .. } => {}
        }
    }

    pub async fn get_state(&self) -> CircuitState {
        self.state.read().await.clone()
    }

    pub async fn get_metrics(&self) -> CircuitBreakerMetrics {
        let state = self.state.read().await;
        let metrics = self.metrics.read().await;

        CircuitBreakerMetrics {
            host: self.host.clone(),
            state: state.clone(),
            failure_count: metrics.failure_count,
            success_count: metrics.success_count,
            total_requests: metrics.total_requests,
            last_failure_time: metrics.last_failure_time,
        }
    }

    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        let mut metrics = self.metrics.write().await;

        *state = CircuitState::Closed;
        metrics.failure_count = 0;
        metrics.success_count = 0;
        metrics.half_open_calls = 0;

        info!(host = %self.host, "breaker: reset to closed");
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    pub host: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_requests: u64,
    pub last_failure_time: Option<Instant>,
}

impl CircuitBreakerMetrics {
    pub fn is_healthy(&self) -> bool {
        matches!(self.state, CircuitState::Closed)
    }

    pub fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.failure_count as f64 / self.total_requests as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn closed_breaker_allows_calls() {
        let cb = CircuitBreaker::new("api.example.org", CircuitBreakerConfig::default());
        let result = cb.call(|| async { Ok::<(), Error>(()) }).await;
        assert!(result.is_ok());
        assert_eq!(cb.get_state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let config = CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        };
        let cb = CircuitBreaker::new("mirror.example.org", config);

        for _ in 0..2 {
            let _ = cb
                .call(|| async {
                    Err::<(), Error>(Error::ServiceUnavailable {
                        service: "mirror.example.org".to_string(),
                        reason: "503".to_string(),
                    })
                })
                .await;
        }

        assert!(matches!(cb.get_state().await, CircuitState::Open { .. }));
    }

    #[tokio::test]
    async fn stale_failure_outside_window_does_not_compound() {
        let config = CircuitBreakerConfig {
            failure_threshold: 2,
            failure_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let cb = CircuitBreaker::new("flaky.example.org", config);

        let fail = || async {
            Err::<(), Error>(Error::ServiceUnavailable {
                service: "flaky.example.org".to_string(),
                reason: "503".to_string(),
            })
        };

        let _ = cb.call(fail).await;
        sleep(Duration::from_millis(30)).await;
        let _ = cb.call(fail).await;

        // The second failure resets the streak instead of compounding with
        // the first, so the breaker should still be closed.
        assert_eq!(cb.get_state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_probe_can_close_the_circuit() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            recovery_timeout: Duration::from_millis(10),
            ..Default::default()
        };
        let cb = CircuitBreaker::new("recovering.example.org", config);

        let _ = cb
            .call(|| async {
                Err::<(), Error>(Error::ServiceUnavailable {
                    service: "recovering.example.org".to_string(),
                    reason: "503".to_string(),
                })
            })
            .await;
        assert!(matches!(cb.get_state().await, CircuitState::Open { .. }));

        sleep(Duration::from_millis(20)).await;

        let result = cb.call(|| async { Ok::<(), Error>(()) }).await;
        assert!(result.is_ok());
        assert_eq!(cb.get_state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn open_breaker_rejects_without_invoking_operation() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(60),
            ..Default::default()
        };
        let cb = CircuitBreaker::new("down.example.org", config);

        let _ = cb
            .call(|| async {
                Err::<(), Error>(Error::ServiceUnavailable {
                    service: "down.example.org".to_string(),
                    reason: "503".to_string(),
                })
            })
            .await;

        let calls = std::sync::atomic::AtomicU32::new(0);
        let result = cb
            .call(|| async {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok::<(), Error>(())
            })
            .await;

        assert!(matches!(result, Err(Error::CircuitBreakerOpen { .. })));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
