use std::time::Duration;

/// Retry configuration consumed by `HttpClient`'s per-host retry loop
/// (`src/http_client.rs`): attempt cap, exponential backoff with jitter, and
/// a per-attempt deadline.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Maximum jitter as percentage of delay
    pub jitter: f64,
    /// Timeout for individual attempts
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Config for fast retries against transient network issues.
    #[must_use]
    pub const fn fast() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            multiplier: 1.5,
            jitter: 0.1,
            attempt_timeout: Duration::from_secs(10),
        }
    }

    /// Config for slow retries against a service that's unavailable rather
    /// than just briefly congested.
    #[must_use]
    pub const fn slow() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.2,
            attempt_timeout: Duration::from_secs(60),
        }
    }

    /// Config for rate-limited sources that need long, patient backoff.
    #[must_use]
    pub const fn rate_limited() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            multiplier: 1.5,
            jitter: 0.3,
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_scale_attempts_and_delay_by_urgency() {
        let fast = RetryConfig::fast();
        let slow = RetryConfig::slow();
        let rate_limited = RetryConfig::rate_limited();

        assert!(fast.max_delay < slow.max_delay);
        assert!(rate_limited.max_attempts > slow.max_attempts);
        assert!(rate_limited.max_delay > slow.max_delay);
    }

    #[test]
    fn default_matches_neither_preset() {
        let default = RetryConfig::default();
        assert_eq!(default.max_attempts, 3);
        assert_eq!(default.initial_delay, Duration::from_millis(100));
    }
}
