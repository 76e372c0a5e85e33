use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Extension trait bounding a future to a deadline, turning an elapsed
/// deadline into [`Error::Timeout`] instead of leaving callers to juggle
/// `tokio::time::error::Elapsed`.
pub trait TimeoutExt<T> {
    async fn with_timeout_duration(self, duration: Duration) -> Result<T>;
}

impl<F, T> TimeoutExt<T> for F
where
    F: Future<Output = T>,
{
    async fn with_timeout_duration(self, duration: Duration) -> Result<T> {
        match timeout(duration, self).await {
            Ok(result) => Ok(result),
            Err(_) => Err(Error::Timeout { timeout: duration }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn with_timeout_duration_returns_inner_value_when_fast_enough() {
        let result = async { 42 }.with_timeout_duration(Duration::from_millis(100)).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn with_timeout_duration_errors_when_deadline_elapses() {
        let result = async {
            sleep(Duration::from_millis(200)).await;
            42
        }
        .with_timeout_duration(Duration::from_millis(50))
        .await;

        assert!(matches!(result, Err(Error::Timeout { .. })));
    }
}
