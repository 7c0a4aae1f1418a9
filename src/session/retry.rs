//! Bounded retry with backoff for renderer commands.

use backon::{BackoffBuilder, ExponentialBuilder};
use std::future::Future;
use std::time::Duration;

use crate::config::ControlConfig;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ControlConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            min_delay: Duration::from_millis(config.retry_min_delay_ms),
            max_delay: Duration::from_millis(
                config.retry_max_delay_ms.max(config.retry_min_delay_ms),
            ),
        }
    }

    /// Delays before each attempt; the first is zero.
    fn delays(&self) -> impl Iterator<Item = Duration> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries)
            .with_jitter()
            .build();
        std::iter::once(Duration::ZERO).chain(backoff)
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// retry budget is spent. The last error is returned.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, action: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;
    for (attempt, delay) in policy.delays().enumerate() {
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                tracing::warn!("{} failed (attempt {}): {}", action, attempt + 1, e);
                last_err = Some(e);
            }
        }
    }

    let err = last_err.unwrap_or_else(|| Error::Internal(format!("{action} retry exhausted")));
    tracing::error!("{} failed after {} retries: {}", action, policy.max_retries, err);
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result = with_retry(&policy(3), "Play", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::unreachable("tv", "connection reset"))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn budget_is_bounded() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result: Result<()> = with_retry(&policy(2), "Play", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::unreachable("tv", "timed out"))
        })
        .await;

        assert_matches!(result, Err(Error::DeviceUnreachable { .. }));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result: Result<()> = with_retry(&policy(5), "Play", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::SourceNotSet("tv".into()))
        })
        .await;

        assert_matches!(result, Err(Error::SourceNotSet(_)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
