/*!
 * Retry logic with exponential backoff
 *
 * A [`RetryConfig`] is an explicit policy handed to [`with_retry`] at each
 * call site. Only failures whose [`ErrorKind`] is in the policy's retryable
 * set are retried; everything else is returned on first occurrence.
 */

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorKind, Result, StorageError};

/// Lower and upper bound of the jitter multiplier (±25%)
const JITTER_RANGE: std::ops::RangeInclusive<f64> = 0.75..=1.25;

/// Backoff policy for a retried operation
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt (0 disables retrying)
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound applied before jitter
    pub max_delay: Duration,
    /// Growth factor between successive delays
    pub exponential_base: f64,
    /// Randomize each delay within ±25%
    pub jitter: bool,
    /// Failure categories worth another attempt
    pub retryable: HashSet<ErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
            retryable: HashSet::from([ErrorKind::Connection]),
        }
    }
}

impl RetryConfig {
    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_exponential_base(mut self, base: f64) -> Self {
        self.exponential_base = base;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Also retry failures of the given category
    pub fn retry_on(mut self, kind: ErrorKind) -> Self {
        self.retryable.insert(kind);
        self
    }

    /// Whether this policy would retry the given failure
    pub fn is_retryable(&self, err: &StorageError) -> bool {
        self.retryable.contains(&err.kind())
    }

    /// Delay before retry number `attempt + 1`, without jitter
    ///
    /// `attempt` is zero-based: attempt 0 yields `base_delay`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        match Duration::try_from_secs_f64(secs) {
            Ok(delay) => delay.min(self.max_delay),
            Err(_) => self.max_delay,
        }
    }

    /// Delay before retry number `attempt + 1`, with jitter when enabled
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt);
        if self.jitter {
            delay.mul_f64(rand::rng().random_range(JITTER_RANGE))
        } else {
            delay
        }
    }
}

/// Execute an async operation under a retry policy
///
/// The closure is invoked once per attempt. When every retry is consumed the
/// last failure is returned wrapped in [`StorageError::RetryExhausted`].
/// Callers must only pass idempotent operations.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    run(config, None, operation).await
}

/// Like [`with_retry`], but stops as soon as `cancel` fires
///
/// Cancellation interrupts both an in-flight attempt and a backoff sleep and
/// yields [`StorageError::Cancelled`].
pub async fn with_retry_cancellable<T, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    run(config, Some(cancel), operation).await
}

async fn run<T, F, Fut>(
    config: &RetryConfig,
    cancel: Option<&CancellationToken>,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;

    loop {
        let result = match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(StorageError::Cancelled),
                    result = operation() => result,
                }
            }
            None => operation().await,
        };

        let err = match result {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !config.is_retryable(&err) {
            tracing::debug!(
                attempt = attempt + 1,
                kind = %err.kind(),
                error = %err,
                "Non-retryable failure"
            );
            return Err(err);
        }

        if attempt >= config.max_retries {
            tracing::error!(
                attempts = attempt + 1,
                error = %err,
                "Retries exhausted"
            );
            return Err(StorageError::RetryExhausted {
                attempts: attempt + 1,
                source: Box::new(err),
            });
        }

        let delay = config.delay_for(attempt);
        tracing::warn!(
            attempt = attempt + 1,
            max_retries = config.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying after failure"
        );

        match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        tracing::debug!(attempt = attempt + 1, "Retry cancelled during backoff");
                        return Err(StorageError::Cancelled);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            None => tokio::time::sleep(delay).await,
        }

        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_default_policy() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(60));
        assert!(config.jitter);
        assert!(config.is_retryable(&StorageError::connection("s3", "reset")));
        assert!(!config.is_retryable(&StorageError::Capacity("full".into())));
    }

    #[test]
    fn test_backoff_caps_at_max_delay() {
        let config = RetryConfig::default().with_jitter(false);
        assert_eq!(config.delay_for(0), Duration::from_secs(1));
        assert_eq!(config.delay_for(3), Duration::from_secs(8));
        assert_eq!(config.delay_for(6), Duration::from_secs(60));
        assert_eq!(config.delay_for(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let config = RetryConfig::default().with_base_delay(Duration::from_secs(4));
        for _ in 0..100 {
            let delay = config.delay_for(0);
            assert!(delay >= Duration::from_secs(3), "{:?}", delay);
            assert!(delay <= Duration::from_secs(5), "{:?}", delay);
        }
    }

    #[test]
    fn test_zero_base_delay() {
        let config = RetryConfig::default()
            .with_base_delay(Duration::ZERO)
            .with_jitter(false);
        assert_eq!(config.delay_for(5), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::default();

        let value = with_retry(&config, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(StorageError::connection("memory", "flaky"))
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_extra_retryable_kind() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::default()
            .with_base_delay(Duration::ZERO)
            .retry_on(ErrorKind::Other);

        let err = with_retry(&config, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(StorageError::backend("gcs", "500"))
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RetryExhausted);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let token = CancellationToken::new();
        token.cancel();

        let err = with_retry_cancellable(&RetryConfig::default(), &token, || async { Ok(1) })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Cancelled));
    }
}
