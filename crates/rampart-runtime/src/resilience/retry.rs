//! Bounded retries with exponential backoff.
//!
//! Attempts are driven by `backon`, fed with the delays from
//! [`RetryConfig::backoff`]. The caller's predicate is consulted before every
//! retry; a `false` aborts immediately with that error.

use backon::Retryable;
use rampart_core::{OperationError, RetryConfig};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Executes an operation up to `max_retries + 1` times.
#[derive(Debug, Clone, Default)]
pub struct RetryEngine {
    config: RetryConfig,
}

impl RetryEngine {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation`, retrying failures accepted by `should_retry`.
    ///
    /// On exhaustion the last error is returned unchanged so callers can
    /// classify it.
    pub async fn execute<T, F, Fut, P>(
        &self,
        mut operation: F,
        name: &str,
        mut should_retry: P,
    ) -> Result<T, OperationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
        P: FnMut(&OperationError) -> bool,
    {
        let attempts = AtomicU32::new(0);

        let result = (|| {
            attempts.fetch_add(1, Ordering::Relaxed);
            operation()
        })
        .retry(self.config.backoff())
        .sleep(tokio::time::sleep)
        .when(|err: &OperationError| {
            let retry = should_retry(err);
            if !retry {
                tracing::debug!(operation = name, kind = %err.kind, "Error not retryable, giving up");
            }
            retry
        })
        .notify(|err: &OperationError, delay: Duration| {
            tracing::debug!(
                operation = name,
                attempt = attempts.load(Ordering::Relaxed),
                delay = ?delay,
                error = %err,
                "Attempt failed, retrying"
            );
        })
        .await;

        let attempts = attempts.load(Ordering::Relaxed);
        if let Err(err) = &result {
            if attempts >= self.config.max_attempts() {
                tracing::warn!(operation = name, attempts, error = %err, "Retries exhausted");
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use rampart_core::ErrorKind;
    use tokio::time::Instant;

    fn config(max_retries: u32, base_ms: u64) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_secs(10),
            jitter: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_makes_all_attempts() {
        let engine = RetryEngine::new(config(3, 10));
        let calls = Mutex::new(Vec::new());

        let result: Result<(), _> = engine
            .execute(
                || {
                    calls.lock().push(Instant::now());
                    async { Err(OperationError::new(ErrorKind::Connection, "refused")) }
                },
                "flaky",
                |err| err.is_retryable(),
            )
            .await;

        assert_eq!(result.unwrap_err().kind, ErrorKind::Connection);

        let calls = calls.into_inner();
        assert_eq!(calls.len(), 4);

        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps.windows(2).all(|w| w[0] <= w[1]));
        for (gap, expected_ms) in gaps.iter().zip([10u64, 20, 40]) {
            let expected = Duration::from_millis(expected_ms);
            assert!(*gap >= expected, "gap {gap:?} shorter than {expected:?}");
            assert!(*gap < expected + Duration::from_millis(5), "gap {gap:?} too long");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_aborts_after_one_attempt() {
        let engine = RetryEngine::new(config(5, 10));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = engine
            .execute(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(OperationError::new(ErrorKind::Validation, "bad input")) }
                },
                "strict",
                |err| err.is_retryable(),
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.unwrap_err().kind, ErrorKind::Validation);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let engine = RetryEngine::new(config(3, 10));
        let calls = AtomicU32::new(0);

        let result = engine
            .execute(
                || {
                    let attempt = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt < 2 {
                            Err(OperationError::new(ErrorKind::Timeout, "slow"))
                        } else {
                            Ok("done")
                        }
                    }
                },
                "eventually",
                |err| err.is_retryable(),
            )
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_retries_single_attempt() {
        let engine = RetryEngine::new(config(0, 10));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = engine
            .execute(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(OperationError::new(ErrorKind::Timeout, "slow")) }
                },
                "once",
                |_| true,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
