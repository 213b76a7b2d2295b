//! Reliability wrapper: breaker, retries, timeout and fallback for one caller.
//!
//! # Execution Flow
//! 1. Ask the breaker for a permit; if refused, run the fallback or fail with
//!    [`ReliabilityError::CircuitOpen`]
//! 2. Run the operation through the [`RetryEngine`], each attempt bounded by
//!    the optional timeout
//! 3. Resolve the permit with the outcome
//! 4. On failure, record an [`ErrorRecord`] and run the fallback if one was given

use chrono::{TimeDelta, Utc};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use rampart_core::{
    health_score, BoundedHistory, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStatus,
    ErrorRecord, OperationError, ReliabilityConfig, RetryConfig,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use super::retry::RetryEngine;
use crate::error::ReliabilityError;

/// Error records kept when no capacity is configured.
pub const DEFAULT_ERROR_HISTORY: usize = 100;

/// Errors newer than this count as recent for health scoring.
const RECENT_ERROR_WINDOW_MINUTES: i64 = 5;

/// Lazily evaluated alternative to the primary operation.
pub type Fallback<'a, T> = BoxFuture<'a, Result<T, OperationError>>;

/// Health snapshot for one wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub caller_name: String,
    pub circuit_breaker: CircuitBreakerStatus,

    /// Errors recorded in the last five minutes
    pub recent_errors: usize,

    /// Errors currently held in the history
    pub total_errors: usize,

    pub last_error: Option<ErrorRecord>,
    pub health_score: f64,
}

/// Per-caller façade composing breaker, retries, timeout and fallback.
///
/// Callers hold a reference (usually an `Arc` from the registry) and
/// delegate protected calls to it.
#[derive(Debug)]
pub struct ReliabilityWrapper {
    caller_name: String,
    breaker: CircuitBreaker,
    retry: RetryEngine,
    error_history: Mutex<BoundedHistory<ErrorRecord>>,
}

impl ReliabilityWrapper {
    /// Create a wrapper. An unnamed breaker config takes the caller's name.
    pub fn new(
        caller_name: impl Into<String>,
        mut breaker_config: CircuitBreakerConfig,
        retry_config: RetryConfig,
    ) -> Self {
        let caller_name = caller_name.into();
        if breaker_config.name.is_empty() {
            breaker_config.name = caller_name.clone();
        }

        Self {
            caller_name,
            breaker: CircuitBreaker::new(breaker_config),
            retry: RetryEngine::new(retry_config),
            error_history: Mutex::new(BoundedHistory::new(DEFAULT_ERROR_HISTORY)),
        }
    }

    /// Create a wrapper from the shared defaults.
    pub fn from_config(caller_name: impl Into<String>, config: &ReliabilityConfig) -> Self {
        let caller_name = caller_name.into();
        Self::new(
            caller_name.clone(),
            config.breaker_for(&caller_name),
            config.retry.clone(),
        )
        .with_history_capacity(config.error_history_capacity)
    }

    /// Keep at most `capacity` error records.
    pub fn with_history_capacity(self, capacity: usize) -> Self {
        Self {
            error_history: Mutex::new(BoundedHistory::new(capacity)),
            ..self
        }
    }

    pub fn caller_name(&self) -> &str {
        &self.caller_name
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn retry_engine(&self) -> &RetryEngine {
        &self.retry
    }

    /// Run `operation` under breaker, retries and timeout, with an optional fallback.
    ///
    /// `timeout` bounds each attempt, not the whole retry sequence. A timed
    /// out attempt fails with [`rampart_core::ErrorKind::Timeout`].
    pub async fn execute_safely<'a, T, F, Fut>(
        &self,
        mut operation: F,
        name: &str,
        fallback: Option<Fallback<'a, T>>,
        timeout: Option<Duration>,
    ) -> Result<T, ReliabilityError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let Some(permit) = self.breaker.try_acquire() else {
            tracing::warn!(caller = %self.caller_name, operation = name, "Circuit open, rejecting call");
            return match fallback {
                Some(fallback) => self.run_fallback(fallback, name).await,
                None => Err(ReliabilityError::CircuitOpen {
                    name: self.breaker.name().to_string(),
                }),
            };
        };

        let guarded = || {
            let attempt = operation();
            async move {
                match timeout {
                    Some(limit) => tokio::time::timeout(limit, attempt).await.unwrap_or_else(|_| {
                        Err(OperationError::timeout(format!("attempt exceeded {limit:?}")))
                    }),
                    None => attempt.await,
                }
            }
        };

        match self
            .retry
            .execute(guarded, name, |err: &OperationError| err.is_retryable())
            .await
        {
            Ok(value) => {
                permit.succeed();
                Ok(value)
            }
            Err(err) => {
                permit.fail(err.kind);
                self.record_error(name, &err);
                tracing::warn!(
                    caller = %self.caller_name,
                    operation = name,
                    kind = %err.kind,
                    severity = %err.severity(),
                    error = %err.message,
                    "Operation failed"
                );

                match fallback {
                    Some(fallback) => self.run_fallback(fallback, name).await,
                    None => Err(err.into()),
                }
            }
        }
    }

    /// Run `operation` with no fallback and no timeout.
    pub async fn execute<T, F, Fut>(&self, operation: F, name: &str) -> Result<T, ReliabilityError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        self.execute_safely(operation, name, None, None).await
    }

    /// Run `operation` with each attempt bounded by `timeout`.
    pub async fn execute_with_timeout<T, F, Fut>(
        &self,
        operation: F,
        name: &str,
        timeout: Duration,
    ) -> Result<T, ReliabilityError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        self.execute_safely(operation, name, None, Some(timeout)).await
    }

    /// Run `operation`, falling back to `fallback` when blocked or exhausted.
    pub async fn execute_with_fallback<'a, T, F, Fut, FB>(
        &self,
        operation: F,
        name: &str,
        fallback: FB,
    ) -> Result<T, ReliabilityError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
        FB: Future<Output = Result<T, OperationError>> + Send + 'a,
    {
        self.execute_safely(operation, name, Some(fallback.boxed()), None)
            .await
    }

    /// Breaker status, recent error counts and health score.
    pub fn health_status(&self) -> HealthStatus {
        let circuit_breaker = self.breaker.status();
        let cutoff = Utc::now() - TimeDelta::minutes(RECENT_ERROR_WINDOW_MINUTES);

        let history = self.error_history.lock();
        let recent_errors = history.iter().filter(|e| e.timestamp >= cutoff).count();
        let total_errors = history.len();
        let last_error = history.latest().cloned();
        drop(history);

        HealthStatus {
            caller_name: self.caller_name.clone(),
            health_score: health_score(&circuit_breaker.metrics, recent_errors),
            circuit_breaker,
            recent_errors,
            total_errors,
            last_error,
        }
    }

    /// Recorded errors, oldest first.
    pub fn error_history(&self) -> Vec<ErrorRecord> {
        self.error_history.lock().to_vec()
    }

    /// Close the breaker, clear its counters and forget recorded errors.
    pub fn reset(&self) {
        self.breaker.reset();
        self.error_history.lock().clear();
    }

    async fn run_fallback<T>(&self, fallback: Fallback<'_, T>, name: &str) -> Result<T, ReliabilityError> {
        tracing::info!(caller = %self.caller_name, operation = name, "Executing fallback");
        match fallback.await {
            Ok(value) => Ok(value),
            Err(err) => {
                self.record_error(&format!("{name}_fallback"), &err);
                tracing::error!(
                    caller = %self.caller_name,
                    operation = name,
                    kind = %err.kind,
                    error = %err.message,
                    "Fallback failed"
                );
                Err(err.into())
            }
        }
    }

    fn record_error(&self, operation: &str, err: &OperationError) {
        let record = ErrorRecord::new(&self.caller_name, operation, err);
        self.error_history.lock().push(record);
    }
}
