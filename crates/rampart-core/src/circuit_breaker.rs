//! Circuit breaker to prevent cascade failures.
//!
//! When calls to a downstream operation fail repeatedly, the circuit opens and
//! subsequent calls are rejected until the recovery timeout has passed. A
//! bounded number of trial calls is then admitted; the first outcome decides
//! whether the circuit closes again or re-opens.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use crate::error::ErrorKind;

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Name used in logs and status output
    pub name: String,

    /// Consecutive failures before opening circuit
    pub failure_threshold: u32,

    /// Time before attempting recovery
    #[serde(with = "crate::duration_serde")]
    pub recovery_timeout: Duration,

    /// Trial calls admitted while half-open
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Default tunables under the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// State of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    Closed,

    /// Circuit is open, calls are rejected
    Open,

    /// Testing if circuit can close
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Counters kept by a breaker. Only [`CircuitBreaker::reset`] clears them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityMetrics {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub circuit_breaker_opens: u64,
    pub recovery_attempts: u64,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub error_types: BTreeMap<ErrorKind, u64>,
}

impl ReliabilityMetrics {
    /// Fraction of recorded calls that succeeded; 1.0 before any call.
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            1.0
        } else {
            self.successful_calls as f64 / self.total_calls as f64
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub half_open_calls: u32,
    pub config: CircuitBreakerConfig,
    pub metrics: ReliabilityMetrics,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    half_open_calls: u32,
    metrics: ReliabilityMetrics,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            half_open_calls: 0,
            metrics: ReliabilityMetrics::default(),
        }
    }
}

/// Circuit breaker for one named operation.
///
/// The breaker is shared by every call using that name; all bookkeeping
/// happens under a per-instance lock that is never held across an await.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: RwLock<BreakerState>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: RwLock::new(BreakerState::closed()),
            config,
        }
    }

    /// Name from the configuration.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Check whether a call may proceed.
    ///
    /// The only side effect is the OPEN to HALF_OPEN transition once the
    /// recovery timeout has elapsed.
    pub fn can_execute(&self) -> bool {
        let state = self.state.read();
        match state.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => state.half_open_calls < self.config.half_open_max_calls,
            CircuitState::Open => {
                if self.recovery_elapsed(&state) {
                    drop(state);
                    self.transition_to_half_open();
                    let state = self.state.read();
                    state.state != CircuitState::Open
                        && state.half_open_calls < self.config.half_open_max_calls
                } else {
                    false
                }
            }
        }
    }

    /// Admit one call, returning a permit that must be resolved with its outcome.
    ///
    /// While half-open, acquiring a permit counts as one trial call.
    pub fn try_acquire(&self) -> Option<CallPermit<'_>> {
        if !self.can_execute() {
            return None;
        }

        let mut state = self.state.write();
        match state.state {
            CircuitState::Closed => {}
            CircuitState::HalfOpen => {
                if state.half_open_calls >= self.config.half_open_max_calls {
                    return None;
                }
                state.half_open_calls += 1;
            }
            // Re-opened between the check and the write lock
            CircuitState::Open => return None,
        }

        Some(CallPermit {
            breaker: self,
            resolved: false,
        })
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut state = self.state.write();
        state.metrics.total_calls += 1;
        state.metrics.successful_calls += 1;
        state.metrics.last_success_time = Some(Utc::now());

        match state.state {
            CircuitState::HalfOpen => {
                state.state = CircuitState::Closed;
                state.failure_count = 0;
                state.half_open_calls = 0;
                tracing::info!(breaker = %self.config.name, "Circuit closed after successful recovery");
            }
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            // Late result from a call admitted before the circuit opened
            CircuitState::Open => {}
        }
    }

    /// Record a failed call of the given kind.
    pub fn record_failure(&self, kind: ErrorKind) {
        let mut state = self.state.write();
        state.metrics.total_calls += 1;
        state.metrics.failed_calls += 1;
        state.metrics.last_failure_time = Some(Utc::now());
        *state.metrics.error_types.entry(kind).or_insert(0) += 1;
        state.last_failure = Some(Instant::now());

        match state.state {
            CircuitState::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold {
                    state.state = CircuitState::Open;
                    state.metrics.circuit_breaker_opens += 1;
                    tracing::warn!(
                        breaker = %self.config.name,
                        failures = state.failure_count,
                        kind = %kind,
                        "Circuit opened after repeated failures"
                    );
                }
            }
            CircuitState::HalfOpen => {
                // Failed during recovery, reopen
                state.state = CircuitState::Open;
                state.half_open_calls = 0;
                state.metrics.circuit_breaker_opens += 1;
                tracing::warn!(
                    breaker = %self.config.name,
                    kind = %kind,
                    "Circuit reopened after failed recovery attempt"
                );
            }
            CircuitState::Open => {}
        }
    }

    /// Force the circuit closed and clear every counter.
    pub fn reset(&self) {
        *self.state.write() = BreakerState::closed();
        tracing::info!(breaker = %self.config.name, "Circuit reset");
    }

    /// Get current state of the circuit.
    pub fn state(&self) -> CircuitState {
        self.state.read().state
    }

    pub fn failure_count(&self) -> u32 {
        self.state.read().failure_count
    }

    /// Snapshot of the counters.
    pub fn metrics(&self) -> ReliabilityMetrics {
        self.state.read().metrics.clone()
    }

    /// Snapshot of state, counters and configuration.
    pub fn status(&self) -> CircuitBreakerStatus {
        let state = self.state.read();
        CircuitBreakerStatus {
            name: self.config.name.clone(),
            state: state.state,
            failure_count: state.failure_count,
            half_open_calls: state.half_open_calls,
            config: self.config.clone(),
            metrics: state.metrics.clone(),
        }
    }

    fn recovery_elapsed(&self, state: &BreakerState) -> bool {
        state
            .last_failure
            .map_or(true, |at| at.elapsed() >= self.config.recovery_timeout)
    }

    /// Transition circuit to half-open state.
    fn transition_to_half_open(&self) {
        let mut state = self.state.write();
        // Another caller may have won the race since the read lock was released
        if state.state == CircuitState::Open && self.recovery_elapsed(&state) {
            state.state = CircuitState::HalfOpen;
            state.half_open_calls = 0;
            state.metrics.recovery_attempts += 1;
            tracing::info!(breaker = %self.config.name, "Circuit transitioning to half-open for recovery test");
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

/// Admission to run one call through a breaker.
///
/// Resolve it with [`CallPermit::succeed`] or [`CallPermit::fail`]. A permit
/// dropped unresolved (the caller was cancelled mid-call) records exactly one
/// [`ErrorKind::Cancelled`] failure.
#[must_use = "dropping a permit records a cancelled call"]
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    resolved: bool,
}

impl CallPermit<'_> {
    pub fn succeed(mut self) {
        self.resolved = true;
        self.breaker.record_success();
    }

    pub fn fail(mut self, kind: ErrorKind) {
        self.resolved = true;
        self.breaker.record_failure(kind);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            tracing::debug!(breaker = %self.breaker.name(), "Call cancelled before completion");
            self.breaker.record_failure(ErrorKind::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn breaker(failure_threshold: u32, recovery_timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            name: "test".to_string(),
            failure_threshold,
            recovery_timeout,
            half_open_max_calls: 1,
        })
    }

    #[test]
    fn test_circuit_starts_closed() {
        let cb = CircuitBreaker::default();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
    }

    #[test]
    fn test_circuit_opens_after_threshold() {
        let cb = breaker(2, Duration::from_secs(60));

        cb.record_failure(ErrorKind::Timeout);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());

        cb.record_failure(ErrorKind::Timeout);
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.failure_count(), 2);
        assert!(!cb.can_execute());
        assert_eq!(cb.metrics().circuit_breaker_opens, 1);
    }

    #[test]
    fn test_success_resets_failures() {
        let cb = breaker(3, Duration::from_secs(60));

        cb.record_failure(ErrorKind::Connection);
        cb.record_failure(ErrorKind::Connection);
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);

        // Need 3 more failures to open
        cb.record_failure(ErrorKind::Connection);
        cb.record_failure(ErrorKind::Connection);
        assert!(cb.can_execute());
    }

    #[test]
    fn test_half_open_after_recovery_timeout() {
        let cb = breaker(1, Duration::from_millis(10));

        cb.record_failure(ErrorKind::Other);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());

        sleep(Duration::from_millis(20));
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.metrics().recovery_attempts, 1);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = breaker(2, Duration::from_millis(10));
        cb.record_failure(ErrorKind::Timeout);
        cb.record_failure(ErrorKind::Timeout);

        sleep(Duration::from_millis(20));
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // A single failure is enough, no need to reach the threshold again
        cb.record_failure(ErrorKind::Timeout);
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.metrics().circuit_breaker_opens, 2);
        assert!(!cb.can_execute());
    }

    #[test]
    fn test_half_open_admits_bounded_trials() {
        let cb = breaker(1, Duration::from_millis(10));
        cb.record_failure(ErrorKind::Timeout);
        sleep(Duration::from_millis(20));

        let permit = cb.try_acquire().expect("first trial admitted");
        assert!(cb.try_acquire().is_none());
        assert!(!cb.can_execute());

        permit.succeed();
        assert_eq!(cb.state(), CircuitState::Closed);
        let permit = cb.try_acquire().expect("closed circuit admits calls");
        permit.succeed();
        assert_eq!(cb.metrics().successful_calls, 2);
    }

    #[test]
    fn test_dropped_permit_counts_as_cancelled_failure() {
        let cb = breaker(1, Duration::from_millis(10));
        cb.record_failure(ErrorKind::Timeout);
        sleep(Duration::from_millis(20));

        {
            let _permit = cb.try_acquire().expect("trial admitted");
        }

        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.status().half_open_calls, 0);
        let metrics = cb.metrics();
        assert_eq!(metrics.failed_calls, 2);
        assert_eq!(metrics.error_types.get(&ErrorKind::Cancelled), Some(&1));
    }

    #[test]
    fn test_error_types_counted() {
        let cb = CircuitBreaker::default();
        cb.record_failure(ErrorKind::Timeout);
        cb.record_failure(ErrorKind::Timeout);
        cb.record_failure(ErrorKind::RateLimited);

        let metrics = cb.metrics();
        assert_eq!(metrics.error_types[&ErrorKind::Timeout], 2);
        assert_eq!(metrics.error_types[&ErrorKind::RateLimited], 1);
        assert_eq!(metrics.total_calls, 3);
        assert!(metrics.last_failure_time.is_some());
    }

    #[test]
    fn test_reset_clears_everything() {
        let cb = breaker(1, Duration::from_secs(60));
        cb.record_failure(ErrorKind::Memory);
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        let status = cb.status();
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failure_count, 0);
        assert_eq!(status.metrics, ReliabilityMetrics::default());
    }

    #[test]
    fn test_status_serializes() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::named("llm"));
        cb.record_failure(ErrorKind::Timeout);
        let json = serde_json::to_value(cb.status()).unwrap();
        assert_eq!(json["name"], "llm");
        assert_eq!(json["state"], "closed");
        assert_eq!(json["config"]["recovery_timeout"], "1m");
        assert_eq!(json["metrics"]["error_types"]["timeout"], 1);
    }
}
