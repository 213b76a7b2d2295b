//! # rampart-core
//!
//! Deterministic building blocks for protecting calls to unreliable
//! downstream operations.
//!
//! This crate never awaits. It provides:
//! - An explicit error taxonomy ([`ErrorKind`], [`Severity`]) and the
//!   [`OperationError`] every protected operation returns
//! - The per-operation [`CircuitBreaker`] state machine
//! - Retry policy and backoff math ([`RetryConfig`])
//! - Health accounting shared by wrappers and the fallback coordinator
//! - Configuration loading ([`ReliabilityConfig`])
//!
//! The async composition (retry engine, reliability wrapper, registry and
//! fallback coordinator) lives in `rampart-runtime`.
//!
//! ## Example
//!
//! ```rust
//! use rampart_core::{CircuitBreaker, CircuitBreakerConfig, CircuitState, ErrorKind};
//!
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig {
//!     failure_threshold: 2,
//!     ..CircuitBreakerConfig::named("llm")
//! });
//!
//! breaker.record_failure(ErrorKind::Timeout);
//! breaker.record_failure(ErrorKind::Timeout);
//! assert_eq!(breaker.state(), CircuitState::Open);
//! assert!(!breaker.can_execute());
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod duration_serde;
pub mod error;
pub mod health;
pub mod history;
pub mod retry;

// Re-export main types at crate root
pub use circuit_breaker::{
    CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStatus, CircuitState,
    ReliabilityMetrics,
};
pub use config::{ConfigError, CoordinatorConfig, ReliabilityConfig};
pub use error::{ErrorKind, OperationError, Severity};
pub use health::{
    health_score, AgentFallbackStatus, ErrorRecord, HealthLevel, SystemFallbackStatus,
};
pub use history::BoundedHistory;
pub use retry::{RetryBackoff, RetryConfig};
