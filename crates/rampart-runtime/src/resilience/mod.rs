//! Resilience patterns for rampart-runtime.
//!
//! This module provides:
//! - Retry with exponential backoff
//! - A per-caller reliability wrapper (breaker, retries, timeout, fallback)
//! - A process-wide registry of wrappers
//! - System-level fallback coordination with canned degraded responses

mod coordinator;
mod fallback;
mod registry;
mod retry;
mod wrapper;

pub use coordinator::{Coordinated, CoordinatorStatus, FallbackCoordinator};
pub use fallback::{
    DegradedReason, DegradedResponse, FallbackTemplate, FallbackTemplates, DATA_ANALYSIS,
    GENERAL, TRIAGE,
};
pub use registry::{SystemHealth, WrapperRegistry, HEALTHY_SCORE};
pub use retry::RetryEngine;
pub use wrapper::{Fallback, HealthStatus, ReliabilityWrapper, DEFAULT_ERROR_HISTORY};
