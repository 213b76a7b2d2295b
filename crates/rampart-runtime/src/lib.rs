//! # rampart-runtime
//!
//! Async protection for calls to unreliable downstream operations.
//!
//! Builds on the deterministic pieces in `rampart-core`:
//! - [`RetryEngine`] retries retryable failures with exponential backoff
//! - [`ReliabilityWrapper`] composes a circuit breaker, retries, an optional
//!   per-attempt timeout and an optional fallback for one caller
//! - [`WrapperRegistry`] hands out one shared wrapper per caller name
//! - [`FallbackCoordinator`] tracks health across agents and serves canned
//!   responses under cascade prevention or emergency mode
//!
//! ## Example
//!
//! ```rust,no_run
//! use rampart_core::{ErrorKind, OperationError, ReliabilityConfig};
//! use rampart_runtime::WrapperRegistry;
//!
//! # async fn run() -> Result<(), rampart_runtime::ReliabilityError> {
//! let registry = WrapperRegistry::new(ReliabilityConfig::default());
//! let wrapper = registry.get_wrapper("triage", None, None);
//!
//! let answer = wrapper
//!     .execute(
//!         || async { Err::<u32, _>(OperationError::new(ErrorKind::Timeout, "slow upstream")) },
//!         "classify",
//!     )
//!     .await;
//! assert!(answer.is_err());
//! # Ok(())
//! # }
//! ```

mod error;
pub mod resilience;

pub use error::ReliabilityError;
pub use resilience::{
    Coordinated, CoordinatorStatus, DegradedReason, DegradedResponse, FallbackCoordinator,
    FallbackTemplate, HealthStatus, ReliabilityWrapper, RetryEngine, SystemHealth,
    WrapperRegistry,
};
