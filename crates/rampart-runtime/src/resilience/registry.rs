//! Registry of reliability wrappers keyed by caller name.
//!
//! Constructed once at startup and shared by reference (typically inside an
//! `Arc`) with every consumer. Wrappers are created on first request and live
//! as long as the registry.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rampart_core::{CircuitBreakerConfig, ReliabilityConfig, RetryConfig};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::wrapper::{HealthStatus, ReliabilityWrapper};

/// Health score above which a caller counts as healthy.
pub const HEALTHY_SCORE: f64 = 0.8;

/// Health of every registered caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub agents: BTreeMap<String, HealthStatus>,
    pub total_agents: usize,

    /// Callers with a health score above 0.8
    pub healthy_agents: usize,

    pub timestamp: DateTime<Utc>,
}

/// Process-wide lookup of [`ReliabilityWrapper`]s.
#[derive(Debug, Default)]
pub struct WrapperRegistry {
    config: ReliabilityConfig,
    wrappers: RwLock<HashMap<String, Arc<ReliabilityWrapper>>>,
}

impl WrapperRegistry {
    /// Create a registry whose wrappers default to `config`.
    pub fn new(config: ReliabilityConfig) -> Self {
        Self {
            config,
            wrappers: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ReliabilityConfig {
        &self.config
    }

    /// Get the wrapper for `name`, creating it on first request.
    ///
    /// Overrides only apply when the wrapper is created; later calls with the
    /// same name return the cached instance unchanged.
    pub fn get_wrapper(
        &self,
        name: &str,
        breaker_config: Option<CircuitBreakerConfig>,
        retry_config: Option<RetryConfig>,
    ) -> Arc<ReliabilityWrapper> {
        if let Some(wrapper) = self.wrappers.read().get(name) {
            return Arc::clone(wrapper);
        }

        let mut wrappers = self.wrappers.write();
        let wrapper = wrappers.entry(name.to_string()).or_insert_with(|| {
            tracing::debug!(caller = name, "Creating reliability wrapper");
            let breaker_config = breaker_config.unwrap_or_else(|| self.config.breaker_for(name));
            let retry_config = retry_config.unwrap_or_else(|| self.config.retry.clone());
            Arc::new(
                ReliabilityWrapper::new(name, breaker_config, retry_config)
                    .with_history_capacity(self.config.error_history_capacity),
            )
        });
        Arc::clone(wrapper)
    }

    /// Existing wrapper for `name`, without creating one.
    pub fn get(&self, name: &str) -> Option<Arc<ReliabilityWrapper>> {
        self.wrappers.read().get(name).cloned()
    }

    /// Registered caller names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.wrappers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.wrappers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.wrappers.read().is_empty()
    }

    /// Reset every registered wrapper.
    pub fn reset_all(&self) {
        for wrapper in self.snapshot() {
            wrapper.reset();
        }
    }

    /// Health of every registered caller.
    pub fn get_system_health(&self) -> SystemHealth {
        let agents: BTreeMap<String, HealthStatus> = self
            .snapshot()
            .into_iter()
            .map(|wrapper| (wrapper.caller_name().to_string(), wrapper.health_status()))
            .collect();

        let healthy_agents = agents
            .values()
            .filter(|status| status.health_score > HEALTHY_SCORE)
            .count();

        SystemHealth {
            total_agents: agents.len(),
            healthy_agents,
            agents,
            timestamp: Utc::now(),
        }
    }

    fn snapshot(&self) -> Vec<Arc<ReliabilityWrapper>> {
        self.wrappers.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rampart_core::{ErrorKind, OperationError};
    use std::time::Duration;

    #[test]
    fn test_get_wrapper_is_idempotent() {
        let registry = WrapperRegistry::default();
        let first = registry.get_wrapper("triage", None, None);

        let custom = CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        };
        let second = registry.get_wrapper("triage", Some(custom), None);

        assert!(Arc::ptr_eq(&first, &second));
        // Not reconfigured by the second call
        assert_eq!(second.breaker().config().failure_threshold, 5);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_overrides_apply_on_creation() {
        let registry = WrapperRegistry::default();
        let retry = RetryConfig {
            max_retries: 0,
            ..Default::default()
        };
        let wrapper = registry.get_wrapper("analysis", None, Some(retry));
        assert_eq!(wrapper.retry_engine().config().max_retries, 0);
        assert_eq!(wrapper.breaker().name(), "analysis");
    }

    #[test]
    fn test_names_sorted() {
        let registry = WrapperRegistry::default();
        for name in ["zeta", "alpha", "mid"] {
            registry.get_wrapper(name, None, None);
        }
        assert_eq!(registry.names(), vec!["alpha", "mid", "zeta"]);
        assert!(registry.get("alpha").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[tokio::test]
    async fn test_system_health_counts_healthy() {
        let mut config = ReliabilityConfig::default();
        config.retry.max_retries = 0;
        config.retry.base_delay = Duration::from_millis(1);
        let registry = WrapperRegistry::new(config);

        registry.get_wrapper("good", None, None);
        let bad = registry.get_wrapper("bad", None, None);
        for _ in 0..3 {
            let _ = bad
                .execute(
                    || async { Err::<(), _>(OperationError::new(ErrorKind::Connection, "down")) },
                    "call",
                )
                .await;
        }

        let health = registry.get_system_health();
        assert_eq!(health.total_agents, 2);
        assert_eq!(health.healthy_agents, 1);
        assert_eq!(health.agents["good"].health_score, 1.0);
        assert_eq!(health.agents["bad"].recent_errors, 3);

        registry.reset_all();
        assert_eq!(registry.get_system_health().healthy_agents, 2);
    }
}
