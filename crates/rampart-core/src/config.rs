//! Configuration loading from YAML/JSON.
//!
//! ```yaml
//! circuit_breaker:
//!   failure_threshold: 5
//!   recovery_timeout: 60s
//!   half_open_max_calls: 3
//! retry:
//!   max_retries: 3
//!   base_delay: 1s
//!   max_delay: 60s
//!   jitter: true
//! error_history_capacity: 100
//! coordinator:
//!   max_concurrent_fallbacks: 3
//!   cascade_threshold: 0.5
//!   emergency_threshold: 0.7
//! ```
//!
//! Every field is optional; missing fields take their defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::RetryConfig;

/// Errors that can occur when loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Tunables for system-wide fallback coordination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Agents allowed in fallback at once before new ones are short-circuited
    pub max_concurrent_fallbacks: usize,

    /// Fallback rate at which the system is CRITICAL
    pub cascade_threshold: f64,

    /// Fallback rate (and critical-agent rate) at which the system is in EMERGENCY
    pub emergency_threshold: f64,

    /// Fallback rate above which the system is DEGRADED
    pub degraded_threshold: f64,

    /// Health score below which an agent counts toward emergency mode
    pub emergency_health_floor: f64,

    /// Health regained per success
    pub success_recovery: f64,

    /// Health lost per failure
    pub failure_penalty: f64,

    /// System status snapshots kept
    pub history_capacity: usize,

    /// Coordinator-level breaker kept per agent
    pub agent_breaker: CircuitBreakerConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fallbacks: 3,
            cascade_threshold: 0.5,
            emergency_threshold: 0.7,
            degraded_threshold: 0.2,
            emergency_health_floor: 0.3,
            success_recovery: 0.1,
            failure_penalty: 0.2,
            history_capacity: 100,
            agent_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Complete reliability configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliabilityConfig {
    /// Defaults for per-operation breakers
    pub circuit_breaker: CircuitBreakerConfig,

    /// Defaults for retry engines
    pub retry: RetryConfig,

    /// Error records kept per wrapper
    pub error_history_capacity: usize,

    pub coordinator: CoordinatorConfig,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            error_history_capacity: 100,
            coordinator: CoordinatorConfig::default(),
        }
    }
}

impl ReliabilityConfig {
    /// Parse and validate a YAML config.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON config.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file. `.json` files are read as JSON, anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        }
    }

    /// Reject configurations the breaker and coordinator cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_breaker("circuit_breaker", &self.circuit_breaker)?;
        validate_breaker("coordinator.agent_breaker", &self.coordinator.agent_breaker)?;

        if self.retry.base_delay > self.retry.max_delay {
            return Err(ConfigError::ValidationError(format!(
                "retry.base_delay ({}) exceeds retry.max_delay ({})",
                humantime::format_duration(self.retry.base_delay),
                humantime::format_duration(self.retry.max_delay),
            )));
        }

        if self.error_history_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "error_history_capacity must be at least 1".to_string(),
            ));
        }

        let coordinator = &self.coordinator;
        for (field, value) in [
            ("cascade_threshold", coordinator.cascade_threshold),
            ("emergency_threshold", coordinator.emergency_threshold),
            ("degraded_threshold", coordinator.degraded_threshold),
            ("emergency_health_floor", coordinator.emergency_health_floor),
            ("success_recovery", coordinator.success_recovery),
            ("failure_penalty", coordinator.failure_penalty),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "coordinator.{field} must be within [0, 1], got {value}"
                )));
            }
        }

        if coordinator.cascade_threshold > coordinator.emergency_threshold {
            return Err(ConfigError::ValidationError(
                "coordinator.cascade_threshold must not exceed coordinator.emergency_threshold"
                    .to_string(),
            ));
        }

        if coordinator.history_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "coordinator.history_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Breaker config for an operation, named after it.
    pub fn breaker_for(&self, name: &str) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            name: name.to_string(),
            ..self.circuit_breaker.clone()
        }
    }
}

fn validate_breaker(section: &str, config: &CircuitBreakerConfig) -> Result<(), ConfigError> {
    if config.failure_threshold == 0 {
        return Err(ConfigError::ValidationError(format!(
            "{section}.failure_threshold must be at least 1"
        )));
    }
    if config.half_open_max_calls == 0 {
        return Err(ConfigError::ValidationError(format!(
            "{section}.half_open_max_calls must be at least 1"
        )));
    }
    if config.recovery_timeout == Duration::ZERO {
        tracing::warn!(section, "Zero recovery timeout, open circuits will retry immediately");
    }
    Ok(())
}
