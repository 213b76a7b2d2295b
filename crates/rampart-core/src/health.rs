//! Health accounting: error records, health scores and system health levels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::circuit_breaker::ReliabilityMetrics;
use crate::config::CoordinatorConfig;
use crate::error::{ErrorKind, OperationError};

const OPEN_PENALTY_PER_OPEN: f64 = 0.2;
const OPEN_PENALTY_CAP: f64 = 0.5;
const ERROR_PENALTY_PER_ERROR: f64 = 0.1;
const ERROR_PENALTY_CAP: f64 = 0.3;

/// Health score in `[0, 1]`.
///
/// Success rate minus a penalty for breaker opens (0.2 each, at most 0.5) and
/// for recent errors (0.1 each, at most 0.3).
pub fn health_score(metrics: &ReliabilityMetrics, recent_errors: usize) -> f64 {
    let open_penalty = (OPEN_PENALTY_PER_OPEN * metrics.circuit_breaker_opens as f64).min(OPEN_PENALTY_CAP);
    let error_penalty = (ERROR_PENALTY_PER_ERROR * recent_errors as f64).min(ERROR_PENALTY_CAP);
    (metrics.success_rate() - open_penalty - error_penalty).clamp(0.0, 1.0)
}

/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,

    /// Operation name; fallback failures carry a `_fallback` suffix
    pub operation: String,

    pub error_kind: ErrorKind,

    pub message: String,

    /// Wrapper (agent) that owns the operation
    pub caller_name: String,
}

impl ErrorRecord {
    /// Record `error` as failing `operation` right now.
    pub fn new(caller_name: &str, operation: &str, error: &OperationError) -> Self {
        Self {
            timestamp: Utc::now(),
            operation: operation.to_string(),
            error_kind: error.kind,
            message: error.message.clone(),
            caller_name: caller_name.to_string(),
        }
    }
}

/// System-wide health level derived from the share of agents in fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Critical,
    Emergency,
}

impl HealthLevel {
    /// Level for a given fallback rate (agents in fallback / total agents).
    pub fn from_fallback_rate(rate: f64, config: &CoordinatorConfig) -> Self {
        if rate >= config.emergency_threshold {
            HealthLevel::Emergency
        } else if rate >= config.cascade_threshold {
            HealthLevel::Critical
        } else if rate > config.degraded_threshold {
            HealthLevel::Degraded
        } else {
            HealthLevel::Healthy
        }
    }
}

impl fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthLevel::Healthy => write!(f, "healthy"),
            HealthLevel::Degraded => write!(f, "degraded"),
            HealthLevel::Critical => write!(f, "critical"),
            HealthLevel::Emergency => write!(f, "emergency"),
        }
    }
}

/// Coordinator's view of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentFallbackStatus {
    pub agent_name: String,
    pub circuit_breaker_open: bool,
    pub recent_failures: u32,
    pub fallback_active: bool,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub health_score: f64,
}

impl AgentFallbackStatus {
    /// Fresh status for a newly registered (or reset) agent.
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            circuit_breaker_open: false,
            recent_failures: 0,
            fallback_active: false,
            last_failure_time: None,
            health_score: 1.0,
        }
    }

    /// Apply a success: recover health by `recovery`, leave fallback.
    pub fn apply_success(&mut self, recovery: f64) {
        self.health_score = (self.health_score + recovery).min(1.0);
        self.fallback_active = false;
    }

    /// Apply a failure: lose `penalty` health, enter fallback.
    pub fn apply_failure(&mut self, penalty: f64) {
        self.recent_failures = self.recent_failures.saturating_add(1);
        self.health_score = (self.health_score - penalty).max(0.0);
        self.fallback_active = true;
        self.last_failure_time = Some(Utc::now());
    }

    /// Whether this agent counts toward emergency mode.
    pub fn is_critical(&self, health_floor: f64) -> bool {
        self.health_score < health_floor || self.circuit_breaker_open
    }
}

/// Snapshot of the whole system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemFallbackStatus {
    pub health_level: HealthLevel,
    pub agents_in_fallback: Vec<String>,
    pub total_agents: usize,
    pub cascade_prevention_active: bool,
    pub emergency_mode_active: bool,
    pub timestamp: DateTime<Utc>,
}

impl SystemFallbackStatus {
    /// Status of a system with no registered agents.
    pub fn empty() -> Self {
        Self {
            health_level: HealthLevel::Healthy,
            agents_in_fallback: Vec::new(),
            total_agents: 0,
            cascade_prevention_active: false,
            emergency_mode_active: false,
            timestamp: Utc::now(),
        }
    }

    /// Share of agents currently in fallback.
    pub fn fallback_rate(&self) -> f64 {
        if self.total_agents == 0 {
            0.0
        } else {
            self.agents_in_fallback.len() as f64 / self.total_agents as f64
        }
    }
}
