//! System-wide fallback coordination.
//!
//! The coordinator keeps, per registered agent, a handler
//! ([`ReliabilityWrapper`]), a coordinator-level [`CircuitBreaker`] and an
//! [`AgentFallbackStatus`]. Per-agent health rolls up into a
//! [`SystemFallbackStatus`] that drives two protections:
//!
//! - **Cascade prevention**: once `max_concurrent_fallbacks` agents are in
//!   fallback, calls for agents not already in fallback get a canned response
//! - **Emergency mode**: once the share of agents with a low health score or
//!   an open breaker reaches `emergency_threshold`, every call gets the canned
//!   emergency response for its fallback type
//!
//! Emergency mode is evaluated fresh on every call and is independent of the
//! fallback-rate based [`HealthLevel`].

use parking_lot::{Mutex, RwLock};
use rampart_core::{
    AgentFallbackStatus, BoundedHistory, CircuitBreaker, CircuitBreakerConfig, CircuitState,
    CoordinatorConfig, ErrorKind, HealthLevel, OperationError, ReliabilityConfig,
    SystemFallbackStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use super::fallback::{DegradedResponse, FallbackTemplate, FallbackTemplates};
use super::wrapper::ReliabilityWrapper;
use crate::error::ReliabilityError;

/// Outcome of a coordinated call.
#[derive(Debug, Clone, PartialEq)]
pub enum Coordinated<T> {
    /// The agent's handler ran and succeeded
    Completed(T),

    /// Emergency mode was active; the operation was not run
    Emergency(DegradedResponse),

    /// Cascade prevention held this agent back; the operation was not run
    CascadePrevented(DegradedResponse),
}

impl<T> Coordinated<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Coordinated::Completed(_))
    }

    pub fn into_completed(self) -> Option<T> {
        match self {
            Coordinated::Completed(value) => Some(value),
            _ => None,
        }
    }

    /// The canned response, when one was served.
    pub fn degraded(&self) -> Option<&DegradedResponse> {
        match self {
            Coordinated::Completed(_) => None,
            Coordinated::Emergency(response) | Coordinated::CascadePrevented(response) => {
                Some(response)
            }
        }
    }
}

/// Dashboard view of the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    pub system: SystemFallbackStatus,
    pub agents: BTreeMap<String, AgentFallbackStatus>,
    pub history_len: usize,
}

struct AgentSlot {
    handler: Arc<ReliabilityWrapper>,
    breaker: CircuitBreaker,
    status: Mutex<AgentFallbackStatus>,
}

/// Aggregates per-agent health and applies system-level protection.
pub struct FallbackCoordinator {
    defaults: ReliabilityConfig,
    agents: RwLock<HashMap<String, Arc<AgentSlot>>>,
    templates: FallbackTemplates,
    history: Mutex<BoundedHistory<SystemFallbackStatus>>,
}

impl FallbackCoordinator {
    /// Create a coordinator. Handlers built by [`Self::register_agent`] use
    /// `config` as their defaults.
    pub fn new(config: ReliabilityConfig) -> Self {
        let history = BoundedHistory::new(config.coordinator.history_capacity);
        Self {
            defaults: config,
            agents: RwLock::new(HashMap::new()),
            templates: FallbackTemplates::new(),
            history: Mutex::new(history),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.defaults.coordinator
    }

    /// Register `name` with a handler built from the coordinator's defaults.
    ///
    /// Returns `false` if the agent was already registered.
    pub fn register_agent(&self, name: &str) -> bool {
        if self.agents.read().contains_key(name) {
            return false;
        }
        let handler = Arc::new(ReliabilityWrapper::from_config(name, &self.defaults));
        self.register_agent_with_handler(name, handler)
    }

    /// Register `name` with an existing handler, e.g. one owned by a registry.
    ///
    /// Returns `false` if the agent was already registered.
    pub fn register_agent_with_handler(&self, name: &str, handler: Arc<ReliabilityWrapper>) -> bool {
        let mut agents = self.agents.write();
        if agents.contains_key(name) {
            return false;
        }

        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            name: format!("{name}_coordinator"),
            ..self.config().agent_breaker.clone()
        });
        agents.insert(
            name.to_string(),
            Arc::new(AgentSlot {
                handler,
                breaker,
                status: Mutex::new(AgentFallbackStatus::new(name)),
            }),
        );
        tracing::info!(agent = name, total_agents = agents.len(), "Agent registered for fallback coordination");
        true
    }

    /// Add or replace an emergency template.
    pub fn register_template(&self, fallback_type: impl Into<String>, template: FallbackTemplate) {
        self.templates.register(fallback_type, template);
    }

    /// Run `operation` for `agent`, unless system-level protection is active.
    ///
    /// Handler failures update the agent's status and are returned unchanged.
    pub async fn execute_with_coordination<T, F, Fut>(
        &self,
        agent: &str,
        operation: F,
        op_name: &str,
        fallback_type: &str,
    ) -> Result<Coordinated<T>, ReliabilityError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let slot = self.slot(agent)?;

        if self.is_emergency_mode() {
            tracing::warn!(agent, fallback_type, "Emergency mode active, serving canned response");
            return Ok(Coordinated::Emergency(
                self.templates.emergency_response(agent, fallback_type),
            ));
        }

        if let Some(in_fallback) = self.cascade_blocked(&slot) {
            tracing::warn!(
                agent,
                agents_in_fallback = in_fallback,
                "Cascade prevention active, deferring call"
            );
            return Ok(Coordinated::CascadePrevented(self.templates.cascade_response(
                agent,
                fallback_type,
                in_fallback,
                self.config().max_concurrent_fallbacks,
            )));
        }

        match slot.handler.execute(operation, op_name).await {
            Ok(value) => {
                self.apply_success(&slot);
                Ok(Coordinated::Completed(value))
            }
            Err(err) => {
                self.apply_failure(&slot, err.kind());
                Err(err)
            }
        }
    }

    /// Record a success for `agent` observed outside the coordinator.
    pub fn record_agent_success(&self, agent: &str) -> Result<(), ReliabilityError> {
        let slot = self.slot(agent)?;
        self.apply_success(&slot);
        Ok(())
    }

    /// Record a failure for `agent` observed outside the coordinator.
    pub fn record_agent_failure(&self, agent: &str, kind: ErrorKind) -> Result<(), ReliabilityError> {
        let slot = self.slot(agent)?;
        self.apply_failure(&slot, kind);
        Ok(())
    }

    /// Whether the share of critical agents has reached the emergency threshold.
    ///
    /// An agent is critical when its health score is below
    /// `emergency_health_floor` or its coordinator breaker is open.
    pub fn is_emergency_mode(&self) -> bool {
        let statuses = self.agent_statuses();
        emergency_active(&statuses, self.config())
    }

    /// Recompute system health and append it to the history.
    pub fn update_system_health(&self) -> SystemFallbackStatus {
        let status = self.compute_system_status();

        let mut history = self.history.lock();
        let previous = history.latest().map(|s| s.health_level);
        if previous != Some(status.health_level) {
            tracing::info!(
                from = ?previous,
                to = %status.health_level,
                agents_in_fallback = status.agents_in_fallback.len(),
                total_agents = status.total_agents,
                "System health level changed"
            );
        }
        history.push(status.clone());
        status
    }

    /// Current system status without touching the history.
    pub fn compute_system_status(&self) -> SystemFallbackStatus {
        let statuses = self.agent_statuses();
        let config = self.config();

        let mut agents_in_fallback: Vec<String> = statuses
            .iter()
            .filter(|s| s.fallback_active)
            .map(|s| s.agent_name.clone())
            .collect();
        agents_in_fallback.sort();

        let total_agents = statuses.len();
        let fallback_rate = if total_agents == 0 {
            0.0
        } else {
            agents_in_fallback.len() as f64 / total_agents as f64
        };

        SystemFallbackStatus {
            health_level: HealthLevel::from_fallback_rate(fallback_rate, config),
            cascade_prevention_active: agents_in_fallback.len() >= config.max_concurrent_fallbacks,
            emergency_mode_active: emergency_active(&statuses, config),
            agents_in_fallback,
            total_agents,
            timestamp: chrono::Utc::now(),
        }
    }

    /// System status plus every agent's status.
    pub fn get_system_status(&self) -> CoordinatorStatus {
        let agents = self
            .agent_statuses()
            .into_iter()
            .map(|status| (status.agent_name.clone(), status))
            .collect();

        CoordinatorStatus {
            system: self.compute_system_status(),
            agents,
            history_len: self.history.lock().len(),
        }
    }

    pub fn agent_status(&self, agent: &str) -> Option<AgentFallbackStatus> {
        let slot = self.agents.read().get(agent).cloned()?;
        let mut status = slot.status.lock();
        status.circuit_breaker_open = breaker_open(&slot.breaker);
        Some(status.clone())
    }

    /// The agent's handler, for direct use or inspection.
    pub fn handler(&self, agent: &str) -> Option<Arc<ReliabilityWrapper>> {
        self.agents.read().get(agent).map(|slot| Arc::clone(&slot.handler))
    }

    /// State of the agent's coordinator-level breaker.
    pub fn breaker_state(&self, agent: &str) -> Option<CircuitState> {
        self.agents.read().get(agent).map(|slot| slot.breaker.state())
    }

    /// Recorded system snapshots, oldest first.
    pub fn health_history(&self) -> Vec<SystemFallbackStatus> {
        self.history.lock().to_vec()
    }

    /// Registered agent names, sorted.
    pub fn agent_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Reset one agent's breaker, handler and status together.
    pub fn reset_agent_status(&self, agent: &str) -> Result<(), ReliabilityError> {
        let slot = self.slot(agent)?;
        {
            let mut status = slot.status.lock();
            slot.breaker.reset();
            slot.handler.reset();
            *status = AgentFallbackStatus::new(agent);
        }
        tracing::info!(agent, "Agent fallback status reset");
        self.update_system_health();
        Ok(())
    }

    /// Reset every agent and clear the health history.
    pub fn reset_system_status(&self) {
        let slots: Vec<(String, Arc<AgentSlot>)> = self
            .agents
            .read()
            .iter()
            .map(|(name, slot)| (name.clone(), Arc::clone(slot)))
            .collect();

        for (name, slot) in slots {
            let mut status = slot.status.lock();
            slot.breaker.reset();
            slot.handler.reset();
            *status = AgentFallbackStatus::new(name);
        }

        self.history.lock().clear();
        tracing::info!("System fallback status reset");
    }

    fn slot(&self, agent: &str) -> Result<Arc<AgentSlot>, ReliabilityError> {
        self.agents
            .read()
            .get(agent)
            .cloned()
            .ok_or_else(|| ReliabilityError::UnknownAgent(agent.to_string()))
    }

    /// Snapshot of every agent's status, with breaker flags brought up to date.
    fn agent_statuses(&self) -> Vec<AgentFallbackStatus> {
        let slots: Vec<Arc<AgentSlot>> = self.agents.read().values().cloned().collect();
        slots
            .iter()
            .map(|slot| {
                let mut status = slot.status.lock();
                status.circuit_breaker_open = breaker_open(&slot.breaker);
                status.clone()
            })
            .collect()
    }

    /// Agents in fallback, if `slot` must be held back to prevent a cascade.
    fn cascade_blocked(&self, slot: &AgentSlot) -> Option<usize> {
        if slot.status.lock().fallback_active {
            return None;
        }
        let in_fallback = self
            .agent_statuses()
            .iter()
            .filter(|s| s.fallback_active)
            .count();
        (in_fallback >= self.config().max_concurrent_fallbacks).then_some(in_fallback)
    }

    fn apply_success(&self, slot: &AgentSlot) {
        {
            let mut status = slot.status.lock();
            status.apply_success(self.config().success_recovery);
            // An expired open circuit must reach half-open before the outcome counts
            slot.breaker.can_execute();
            slot.breaker.record_success();
            status.circuit_breaker_open = breaker_open(&slot.breaker);
        }
        self.update_system_health();
    }

    fn apply_failure(&self, slot: &AgentSlot, kind: ErrorKind) {
        {
            let mut status = slot.status.lock();
            status.apply_failure(self.config().failure_penalty);
            // An expired open circuit must reach half-open before the outcome counts
            slot.breaker.can_execute();
            slot.breaker.record_failure(kind);
            status.circuit_breaker_open = breaker_open(&slot.breaker);
            tracing::warn!(
                agent = %status.agent_name,
                kind = %kind,
                health_score = status.health_score,
                recent_failures = status.recent_failures,
                "Agent entered fallback"
            );
        }
        self.update_system_health();
    }
}

impl Default for FallbackCoordinator {
    fn default() -> Self {
        Self::new(ReliabilityConfig::default())
    }
}

impl std::fmt::Debug for FallbackCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackCoordinator")
            .field("agents", &self.agent_names())
            .field("templates", &self.templates.keys())
            .finish()
    }
}

/// Whether `breaker` is open, after promoting it to half-open if its
/// recovery timeout has elapsed.
fn breaker_open(breaker: &CircuitBreaker) -> bool {
    breaker.can_execute();
    breaker.state() == CircuitState::Open
}

fn emergency_active(statuses: &[AgentFallbackStatus], config: &CoordinatorConfig) -> bool {
    if statuses.is_empty() {
        return false;
    }
    let critical = statuses
        .iter()
        .filter(|s| s.is_critical(config.emergency_health_floor))
        .count();
    critical as f64 / statuses.len() as f64 >= config.emergency_threshold
}
