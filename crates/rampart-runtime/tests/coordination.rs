//! End-to-end coordinator scenarios: cascade prevention, emergency mode and
//! recovery across several agents.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rampart_core::{ErrorKind, HealthLevel, OperationError, ReliabilityConfig};
use rampart_runtime::resilience::{DegradedReason, GENERAL, TRIAGE};
use rampart_runtime::{Coordinated, FallbackCoordinator, WrapperRegistry};

fn no_retry_config() -> ReliabilityConfig {
    let mut config = ReliabilityConfig::default();
    config.retry.max_retries = 0;
    config.retry.base_delay = Duration::from_millis(1);
    config.retry.jitter = false;
    config
}

fn coordinator_with_agents(count: usize) -> FallbackCoordinator {
    let coordinator = FallbackCoordinator::new(no_retry_config());
    for i in 1..=count {
        assert!(coordinator.register_agent(&format!("agent-{i}")));
    }
    coordinator
}

async fn fail_once(coordinator: &FallbackCoordinator, agent: &str) {
    let result: Result<Coordinated<()>, _> = coordinator
        .execute_with_coordination(
            agent,
            || async { Err(OperationError::new(ErrorKind::Connection, "connection refused")) },
            "call",
            GENERAL,
        )
        .await;
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Connection);
}

#[tokio::test]
async fn cascade_prevention_skips_handler_of_healthy_agent() {
    let coordinator = coordinator_with_agents(5);

    for agent in ["agent-1", "agent-2", "agent-3"] {
        fail_once(&coordinator, agent).await;
    }
    // With three agents already degraded, agent-4 can only be marked from outside
    coordinator
        .record_agent_failure("agent-4", ErrorKind::Timeout)
        .unwrap();

    let calls = AtomicUsize::new(0);
    let outcome = coordinator
        .execute_with_coordination(
            "agent-5",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok("real answer") }
            },
            "call",
            TRIAGE,
        )
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let Coordinated::CascadePrevented(response) = outcome else {
        panic!("expected cascade prevention");
    };
    assert_eq!(response.reason, DegradedReason::CascadePrevention);
    assert_eq!(response.agent, "agent-5");
    assert_eq!(response.data["agents_in_fallback"], 4);

    let handler = coordinator.handler("agent-5").unwrap();
    assert_eq!(handler.breaker().metrics().total_calls, 0);

    // Fallback rate says emergency, but no agent is critical yet
    let status = coordinator.get_system_status();
    assert_eq!(status.system.health_level, HealthLevel::Emergency);
    assert!(status.system.cascade_prevention_active);
    assert!(!status.system.emergency_mode_active);
    assert_eq!(status.system.agents_in_fallback.len(), 4);
}

#[tokio::test]
async fn emergency_mode_serves_requested_template() {
    let coordinator = coordinator_with_agents(5);

    for i in 1..=4 {
        for _ in 0..4 {
            coordinator
                .record_agent_failure(&format!("agent-{i}"), ErrorKind::Timeout)
                .unwrap();
        }
    }
    let degraded = coordinator.agent_status("agent-1").unwrap();
    assert!(degraded.health_score < 0.3);
    assert!(coordinator.is_emergency_mode());

    let calls = AtomicUsize::new(0);
    let outcome = coordinator
        .execute_with_coordination(
            "agent-5",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            },
            "call",
            TRIAGE,
        )
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let Coordinated::Emergency(response) = outcome else {
        panic!("expected emergency response");
    };
    assert_eq!(response.reason, DegradedReason::EmergencyMode);
    assert_eq!(response.fallback_type, TRIAGE);
    assert_eq!(response.data["requires_human_review"], true);

    // Agents already in fallback get the same treatment
    let outcome = coordinator
        .execute_with_coordination("agent-1", || async { Ok(()) }, "call", "summarization")
        .await
        .unwrap();
    let response = outcome.degraded().unwrap();
    assert_eq!(response.reason, DegradedReason::EmergencyMode);
    assert_eq!(response.fallback_type, GENERAL);
}

#[tokio::test]
async fn reset_restores_normal_service() {
    let coordinator = coordinator_with_agents(3);
    for i in 1..=3 {
        for _ in 0..4 {
            coordinator
                .record_agent_failure(&format!("agent-{i}"), ErrorKind::Timeout)
                .unwrap();
        }
    }
    assert!(coordinator.is_emergency_mode());

    coordinator.reset_system_status();
    assert!(!coordinator.is_emergency_mode());
    assert!(coordinator.health_history().is_empty());

    let outcome = coordinator
        .execute_with_coordination("agent-2", || async { Ok(42) }, "call", GENERAL)
        .await
        .unwrap();
    assert_eq!(outcome.into_completed(), Some(42));
    assert_eq!(
        coordinator.health_history().last().map(|s| s.health_level),
        Some(HealthLevel::Healthy)
    );
}

#[tokio::test]
async fn registry_wrappers_can_back_coordinated_agents() {
    let registry = WrapperRegistry::new(no_retry_config());
    let coordinator = FallbackCoordinator::new(no_retry_config());

    let wrapper = registry.get_wrapper("analysis", None, None);
    assert!(coordinator.register_agent_with_handler("analysis", Arc::clone(&wrapper)));
    assert!(!coordinator.register_agent_with_handler("analysis", wrapper));

    fail_once(&coordinator, "analysis").await;

    // The failure is visible through the registry's wrapper too
    let health = registry.get_system_health();
    assert_eq!(health.agents["analysis"].total_errors, 1);
    assert_eq!(health.healthy_agents, 0);
    assert!(coordinator.agent_status("analysis").unwrap().fallback_active);
}

#[tokio::test]
async fn concurrent_calls_keep_status_consistent() {
    let mut config = no_retry_config();
    config.coordinator.history_capacity = 16;
    let coordinator = Arc::new(FallbackCoordinator::new(config));
    for i in 0..4 {
        coordinator.register_agent(&format!("worker-{i}"));
    }

    let calls = (0..64).map(|n| {
        let coordinator = Arc::clone(&coordinator);
        async move {
            let agent = format!("worker-{}", n % 4);
            coordinator
                .execute_with_coordination(&agent, || async { Ok(n) }, "work", GENERAL)
                .await
        }
    });
    let results = join_all(calls).await;

    assert!(results
        .iter()
        .all(|r| matches!(r, Ok(Coordinated::Completed(_)))));
    assert_eq!(coordinator.health_history().len(), 16);

    let status = coordinator.get_system_status();
    assert_eq!(status.system.total_agents, 4);
    assert!(status.agents.values().all(|a| a.health_score == 1.0));
}
