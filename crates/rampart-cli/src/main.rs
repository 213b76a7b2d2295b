//! rampart CLI
//!
//! Inspect reliability configuration and simulate coordinated failures.
//!
//! Usage:
//!   rampart config [--config FILE]
//!   rampart simulate [--config FILE] [--agents N] [--failing M] [--rounds R]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use rampart_core::{ErrorKind, OperationError, ReliabilityConfig};
use rampart_runtime::resilience::GENERAL;
use rampart_runtime::{
    Coordinated, CoordinatorStatus, FallbackCoordinator, SystemHealth, WrapperRegistry,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rampart")]
#[command(author, version, about = "Circuit breakers, retries and fallback coordination")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration as YAML
    Config {
        /// Configuration file (YAML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Drive simulated agents through the fallback coordinator
    Simulate {
        /// Configuration file (YAML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of agents to register
        #[arg(long, default_value = "5")]
        agents: usize,

        /// How many of the agents fail every call
        #[arg(long, default_value = "2")]
        failing: usize,

        /// Rounds of concurrent calls
        #[arg(long, default_value = "3")]
        rounds: usize,

        /// Override the configured retry count
        #[arg(long)]
        retries: Option<u32>,
    },
}

#[derive(Debug, Default, Serialize)]
struct Outcomes {
    completed: usize,
    failed: usize,
    emergency: usize,
    cascade_prevented: usize,
}

#[derive(Serialize)]
struct SimulationReport {
    outcomes: Outcomes,
    coordinator: CoordinatorStatus,
    registry: SystemHealth,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rampart=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", serde_yaml::to_string(&config)?);
        }
        Commands::Simulate {
            config,
            agents,
            failing,
            rounds,
            retries,
        } => {
            if failing > agents {
                bail!("--failing ({failing}) cannot exceed --agents ({agents})");
            }
            let mut config = load_config(config.as_deref())?;
            if let Some(retries) = retries {
                config.retry.max_retries = retries;
            }

            let report = simulate(config, agents, failing, rounds).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ReliabilityConfig> {
    let config = match path {
        Some(path) => ReliabilityConfig::from_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => ReliabilityConfig::default(),
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn simulate(
    config: ReliabilityConfig,
    agents: usize,
    failing: usize,
    rounds: usize,
) -> SimulationReport {
    let registry = WrapperRegistry::new(config.clone());
    let coordinator = Arc::new(FallbackCoordinator::new(config));

    let names: Vec<String> = (1..=agents).map(|i| format!("agent-{i}")).collect();
    for name in &names {
        coordinator.register_agent_with_handler(name, registry.get_wrapper(name, None, None));
    }

    let mut outcomes = Outcomes::default();
    for round in 1..=rounds {
        let calls = names.iter().enumerate().map(|(index, name)| {
            let coordinator = Arc::clone(&coordinator);
            let fails = index < failing;
            async move {
                coordinator
                    .execute_with_coordination(
                        name,
                        move || async move {
                            if fails {
                                Err(OperationError::new(
                                    ErrorKind::Connection,
                                    "simulated connection refused",
                                ))
                            } else {
                                Ok(())
                            }
                        },
                        "simulated_call",
                        GENERAL,
                    )
                    .await
            }
        });

        for result in join_all(calls).await {
            match result {
                Ok(Coordinated::Completed(())) => outcomes.completed += 1,
                Ok(Coordinated::Emergency(_)) => outcomes.emergency += 1,
                Ok(Coordinated::CascadePrevented(_)) => outcomes.cascade_prevented += 1,
                Err(_) => outcomes.failed += 1,
            }
        }

        let system = coordinator.compute_system_status();
        tracing::info!(
            round,
            health_level = %system.health_level,
            agents_in_fallback = system.agents_in_fallback.len(),
            emergency = system.emergency_mode_active,
            "Round complete"
        );
    }

    SimulationReport {
        outcomes,
        coordinator: coordinator.get_system_status(),
        registry: registry.get_system_health(),
    }
}
