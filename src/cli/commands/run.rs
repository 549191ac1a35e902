//! Run command implementation
//!
//! Wires the HTTP generation client, the bundled agent engine, the file
//! checkpoint store and the viewer launcher into a [`CheckpointedExecutor`].

use crate::accounting::{LedgerAccounting, UsageLedger};
use crate::app::setup_interrupt_handlers;
use crate::checkpoint::FileCheckpointStore;
use crate::config::DriverConfig;
use crate::engine::{load_history, AgentSimulation};
use crate::error::{ErrorCode, SimError};
use crate::executor::{
    AuxiliaryRegistry, CheckpointedExecutor, RunOutcome, RunState, SimulationRun,
    ViewerLauncher, VisualizationMode,
};
use crate::generation::{
    GenerationClient, GeneratorOptions, HttpGenerationClient, RetryingGenerator,
};
use anyhow::Result;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};

/// Arguments of `simdrive run`
#[derive(Debug, Clone)]
pub struct RunParams {
    pub origin: Option<String>,
    pub destination: String,
    pub steps: u64,
    pub checkpoint_frequency: u64,
    pub visualization: VisualizationMode,
    pub history: Option<PathBuf>,
    pub max_stepbacks: Option<u32>,
    pub config: Option<PathBuf>,
    pub verbose: u8,
}

pub async fn run_simulation(params: RunParams) -> Result<()> {
    let config = DriverConfig::load(params.config.as_deref())?;
    let storage_root = config.storage_root()?;

    let mut options = config.executor.clone();
    if let Some(max_stepbacks) = params.max_stepbacks {
        options.max_stepbacks = max_stepbacks;
    }

    let mut run = SimulationRun::new(
        params.origin,
        params.destination,
        params.steps,
        params.checkpoint_frequency,
        options.max_stepbacks,
    )?;

    let history = match &params.history {
        Some(path) => Some(load_history(path).map_err(|e| {
            SimError::engine(ErrorCode::ENGINE_HISTORY_INVALID, format!("{:#}", e), None)
        })?),
        None => None,
    };

    let api_key = config.generation.api_key();
    if api_key.is_none() {
        warn!(
            "{} is not set, requests will be sent without an API key",
            config.generation.api_key_env
        );
    }

    let ledger = Arc::new(UsageLedger::new(config.accounting.clone()));
    let client: Arc<dyn GenerationClient> = Arc::new(
        HttpGenerationClient::new(
            config.generation.endpoint.clone(),
            api_key,
            config.generation.timeout,
        )
        .map_err(|e| SimError::generation(ErrorCode::GENERATION_CLIENT_SETUP, e.to_string()))?
        .with_ledger(Arc::clone(&ledger)),
    );
    let generator = RetryingGenerator::new(
        client,
        GeneratorOptions {
            backoff: config.generation.backoff.clone(),
            verbose: config.generation.verbose || params.verbose >= 1,
        },
    );

    let engine = AgentSimulation::new(
        generator,
        config.generation.params.clone(),
        config.simulation.clone(),
    )
    .map_err(|e| {
        SimError::config_with_code(ErrorCode::CONFIG_INVALID_VALUE, format!("{:#}", e), None)
    })?;

    if params.visualization != VisualizationMode::Off && config.visualization.command.is_none() {
        info!("No [visualization] command configured, running without a viewer");
    }

    let registry = AuxiliaryRegistry::new();
    let cancelled = Arc::new(AtomicBool::new(false));
    setup_interrupt_handlers(Arc::clone(&cancelled), registry.clone()).map_err(|e| {
        SimError::other(format!("failed to install interrupt handlers: {:#}", e))
    })?;

    let mut executor = CheckpointedExecutor::new(
        engine,
        Arc::new(FileCheckpointStore::new(&storage_root)),
        options,
    )
    .with_launcher(Arc::new(ViewerLauncher::new(
        config.visualization.clone(),
        params.visualization,
    )))
    .with_accounting(Arc::new(LedgerAccounting::new(ledger, &storage_root)))
    .with_registry(registry)
    .with_cancellation(cancelled);

    executor.prepare(&mut run).await?;

    if let Some(entries) = history {
        executor
            .amend(&mut run, |engine| {
                let applied = engine.apply_history(&entries)?;
                info!("Applied {} history notes", applied);
                Ok(())
            })
            .await?;
    }

    let outcome = executor.execute(run).await?;

    let stats = executor.engine().generator().stats().await;
    info!(
        "Generation: {} calls, {} attempts, {} fail-safes ({:.1}%), {} transport failures",
        stats.calls,
        stats.attempts,
        stats.fail_safes,
        stats.fail_safe_ratio() * 100.0,
        stats.transport_failures
    );

    println!("{}", format_outcome(&outcome));
    if let Some(cost) = &outcome.cost {
        println!("{}", cost);
    }

    outcome.into_result()?;
    Ok(())
}

/// One-line summary of a finished run
pub fn format_outcome(outcome: &RunOutcome) -> String {
    match outcome.state {
        RunState::Done => format!(
            "Simulation {} reached step {} in {} cycles",
            outcome.destination, outcome.cursor, outcome.cycles
        ),
        RunState::Aborted => format!(
            "Simulation {} aborted at step {} after {} cycles: {}",
            outcome.destination,
            outcome.cursor,
            outcome.cycles,
            outcome.reason.as_deref().unwrap_or("stepback budget exhausted")
        ),
        state => format!(
            "Simulation {} stopped ({}) at step {}; run it again to resume",
            outcome.destination, state, outcome.cursor
        ),
    }
}
