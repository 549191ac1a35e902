//! Checkpoint command implementation
//!
//! Lists the simulations in the store, or the checkpoints of one of them.

use crate::checkpoint::{CheckpointStore, ExecutionCheckpoint, FileCheckpointStore};
use crate::config::DriverConfig;
use crate::error::{ErrorCode, SimError};
use anyhow::Result;
use std::path::PathBuf;

pub async fn run_checkpoints_command(
    simulation: Option<String>,
    config: Option<PathBuf>,
) -> Result<()> {
    let config = DriverConfig::load(config.as_deref())?;
    let store = FileCheckpointStore::new(config.storage_root()?);

    match simulation {
        None => list_simulations(&store).await,
        Some(simulation) => list_checkpoints(&store, &simulation).await,
    }
}

async fn list_simulations(store: &FileCheckpointStore) -> Result<()> {
    let simulations = store.simulations().await.map_err(SimError::from)?;
    if simulations.is_empty() {
        println!("No simulations in {}", store.root().display());
        return Ok(());
    }

    println!("Simulations in {}:", store.root().display());
    for simulation in simulations {
        let latest = store.latest(&simulation).await.map_err(SimError::from)?;
        match latest {
            Some((checkpoint, _)) => println!(
                "  {:<24} step {:>6}  ({})",
                simulation,
                checkpoint.cursor(),
                checkpoint.name
            ),
            None => println!("  {}", simulation),
        }
    }
    Ok(())
}

async fn list_checkpoints(store: &FileCheckpointStore, simulation: &str) -> Result<()> {
    let checkpoints = store.list(simulation).await.map_err(SimError::from)?;
    if checkpoints.is_empty() {
        return Err(SimError::checkpoint(
            ErrorCode::CHECKPOINT_NOT_FOUND,
            format!("no checkpoints stored for '{}'", simulation),
            Some(simulation.to_string()),
        )
        .into());
    }

    println!("Checkpoints of {}:", simulation);
    for checkpoint in &checkpoints {
        println!("  {}", format_checkpoint(checkpoint));
    }
    Ok(())
}

/// Table row for one checkpoint
pub fn format_checkpoint(checkpoint: &ExecutionCheckpoint) -> String {
    format!(
        "{}  steps {:>6}..{:<6}  {}",
        checkpoint.name,
        checkpoint.window_start,
        checkpoint.window_end,
        checkpoint.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    )
}
