//! CLI argument structures

use crate::executor::VisualizationMode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Drive checkpointed, LLM-backed agent simulations
#[derive(Parser, Debug)]
#[command(name = "simdrive")]
#[command(about = "simdrive - Run agent simulations with checkpoints and bounded recovery", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (defaults to ./simdrive.toml when present)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fork a simulation and advance it in checkpointed windows
    #[command(name = "run")]
    Run {
        /// Simulation to fork from; starts from the initial state when omitted
        #[arg(short, long, value_name = "SIMULATION")]
        origin: Option<String>,

        /// Name of the simulation to write
        #[arg(short, long, value_name = "SIMULATION")]
        destination: String,

        /// Step the run should reach
        #[arg(short = 'n', long, default_value = "8640")]
        steps: u64,

        /// Steps per checkpoint window
        #[arg(short = 'f', long, default_value = "200")]
        checkpoint_frequency: u64,

        /// Viewer started for each window
        #[arg(long, value_enum, default_value_t = VisualizationMode::On)]
        visualization: VisualizationMode,

        /// CSV of agent notes (agent,note) applied before the first window
        #[arg(long, value_name = "FILE")]
        history: Option<PathBuf>,

        /// Consecutive zero-progress stepbacks before aborting (overrides config)
        #[arg(long)]
        max_stepbacks: Option<u32>,
    },

    /// List stored simulations, or the checkpoints of one
    #[command(name = "checkpoints")]
    Checkpoints {
        /// Simulation to inspect
        simulation: Option<String>,
    },
}
