//! Command routing and execution

use crate::cli::args::{Cli, Commands};
use crate::cli::commands::*;
use anyhow::Result;
use clap::CommandFactory;

/// Execute a CLI command based on the parsed arguments
pub async fn execute_command(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Commands::Run {
            origin,
            destination,
            steps,
            checkpoint_frequency,
            visualization,
            history,
            max_stepbacks,
        }) => {
            run_simulation(RunParams {
                origin,
                destination,
                steps,
                checkpoint_frequency,
                visualization,
                history,
                max_stepbacks,
                config: cli.config,
                verbose: cli.verbose,
            })
            .await
        }
        Some(Commands::Checkpoints { simulation }) => {
            run_checkpoints_command(simulation, cli.config).await
        }
        None => {
            // No command provided, show help
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}
