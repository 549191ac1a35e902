//! Command implementation modules

pub mod checkpoints;
pub mod run;

pub use checkpoints::run_checkpoints_command;
pub use run::{run_simulation, RunParams};
