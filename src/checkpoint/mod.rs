//! Durable checkpoints of simulation engine state
//!
//! Every simulation owns a directory of checkpoints under the storage root.
//! A checkpoint pairs an [`ExecutionCheckpoint`] header with the
//! [`EngineSnapshot`] it was taken from. Sequence numbers strictly increase
//! and the step cursor never moves backwards within one simulation.

mod store;


pub use store::FileCheckpointStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Current checkpoint format version
pub const CHECKPOINT_VERSION: u32 = 1;

/// Header of one persisted checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionCheckpoint {
    pub simulation: String,
    /// Name of the checkpoint within its simulation
    pub name: String,
    pub sequence: u64,
    /// Start of the window that produced this checkpoint
    pub window_start: u64,
    /// Step cursor the snapshot sits at (exclusive end of the window)
    pub window_end: u64,
    pub created_at: DateTime<Utc>,
    pub version: u32,
}

impl ExecutionCheckpoint {
    pub fn cursor(&self) -> u64 {
        self.window_end
    }
}

/// Opaque engine state at a step boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub step: u64,
    pub state: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("no checkpoints found for simulation '{simulation}'")]
    NotFound { simulation: String },

    #[error("simulation '{simulation}' already has checkpoints")]
    AlreadyExists { simulation: String },

    #[error("invalid simulation name '{simulation}'")]
    InvalidName { simulation: String },

    #[error("checkpoint {} of '{simulation}' is corrupted: {reason}", path.display())]
    Corrupted {
        simulation: String,
        path: PathBuf,
        reason: String,
    },

    #[error("checkpoint at step {attempted} of '{simulation}' is behind the latest checkpoint at step {latest}")]
    OrderViolation {
        simulation: String,
        latest: u64,
        attempted: u64,
    },

    #[error("checkpoint version {found} of '{simulation}' is newer than supported version {supported}")]
    IncompatibleVersion {
        simulation: String,
        found: u32,
        supported: u32,
    },

    #[error("checkpoint I/O failed at {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// Durable store of engine snapshots keyed by simulation name
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a snapshot taken at the end of a window starting at `window_start`
    async fn save(
        &self,
        simulation: &str,
        window_start: u64,
        snapshot: &EngineSnapshot,
    ) -> Result<ExecutionCheckpoint, CheckpointError>;

    /// Most recent checkpoint and its snapshot, if any
    async fn latest(
        &self,
        simulation: &str,
    ) -> Result<Option<(ExecutionCheckpoint, EngineSnapshot)>, CheckpointError>;

    /// All checkpoints of a simulation in sequence order
    async fn list(&self, simulation: &str) -> Result<Vec<ExecutionCheckpoint>, CheckpointError>;

    /// Seed `destination` with the latest checkpoint of `origin`
    async fn fork(
        &self,
        origin: &str,
        destination: &str,
    ) -> Result<ExecutionCheckpoint, CheckpointError>;

    /// Remove every trace of a simulation
    async fn discard(&self, simulation: &str) -> Result<(), CheckpointError>;

    async fn exists(&self, simulation: &str) -> Result<bool, CheckpointError>;
}

/// Reject names that would escape the storage root
pub fn validate_simulation_name(simulation: &str) -> Result<(), CheckpointError> {
    let valid = !simulation.is_empty()
        && simulation != "."
        && simulation != ".."
        && !simulation.contains(['/', '\\'])
        && !simulation.chars().any(char::is_control);
    if valid {
        Ok(())
    } else {
        Err(CheckpointError::InvalidName {
            simulation: simulation.to_string(),
        })
    }
}
