use super::{
    validate_simulation_name, CheckpointError, CheckpointStore, EngineSnapshot,
    ExecutionCheckpoint, CHECKPOINT_VERSION,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

const CHECKPOINT_DIR: &str = "checkpoints";
const CHECKPOINT_EXTENSION: &str = "json";

/// On-disk form of a checkpoint
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointEnvelope {
    checkpoint: ExecutionCheckpoint,
    snapshot: EngineSnapshot,
}

/// A checkpoint file located by directory scan
#[derive(Debug, Clone)]
struct CheckpointEntry {
    sequence: u64,
    cursor: u64,
    path: PathBuf,
}

/// Checkpoint store laid out as `<root>/<simulation>/checkpoints/<seq>-step-<cursor>.json`
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> CheckpointError + '_ {
    move |source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl FileCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding everything that belongs to a simulation
    pub fn simulation_dir(&self, simulation: &str) -> PathBuf {
        self.root.join(simulation)
    }

    fn checkpoint_dir(&self, simulation: &str) -> PathBuf {
        self.simulation_dir(simulation).join(CHECKPOINT_DIR)
    }

    fn checkpoint_name(sequence: u64, cursor: u64) -> String {
        format!("{:06}-step-{:06}", sequence, cursor)
    }

    fn parse_name(stem: &str) -> Option<(u64, u64)> {
        let (sequence, cursor) = stem.split_once("-step-")?;
        Some((sequence.parse().ok()?, cursor.parse().ok()?))
    }

    /// Checkpoint files of a simulation sorted by sequence number
    async fn entries(&self, simulation: &str) -> Result<Vec<CheckpointEntry>, CheckpointError> {
        let dir = self.checkpoint_dir(simulation);
        let mut entries = Vec::new();
        if !dir.exists() {
            return Ok(entries);
        }

        let mut read_dir = fs::read_dir(&dir).await.map_err(io_error(&dir))?;
        while let Some(entry) = read_dir.next_entry().await.map_err(io_error(&dir))? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CHECKPOINT_EXTENSION) {
                continue;
            }
            let parsed = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(Self::parse_name);
            if let Some((sequence, cursor)) = parsed {
                entries.push(CheckpointEntry {
                    sequence,
                    cursor,
                    path,
                });
            }
        }

        entries.sort_by_key(|e| e.sequence);
        Ok(entries)
    }

    async fn read_envelope(
        &self,
        simulation: &str,
        path: &Path,
    ) -> Result<CheckpointEnvelope, CheckpointError> {
        let content = fs::read_to_string(path).await.map_err(io_error(path))?;
        let envelope: CheckpointEnvelope =
            serde_json::from_str(&content).map_err(|e| CheckpointError::Corrupted {
                simulation: simulation.to_string(),
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if envelope.checkpoint.version > CHECKPOINT_VERSION {
            return Err(CheckpointError::IncompatibleVersion {
                simulation: simulation.to_string(),
                found: envelope.checkpoint.version,
                supported: CHECKPOINT_VERSION,
            });
        }

        if envelope.checkpoint.window_end != envelope.snapshot.step {
            return Err(CheckpointError::Corrupted {
                simulation: simulation.to_string(),
                path: path.to_path_buf(),
                reason: format!(
                    "header cursor {} does not match snapshot step {}",
                    envelope.checkpoint.window_end, envelope.snapshot.step
                ),
            });
        }

        Ok(envelope)
    }

    async fn write_envelope(
        &self,
        path: &Path,
        envelope: &CheckpointEnvelope,
    ) -> Result<(), CheckpointError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_error(parent))?;
        }

        let temp_path = path.with_extension("tmp");
        let json = serde_json::to_string_pretty(envelope)?;
        fs::write(&temp_path, json)
            .await
            .map_err(io_error(&temp_path))?;
        fs::rename(&temp_path, path).await.map_err(io_error(path))?;
        Ok(())
    }

    fn new_checkpoint(
        simulation: &str,
        sequence: u64,
        window_start: u64,
        cursor: u64,
    ) -> ExecutionCheckpoint {
        ExecutionCheckpoint {
            simulation: simulation.to_string(),
            name: Self::checkpoint_name(sequence, cursor),
            sequence,
            window_start,
            window_end: cursor,
            created_at: Utc::now(),
            version: CHECKPOINT_VERSION,
        }
    }

    fn path_for(&self, checkpoint: &ExecutionCheckpoint) -> PathBuf {
        self.checkpoint_dir(&checkpoint.simulation)
            .join(format!("{}.{}", checkpoint.name, CHECKPOINT_EXTENSION))
    }

    /// Names of stored simulations that hold at least one checkpoint, sorted
    pub async fn simulations(&self) -> Result<Vec<String>, CheckpointError> {
        let mut names = Vec::new();
        if !self.root.exists() {
            return Ok(names);
        }

        let mut read_dir = fs::read_dir(&self.root)
            .await
            .map_err(io_error(&self.root))?;
        while let Some(entry) = read_dir.next_entry().await.map_err(io_error(&self.root))? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_simulation_name(&name).is_err() {
                continue;
            }
            if !self.entries(&name).await?.is_empty() {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(
        &self,
        simulation: &str,
        window_start: u64,
        snapshot: &EngineSnapshot,
    ) -> Result<ExecutionCheckpoint, CheckpointError> {
        validate_simulation_name(simulation)?;

        let entries = self.entries(simulation).await?;
        let sequence = match entries.last() {
            Some(last) if snapshot.step < last.cursor => {
                return Err(CheckpointError::OrderViolation {
                    simulation: simulation.to_string(),
                    latest: last.cursor,
                    attempted: snapshot.step,
                });
            }
            Some(last) => last.sequence + 1,
            None => 1,
        };

        let checkpoint = Self::new_checkpoint(simulation, sequence, window_start, snapshot.step);
        let envelope = CheckpointEnvelope {
            checkpoint,
            snapshot: snapshot.clone(),
        };
        self.write_envelope(&self.path_for(&envelope.checkpoint), &envelope)
            .await?;

        info!(
            "Saved checkpoint {} for simulation {} at step {}",
            envelope.checkpoint.name, simulation, snapshot.step
        );
        Ok(envelope.checkpoint)
    }

    async fn latest(
        &self,
        simulation: &str,
    ) -> Result<Option<(ExecutionCheckpoint, EngineSnapshot)>, CheckpointError> {
        validate_simulation_name(simulation)?;

        match self.entries(simulation).await?.last() {
            Some(entry) => {
                let envelope = self.read_envelope(simulation, &entry.path).await?;
                Ok(Some((envelope.checkpoint, envelope.snapshot)))
            }
            None => Ok(None),
        }
    }

    async fn list(&self, simulation: &str) -> Result<Vec<ExecutionCheckpoint>, CheckpointError> {
        validate_simulation_name(simulation)?;

        let mut checkpoints = Vec::new();
        for entry in self.entries(simulation).await? {
            checkpoints.push(self.read_envelope(simulation, &entry.path).await?.checkpoint);
        }
        Ok(checkpoints)
    }

    async fn fork(
        &self,
        origin: &str,
        destination: &str,
    ) -> Result<ExecutionCheckpoint, CheckpointError> {
        validate_simulation_name(origin)?;
        validate_simulation_name(destination)?;

        let (origin_checkpoint, snapshot) =
            self.latest(origin)
                .await?
                .ok_or_else(|| CheckpointError::NotFound {
                    simulation: origin.to_string(),
                })?;

        if origin == destination {
            return Ok(origin_checkpoint);
        }

        if self.exists(destination).await? {
            return Err(CheckpointError::AlreadyExists {
                simulation: destination.to_string(),
            });
        }

        let cursor = origin_checkpoint.cursor();
        let checkpoint = Self::new_checkpoint(destination, 1, cursor, cursor);
        let envelope = CheckpointEnvelope {
            checkpoint,
            snapshot,
        };
        self.write_envelope(&self.path_for(&envelope.checkpoint), &envelope)
            .await?;

        info!(
            "Forked simulation {} at step {} from {} ({})",
            destination, cursor, origin, origin_checkpoint.name
        );
        Ok(envelope.checkpoint)
    }

    async fn discard(&self, simulation: &str) -> Result<(), CheckpointError> {
        validate_simulation_name(simulation)?;

        let dir = self.simulation_dir(simulation);
        if dir.exists() {
            fs::remove_dir_all(&dir).await.map_err(io_error(&dir))?;
            debug!("Discarded simulation directory {}", dir.display());
        }
        Ok(())
    }

    async fn exists(&self, simulation: &str) -> Result<bool, CheckpointError> {
        validate_simulation_name(simulation)?;
        Ok(!self.entries(simulation).await?.is_empty())
    }
}
