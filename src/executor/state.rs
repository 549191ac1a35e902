//! Run bookkeeping and the failure recovery decision

use crate::engine::{FailureKind, StepFailure};
use crate::error::{ErrorCode, SimError};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Checkpointing,
    Recovering,
    Done,
    Aborted,
    Interrupted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Aborted | RunState::Interrupted)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Running => "RUNNING",
            RunState::Checkpointing => "CHECKPOINTING",
            RunState::Recovering => "RECOVERING",
            RunState::Done => "DONE",
            RunState::Aborted => "ABORTED",
            RunState::Interrupted => "INTERRUPTED",
        };
        f.write_str(name)
    }
}

/// One execution of a simulation from an origin into a destination
#[derive(Debug, Clone, Serialize)]
pub struct SimulationRun {
    /// Simulation to fork from; `None` starts from the engine's initial state
    pub origin: Option<String>,
    pub destination: String,
    pub total_steps: u64,
    pub checkpoint_frequency: u64,
    /// End of the window currently being advanced
    pub boundary: u64,
    pub cursor: u64,
    /// Cursor the run was prepared at; checkpoints past it are this run's progress
    pub start_cursor: u64,
    pub stepbacks: u32,
    pub max_stepbacks: u32,
    pub state: RunState,
    pub cycles: u64,
}

impl SimulationRun {
    pub fn new(
        origin: Option<String>,
        destination: impl Into<String>,
        total_steps: u64,
        checkpoint_frequency: u64,
        max_stepbacks: u32,
    ) -> Result<Self, SimError> {
        let destination = destination.into();
        if checkpoint_frequency == 0 {
            return Err(SimError::run(
                ErrorCode::RUN_INVALID_WINDOW,
                "checkpoint frequency must be at least 1",
                Some(destination),
            ));
        }

        Ok(Self {
            origin,
            destination,
            total_steps,
            checkpoint_frequency,
            boundary: 0,
            cursor: 0,
            start_cursor: 0,
            stepbacks: 0,
            max_stepbacks,
            state: RunState::Running,
            cycles: 0,
        })
    }

    /// Whether the destination is the origin being continued in place
    pub fn resumes_in_place(&self) -> bool {
        self.origin.as_deref() == Some(self.destination.as_str())
    }

    pub fn next_boundary(&self) -> u64 {
        self.cursor
            .saturating_add(self.checkpoint_frequency)
            .min(self.total_steps)
    }

    /// Whether a checkpoint past the starting cursor was persisted
    pub fn made_progress(&self) -> bool {
        self.cursor > self.start_cursor
    }

    pub fn is_complete(&self) -> bool {
        self.cursor >= self.total_steps
    }

    /// Record a persisted checkpoint at `cursor`
    pub fn checkpointed(&mut self, cursor: u64) {
        self.cursor = cursor;
        self.stepbacks = 0;
        self.state = if self.is_complete() {
            RunState::Done
        } else {
            RunState::Running
        };
    }
}

/// Action taken after a step failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Persist the partial progress, then count a stepback and continue from it
    CheckpointPartial,
    /// Count a stepback, rewind to the last checkpoint and retry the window
    StepBack,
    /// Rewind to the last checkpoint and retry the window without counting
    Retry,
    /// Stepback budget exhausted
    Abort,
}

/// Decide how to recover from `failure` given the window length and budget
pub fn decide(
    failure: &StepFailure,
    window_len: u64,
    stepbacks: u32,
    max_stepbacks: u32,
) -> Recovery {
    match failure.kind {
        FailureKind::Unclassified => Recovery::Retry,
        FailureKind::Recoverable if failure.progress > window_len => Recovery::Retry,
        FailureKind::Recoverable if failure.progress > 0 => Recovery::CheckpointPartial,
        FailureKind::Recoverable if stepbacks.saturating_add(1) > max_stepbacks => Recovery::Abort,
        FailureKind::Recoverable => Recovery::StepBack,
    }
}
