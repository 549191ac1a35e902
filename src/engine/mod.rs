//! Simulation engines driven by the checkpointed executor
//!
//! An engine advances agent state one step at a time. It reports failures
//! as a [`StepFailure`] carrying how far it got within the window and
//! whether the failure is one the executor knows how to recover from.

pub mod agents;
pub mod history;
pub mod prompts;

pub use agents::{AgentAction, AgentSimulation, AgentSpec, SimulationSettings};
pub use history::{load_history, HistoryEntry};
pub use prompts::PromptLibrary;

use crate::checkpoint::EngineSnapshot;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

/// How the executor should treat a step failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A known failure class; eligible for a stepback
    Recoverable,
    /// Anything else; the window is retried without counting
    Unclassified,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Recoverable => write!(f, "recoverable"),
            FailureKind::Unclassified => write!(f, "unclassified"),
        }
    }
}

/// Failure reported by an engine while advancing a window
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    /// Steps completed within the window before the failure
    pub progress: u64,
    pub kind: FailureKind,
    pub message: String,
    /// Consecutive stepbacks at the time of the failure, filled in by the executor
    pub stepbacks: u32,
}

impl StepFailure {
    pub fn recoverable(progress: u64, message: impl Into<String>) -> Self {
        Self {
            progress,
            kind: FailureKind::Recoverable,
            message: message.into(),
            stepbacks: 0,
        }
    }

    pub fn unclassified(progress: u64, message: impl Into<String>) -> Self {
        Self {
            progress,
            kind: FailureKind::Unclassified,
            message: message.into(),
            stepbacks: 0,
        }
    }

    pub fn with_stepbacks(mut self, stepbacks: u32) -> Self {
        self.stepbacks = stepbacks;
        self
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind == FailureKind::Recoverable
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failure after {} steps: {}",
            self.kind, self.progress, self.message
        )
    }
}

impl std::error::Error for StepFailure {}

/// A simulation that can be advanced, snapshotted and rewound
#[async_trait]
pub trait SimulationEngine: Send {
    /// Advance from step `from` to step `to` (exclusive)
    async fn advance(&mut self, from: u64, to: u64) -> Result<(), StepFailure>;

    /// Capture the committed state; always sits on a step boundary
    fn snapshot(&self) -> anyhow::Result<EngineSnapshot>;

    /// Replace the current state with a snapshot
    fn restore(&mut self, snapshot: EngineSnapshot) -> anyhow::Result<()>;
}
