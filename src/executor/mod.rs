//! Checkpointed execution of a simulation
//!
//! The executor advances an engine through `[cursor, boundary)` windows,
//! persisting a checkpoint after every successful window. Failures are
//! classified by the engine and handled here: partial progress is saved,
//! zero-progress recoverable failures cost a stepback, and anything else is
//! retried from the last checkpoint. A run that exhausts its stepback budget
//! is aborted; its destination is discarded unless the run already persisted
//! progress into it.

pub mod auxiliary;
pub mod state;

#[cfg(test)]
mod executor_tests;

pub use auxiliary::{
    AuxiliaryLauncher, AuxiliaryProcess, AuxiliaryRegistry, ViewerConfig, ViewerLauncher,
    VisualizationMode,
};
pub use state::{decide, Recovery, RunState, SimulationRun};

use crate::accounting::{AccountingService, CostReport};
use crate::checkpoint::{validate_simulation_name, CheckpointStore, EngineSnapshot};
use crate::engine::{SimulationEngine, StepFailure};
use crate::error::{ErrorCode, SimError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Tunables of the execution loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorOptions {
    /// Consecutive zero-progress stepbacks tolerated before aborting
    #[serde(default = "default_max_stepbacks")]
    pub max_stepbacks: u32,

    /// Wait before tearing down a cycle's auxiliary process, and again before SIGKILL
    #[serde(default = "default_grace_period", with = "humantime_serde")]
    pub grace_period: Duration,

    /// Upper bound on the end-of-run accounting request
    #[serde(default = "default_accounting_timeout", with = "humantime_serde")]
    pub accounting_timeout: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            max_stepbacks: default_max_stepbacks(),
            grace_period: default_grace_period(),
            accounting_timeout: default_accounting_timeout(),
        }
    }
}

fn default_max_stepbacks() -> u32 {
    3
}

fn default_grace_period() -> Duration {
    Duration::from_secs(2)
}

fn default_accounting_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Final result of a run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub state: RunState,
    pub destination: String,
    pub cursor: u64,
    pub cycles: u64,
    /// Window ends persisted by successful cycles, in order
    pub boundaries: Vec<u64>,
    /// Why the run was aborted, if it was
    pub reason: Option<String>,
    pub cost: Option<CostReport>,
}

impl RunOutcome {
    /// Map a non-DONE outcome to the error the process exits with
    pub fn into_result(self) -> Result<RunOutcome, SimError> {
        match self.state {
            RunState::Aborted => Err(SimError::run(
                ErrorCode::RUN_ABORTED,
                format!(
                    "aborted at step {}: {}",
                    self.cursor,
                    self.reason.as_deref().unwrap_or("stepback budget exhausted")
                ),
                Some(self.destination),
            )),
            RunState::Interrupted => Err(SimError::run(
                ErrorCode::RUN_INTERRUPTED,
                format!("interrupted at step {}", self.cursor),
                Some(self.destination),
            )),
            _ => Ok(self),
        }
    }
}

/// Drives a [`SimulationEngine`] through checkpointed windows
pub struct CheckpointedExecutor<E> {
    engine: E,
    store: Arc<dyn CheckpointStore>,
    launcher: Option<Arc<dyn AuxiliaryLauncher>>,
    accounting: Option<Arc<dyn AccountingService>>,
    registry: AuxiliaryRegistry,
    cancelled: Arc<AtomicBool>,
    options: ExecutorOptions,
}

impl<E: SimulationEngine> CheckpointedExecutor<E> {
    pub fn new(engine: E, store: Arc<dyn CheckpointStore>, options: ExecutorOptions) -> Self {
        Self {
            engine,
            store,
            launcher: None,
            accounting: None,
            registry: AuxiliaryRegistry::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
            options,
        }
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn AuxiliaryLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn with_accounting(mut self, accounting: Arc<dyn AccountingService>) -> Self {
        self.accounting = Some(accounting);
        self
    }

    pub fn with_registry(mut self, registry: AuxiliaryRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Share a cancellation flag observed at cycle boundaries
    pub fn with_cancellation(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = cancelled;
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Prepare and execute a run
    pub async fn run(&mut self, mut run: SimulationRun) -> Result<RunOutcome, SimError> {
        self.prepare(&mut run).await?;
        self.execute(run).await
    }

    /// Fork or resume the destination and load its latest checkpoint into the engine
    pub async fn prepare(&mut self, run: &mut SimulationRun) -> Result<(), SimError> {
        validate_simulation_name(&run.destination)?;

        if let Some(origin) = run.origin.clone() {
            if run.resumes_in_place() {
                info!("Resuming simulation {} in place", origin);
            } else if self.store.exists(&run.destination).await? {
                info!(
                    "Destination {} already has checkpoints, resuming it instead of forking {}",
                    run.destination, origin
                );
            } else {
                self.store.fork(&origin, &run.destination).await?;
            }
        }

        match self.store.latest(&run.destination).await? {
            Some((checkpoint, snapshot)) => {
                self.restore(snapshot)?;
                run.cursor = checkpoint.cursor();
                info!(
                    "Loaded checkpoint {} of {} at step {}",
                    checkpoint.name, run.destination, run.cursor
                );
            }
            None => {
                let snapshot = self.snapshot()?;
                let checkpoint = self.store.save(&run.destination, 0, &snapshot).await?;
                run.cursor = checkpoint.cursor();
                info!("Starting fresh simulation {}", run.destination);
            }
        }

        if run.cursor > run.total_steps {
            return Err(SimError::run(
                ErrorCode::RUN_INVALID_WINDOW,
                format!(
                    "latest checkpoint is at step {}, beyond the requested {} steps",
                    run.cursor, run.total_steps
                ),
                Some(run.destination.clone()),
            ));
        }
        run.start_cursor = run.cursor;
        Ok(())
    }

    /// Modify the engine state and persist it as a checkpoint at the current cursor
    pub async fn amend<F>(&mut self, run: &mut SimulationRun, amend: F) -> Result<(), SimError>
    where
        F: FnOnce(&mut E) -> anyhow::Result<()>,
    {
        amend(&mut self.engine).map_err(|e| {
            SimError::engine(ErrorCode::ENGINE_GENERIC, format!("{:#}", e), Some(run.cursor))
        })?;
        let snapshot = self.snapshot()?;
        self.store
            .save(&run.destination, run.cursor, &snapshot)
            .await?;
        run.checkpointed(snapshot.step);
        Ok(())
    }

    /// Run cycles until the run is done, aborted or interrupted
    pub async fn execute(&mut self, mut run: SimulationRun) -> Result<RunOutcome, SimError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let mut boundaries = Vec::new();
        let mut reason = None;

        run.state = if run.is_complete() {
            RunState::Done
        } else {
            RunState::Running
        };

        info!(
            "Run {} of {}: steps {}..{} every {} steps (max stepbacks {})",
            run_id,
            run.destination,
            run.cursor,
            run.total_steps,
            run.checkpoint_frequency,
            run.max_stepbacks
        );

        while !run.state.is_terminal() {
            if self.cancelled.load(Ordering::SeqCst) {
                warn!(
                    "Interrupt received, stopping {} at step {}",
                    run.destination, run.cursor
                );
                run.state = RunState::Interrupted;
                break;
            }

            run.boundary = run.next_boundary();
            run.cycles += 1;
            info!(
                "Cycle {}: advancing {} from step {} to {}",
                run.cycles, run.destination, run.cursor, run.boundary
            );

            let auxiliary = self.spawn_auxiliary(&run);
            let result = self.engine.advance(run.cursor, run.boundary).await;
            let handled = self.handle_result(&mut run, result, &mut boundaries, &mut reason).await;
            self.teardown_auxiliary(auxiliary).await;
            handled?;
        }

        if run.state == RunState::Aborted {
            self.discard_destination(&run).await;
        }

        let cost = match run.state {
            RunState::Done | RunState::Aborted => self.report_cost(&run_id).await,
            _ => None,
        };

        info!(
            "Run {} of {} finished {} at step {} after {} cycles",
            run_id, run.destination, run.state, run.cursor, run.cycles
        );

        Ok(RunOutcome {
            run_id,
            state: run.state,
            destination: run.destination,
            cursor: run.cursor,
            cycles: run.cycles,
            boundaries,
            reason,
            cost,
        })
    }

    async fn handle_result(
        &mut self,
        run: &mut SimulationRun,
        result: Result<(), StepFailure>,
        boundaries: &mut Vec<u64>,
        reason: &mut Option<String>,
    ) -> Result<(), SimError> {
        let failure = match result {
            Ok(()) => {
                run.state = RunState::Checkpointing;
                let snapshot = self.snapshot()?;
                if snapshot.step != run.boundary {
                    return Err(SimError::engine(
                        ErrorCode::ENGINE_SNAPSHOT_FAILED,
                        format!(
                            "engine reported success but sits at step {} instead of {}",
                            snapshot.step, run.boundary
                        ),
                        Some(snapshot.step),
                    ));
                }
                self.store
                    .save(&run.destination, run.cursor, &snapshot)
                    .await?;
                run.checkpointed(run.boundary);
                boundaries.push(run.boundary);
                return Ok(());
            }
            Err(failure) => failure.with_stepbacks(run.stepbacks),
        };

        let window_len = run.boundary - run.cursor;
        error!(
            "Step {} of {} failed ({}, stepbacks {}/{}): {}",
            run.cursor + failure.progress,
            run.destination,
            failure.kind,
            failure.stepbacks,
            run.max_stepbacks,
            failure.message
        );

        match decide(&failure, window_len, run.stepbacks, run.max_stepbacks) {
            Recovery::CheckpointPartial => {
                run.state = RunState::Recovering;
                let partial = run.cursor + failure.progress;
                let snapshot = self.snapshot()?;
                if snapshot.step == partial {
                    self.store
                        .save(&run.destination, run.cursor, &snapshot)
                        .await?;
                    run.checkpointed(partial);
                    info!(
                        "Saved partial progress of {} at step {}",
                        run.destination, partial
                    );
                } else {
                    warn!(
                        "Engine sits at step {} after reporting progress to {}, rewinding",
                        snapshot.step, partial
                    );
                    self.rewind(run).await?;
                    if run.stepbacks.saturating_add(1) > run.max_stepbacks {
                        Self::abort(run, reason, &failure.message);
                        return Ok(());
                    }
                }
                run.stepbacks += 1;
                if !run.is_complete() {
                    run.state = RunState::Running;
                }
            }
            Recovery::StepBack => {
                run.state = RunState::Recovering;
                run.stepbacks += 1;
                info!(
                    "Stepping back {} to step {} ({}/{})",
                    run.destination, run.cursor, run.stepbacks, run.max_stepbacks
                );
                self.rewind(run).await?;
                run.state = RunState::Running;
            }
            Recovery::Retry => {
                run.state = RunState::Recovering;
                info!(
                    "Retrying window {}..{} of {} from the last checkpoint",
                    run.cursor, run.boundary, run.destination
                );
                self.rewind(run).await?;
                run.state = RunState::Running;
            }
            Recovery::Abort => Self::abort(run, reason, &failure.message),
        }
        Ok(())
    }

    fn abort(run: &mut SimulationRun, reason: &mut Option<String>, last: &str) {
        run.stepbacks += 1;
        run.state = RunState::Aborted;
        let why = format!(
            "{} consecutive failures without progress exceeded the limit of {}; last: {}",
            run.stepbacks, run.max_stepbacks, last
        );
        error!("Aborting {}: {}", run.destination, why);
        *reason = Some(why);
    }

    /// Restore the engine to the last persisted checkpoint of the destination
    async fn rewind(&mut self, run: &mut SimulationRun) -> Result<(), SimError> {
        let (checkpoint, snapshot) = self
            .store
            .latest(&run.destination)
            .await?
            .ok_or_else(|| {
                SimError::checkpoint(
                    ErrorCode::CHECKPOINT_NOT_FOUND,
                    "no checkpoint to rewind to",
                    Some(run.destination.clone()),
                )
            })?;
        self.restore(snapshot)?;
        run.cursor = checkpoint.cursor();
        debug!("Rewound {} to {}", run.destination, checkpoint.name);
        Ok(())
    }

    fn snapshot(&self) -> Result<EngineSnapshot, SimError> {
        self.engine.snapshot().map_err(|e| {
            SimError::engine(ErrorCode::ENGINE_SNAPSHOT_FAILED, format!("{:#}", e), None)
        })
    }

    fn restore(&mut self, snapshot: EngineSnapshot) -> Result<(), SimError> {
        let step = snapshot.step;
        self.engine.restore(snapshot).map_err(|e| {
            SimError::engine(ErrorCode::ENGINE_RESTORE_FAILED, format!("{:#}", e), Some(step))
        })
    }

    fn spawn_auxiliary(&self, run: &SimulationRun) -> Option<AuxiliaryProcess> {
        let launcher = self.launcher.as_ref()?;
        match launcher.launch(&run.destination, run.cursor, run.boundary) {
            Ok(Some(process)) => {
                if let Some(pid) = process.id() {
                    self.registry.register(pid);
                }
                Some(process)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Continuing cycle {} without a viewer: {:#}", run.cycles, e);
                None
            }
        }
    }

    async fn teardown_auxiliary(&self, auxiliary: Option<AuxiliaryProcess>) {
        let Some(process) = auxiliary else {
            return;
        };
        tokio::time::sleep(self.options.grace_period).await;
        if let Err(e) = process.terminate(self.options.grace_period).await {
            warn!("Failed to terminate viewer: {:#}", e);
        }
        self.registry.clear();
    }

    async fn discard_destination(&self, run: &SimulationRun) {
        if run.resumes_in_place() {
            warn!(
                "Keeping {} after abort because it is also the origin",
                run.destination
            );
            return;
        }
        if run.made_progress() {
            warn!(
                "Keeping {} after abort: steps {}..{} were checkpointed by this run",
                run.destination, run.start_cursor, run.cursor
            );
            return;
        }
        match self.store.discard(&run.destination).await {
            Ok(()) => info!("Discarded destination {}", run.destination),
            Err(e) => error!("Failed to discard destination {}: {}", run.destination, e),
        }
    }

    async fn report_cost(&self, run_id: &str) -> Option<CostReport> {
        let accounting = self.accounting.as_ref()?;
        match tokio::time::timeout(self.options.accounting_timeout, accounting.report(run_id)).await
        {
            Ok(Ok(report)) => Some(report),
            Ok(Err(e)) => {
                warn!("Cost accounting failed: {:#}", e);
                None
            }
            Err(_) => {
                warn!(
                    "Cost accounting timed out after {:?}",
                    self.options.accounting_timeout
                );
                None
            }
        }
    }
}
