//! Tests for the checkpointed executor

#[cfg(test)]
mod tests {
    use crate::accounting::{AccountingService, CostReport, UsageTotals};
    use crate::checkpoint::{CheckpointStore, EngineSnapshot, FileCheckpointStore};
    use crate::engine::{SimulationEngine, StepFailure};
    use crate::error::ErrorCode;
    use crate::executor::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Engine that replays scripted window outcomes
    #[derive(Default)]
    struct ScriptedEngine {
        step: u64,
        script: VecDeque<Option<StepFailure>>,
        calls: Vec<(u64, u64)>,
        restores: usize,
        cancel_on_call: Option<(usize, Arc<AtomicBool>)>,
        /// Failures leave the engine where the window started
        stall_on_failure: bool,
    }

    impl ScriptedEngine {
        fn with_script(script: Vec<Option<StepFailure>>) -> Self {
            Self {
                script: script.into(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl SimulationEngine for ScriptedEngine {
        async fn advance(&mut self, from: u64, to: u64) -> Result<(), StepFailure> {
            self.calls.push((from, to));
            if let Some((call, flag)) = &self.cancel_on_call {
                if self.calls.len() == *call {
                    flag.store(true, Ordering::SeqCst);
                }
            }
            match self.script.pop_front().flatten() {
                None => {
                    self.step = to;
                    Ok(())
                }
                Some(failure) => {
                    if !self.stall_on_failure {
                        self.step = from + failure.progress.min(to - from);
                    }
                    Err(failure)
                }
            }
        }

        fn snapshot(&self) -> anyhow::Result<EngineSnapshot> {
            Ok(EngineSnapshot {
                step: self.step,
                state: json!({ "step": self.step }),
            })
        }

        fn restore(&mut self, snapshot: EngineSnapshot) -> anyhow::Result<()> {
            self.step = snapshot.step;
            self.restores += 1;
            Ok(())
        }
    }

    struct FixedAccounting;

    #[async_trait]
    impl AccountingService for FixedAccounting {
        async fn report(&self, run_id: &str) -> anyhow::Result<CostReport> {
            Ok(CostReport {
                run_id: run_id.to_string(),
                run: UsageTotals::default(),
                cumulative: UsageTotals::default(),
                runs_recorded: 1,
                wall_time: Duration::from_secs(1),
                reported_at: Utc::now(),
            })
        }
    }

    struct SlowAccounting;

    #[async_trait]
    impl AccountingService for SlowAccounting {
        async fn report(&self, _run_id: &str) -> anyhow::Result<CostReport> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            anyhow::bail!("never reached")
        }
    }

    fn options(max_stepbacks: u32) -> ExecutorOptions {
        ExecutorOptions {
            max_stepbacks,
            grace_period: Duration::from_millis(20),
            accounting_timeout: Duration::from_millis(200),
        }
    }

    fn setup(
        engine: ScriptedEngine,
        max_stepbacks: u32,
    ) -> (TempDir, Arc<FileCheckpointStore>, CheckpointedExecutor<ScriptedEngine>) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileCheckpointStore::new(dir.path()));
        let executor = CheckpointedExecutor::new(engine, store.clone(), options(max_stepbacks));
        (dir, store, executor)
    }

    fn fresh_run(total: u64, freq: u64, max_stepbacks: u32) -> SimulationRun {
        SimulationRun::new(None, "dest", total, freq, max_stepbacks).unwrap()
    }

    fn zero_progress() -> Option<StepFailure> {
        Some(StepFailure::recoverable(0, "fail-safe storm"))
    }

    async fn cursors(store: &FileCheckpointStore, simulation: &str) -> Vec<u64> {
        store
            .list(simulation)
            .await
            .unwrap()
            .iter()
            .map(|c| c.cursor())
            .collect()
    }

    #[tokio::test]
    async fn test_windows_without_failures() {
        let (_dir, store, mut executor) = setup(ScriptedEngine::default(), 3);

        let outcome = executor.run(fresh_run(100, 30, 3)).await.unwrap();

        assert_eq!(outcome.state, RunState::Done);
        assert_eq!(outcome.cycles, 4);
        assert_eq!(outcome.boundaries, vec![30, 60, 90, 100]);
        assert_eq!(outcome.cursor, 100);
        assert_eq!(
            executor.engine().calls,
            vec![(0, 30), (30, 60), (60, 90), (90, 100)]
        );
        assert_eq!(cursors(&store, "dest").await, vec![0, 30, 60, 90, 100]);
    }

    #[tokio::test]
    async fn test_frequency_above_total_is_one_cycle() {
        let (_dir, _store, mut executor) = setup(ScriptedEngine::default(), 3);

        let outcome = executor.run(fresh_run(10, 200, 3)).await.unwrap();

        assert_eq!(outcome.state, RunState::Done);
        assert_eq!(outcome.cycles, 1);
        assert_eq!(outcome.boundaries, vec![10]);
    }

    #[tokio::test]
    async fn test_zero_progress_failures_abort_and_discard_destination() {
        let engine = ScriptedEngine::with_script(vec![zero_progress(); 3]);
        let (dir, store, executor) = setup(engine, 2);
        let mut executor = executor.with_accounting(Arc::new(FixedAccounting));

        let outcome = executor.run(fresh_run(100, 30, 2)).await.unwrap();

        assert_eq!(outcome.state, RunState::Aborted);
        assert_eq!(outcome.cycles, 3);
        assert!(outcome.reason.unwrap().contains("fail-safe storm"));
        assert!(outcome.cost.is_some());
        assert!(!store.exists("dest").await.unwrap());
        assert!(!dir.path().join("dest").exists());
        // Every retry started from the last persisted checkpoint
        assert_eq!(executor.engine().calls, vec![(0, 30); 3]);
        assert_eq!(executor.engine().restores, 2);
    }

    #[tokio::test]
    async fn test_aborted_outcome_maps_to_exit_code() {
        let engine = ScriptedEngine::with_script(vec![zero_progress(); 2]);
        let (_dir, _store, mut executor) = setup(engine, 1);

        let outcome = executor.run(fresh_run(10, 5, 1)).await.unwrap();
        let err = outcome.into_result().unwrap_err();

        assert_eq!(err.code(), ErrorCode::RUN_ABORTED);
        assert_eq!(err.exit_code(), 3);
        assert!(err.user_message().starts_with("Run 'dest'"));
    }

    #[tokio::test]
    async fn test_success_in_between_resets_stepbacks() {
        let engine = ScriptedEngine::with_script(vec![
            zero_progress(),
            zero_progress(),
            None,
            zero_progress(),
            zero_progress(),
            None,
        ]);
        let (_dir, _store, mut executor) = setup(engine, 2);

        let outcome = executor.run(fresh_run(60, 30, 2)).await.unwrap();

        assert_eq!(outcome.state, RunState::Done);
        assert_eq!(outcome.cycles, 6);
        assert_eq!(outcome.boundaries, vec![30, 60]);
    }

    #[tokio::test]
    async fn test_partial_progress_is_checkpointed() {
        let engine =
            ScriptedEngine::with_script(vec![Some(StepFailure::recoverable(10, "flaky step"))]);
        let (_dir, store, mut executor) = setup(engine, 3);

        let outcome = executor.run(fresh_run(100, 30, 3)).await.unwrap();

        assert_eq!(outcome.state, RunState::Done);
        assert_eq!(outcome.boundaries, vec![40, 70, 100]);
        assert_eq!(cursors(&store, "dest").await, vec![0, 10, 40, 70, 100]);
        assert_eq!(
            executor.engine().calls,
            vec![(0, 30), (10, 40), (40, 70), (70, 100)]
        );
    }

    #[tokio::test]
    async fn test_partial_progress_still_counts_a_stepback() {
        let engine = ScriptedEngine::with_script(vec![
            Some(StepFailure::recoverable(5, "flaky step")),
            zero_progress(),
        ]);
        let (_dir, store, mut executor) = setup(engine, 1);

        let outcome = executor.run(fresh_run(100, 30, 1)).await.unwrap();

        assert_eq!(outcome.state, RunState::Aborted);
        assert_eq!(outcome.cycles, 2);
        assert_eq!(outcome.cursor, 5);
        // The partial checkpoint is progress of this run and survives the abort
        assert_eq!(cursors(&store, "dest").await, vec![0, 5]);
    }

    #[tokio::test]
    async fn test_abort_keeps_windows_checkpointed_by_the_run() {
        let engine = ScriptedEngine::with_script(vec![
            None,
            None,
            zero_progress(),
            zero_progress(),
        ]);
        let (_dir, store, mut executor) = setup(engine, 1);

        let outcome = executor.run(fresh_run(100, 30, 1)).await.unwrap();

        assert_eq!(outcome.state, RunState::Aborted);
        assert_eq!(outcome.cursor, 60);
        assert_eq!(outcome.boundaries, vec![30, 60]);
        assert!(store.exists("dest").await.unwrap());
        assert_eq!(cursors(&store, "dest").await, vec![0, 30, 60]);

        let err = outcome.into_result().unwrap_err();
        assert_eq!(err.code(), ErrorCode::RUN_ABORTED);
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test]
    async fn test_unreached_partial_progress_is_bounded_by_stepbacks() {
        let engine = ScriptedEngine {
            stall_on_failure: true,
            ..ScriptedEngine::with_script(vec![
                Some(StepFailure::recoverable(5, "phantom progress"));
                5
            ])
        };
        let (dir, _store, mut executor) = setup(engine, 1);

        let outcome = executor.run(fresh_run(100, 30, 1)).await.unwrap();

        assert_eq!(outcome.state, RunState::Aborted);
        assert_eq!(outcome.cycles, 2);
        assert!(outcome.reason.unwrap().contains("phantom progress"));
        assert_eq!(executor.engine().calls, vec![(0, 30); 2]);
        assert!(!dir.path().join("dest").exists());
    }

    #[tokio::test]
    async fn test_unclassified_failures_never_abort() {
        let engine = ScriptedEngine::with_script(vec![
            Some(StepFailure::unclassified(0, "socket closed")),
            Some(StepFailure::unclassified(7, "bad state")),
            Some(StepFailure::unclassified(0, "socket closed")),
        ]);
        let (_dir, store, mut executor) = setup(engine, 0);

        let outcome = executor.run(fresh_run(20, 20, 0)).await.unwrap();

        assert_eq!(outcome.state, RunState::Done);
        assert_eq!(outcome.cycles, 4);
        assert_eq!(executor.engine().restores, 3);
        assert_eq!(executor.engine().calls, vec![(0, 20); 4]);
        // Partial progress of an unclassified failure is not persisted
        assert_eq!(cursors(&store, "dest").await, vec![0, 20]);
    }

    #[tokio::test]
    async fn test_fork_starts_at_origin_cursor() {
        let (_dir, store, mut executor) = setup(ScriptedEngine::default(), 3);
        store
            .save(
                "base",
                0,
                &EngineSnapshot {
                    step: 40,
                    state: json!({ "step": 40 }),
                },
            )
            .await
            .unwrap();

        let run = SimulationRun::new(Some("base".to_string()), "july1", 100, 30, 3).unwrap();
        let outcome = executor.run(run).await.unwrap();

        assert_eq!(outcome.boundaries, vec![70, 100]);
        assert_eq!(executor.engine().calls, vec![(40, 70), (70, 100)]);
        assert_eq!(cursors(&store, "base").await, vec![40]);
        assert_eq!(cursors(&store, "july1").await, vec![40, 70, 100]);
    }

    #[tokio::test]
    async fn test_missing_origin_is_an_error() {
        let (_dir, _store, mut executor) = setup(ScriptedEngine::default(), 3);
        let run = SimulationRun::new(Some("nowhere".to_string()), "july1", 100, 30, 3).unwrap();

        let err = executor.run(run).await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::CHECKPOINT_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_abort_in_place_keeps_origin() {
        let engine = ScriptedEngine::with_script(vec![zero_progress(); 2]);
        let (_dir, store, mut executor) = setup(engine, 1);
        store
            .save(
                "base",
                0,
                &EngineSnapshot {
                    step: 0,
                    state: json!({ "step": 0 }),
                },
            )
            .await
            .unwrap();

        let run = SimulationRun::new(Some("base".to_string()), "base", 100, 30, 1).unwrap();
        let outcome = executor.run(run).await.unwrap();

        assert_eq!(outcome.state, RunState::Aborted);
        assert!(store.exists("base").await.unwrap());
    }

    #[tokio::test]
    async fn test_existing_destination_is_resumed() {
        let (_dir, store, mut executor) = setup(ScriptedEngine::default(), 3);
        for (name, step) in [("base", 0), ("july1", 60)] {
            store
                .save(
                    name,
                    0,
                    &EngineSnapshot {
                        step,
                        state: json!({ "step": step }),
                    },
                )
                .await
                .unwrap();
        }

        let run = SimulationRun::new(Some("base".to_string()), "july1", 90, 30, 3).unwrap();
        let outcome = executor.run(run).await.unwrap();

        assert_eq!(executor.engine().calls, vec![(60, 90)]);
        assert_eq!(outcome.state, RunState::Done);
    }

    #[tokio::test]
    async fn test_checkpoint_beyond_total_is_rejected() {
        let (_dir, store, mut executor) = setup(ScriptedEngine::default(), 3);
        store
            .save(
                "dest",
                0,
                &EngineSnapshot {
                    step: 500,
                    state: json!({ "step": 500 }),
                },
            )
            .await
            .unwrap();

        let err = executor.run(fresh_run(100, 30, 3)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::RUN_INVALID_WINDOW);
    }

    #[tokio::test]
    async fn test_interrupt_stops_at_cycle_boundary() {
        let flag = Arc::new(AtomicBool::new(false));
        let engine = ScriptedEngine {
            cancel_on_call: Some((2, flag.clone())),
            ..Default::default()
        };
        let (_dir, store, executor) = setup(engine, 3);
        let mut executor = executor
            .with_cancellation(flag)
            .with_accounting(Arc::new(FixedAccounting));

        let outcome = executor.run(fresh_run(100, 30, 3)).await.unwrap();

        assert_eq!(outcome.state, RunState::Interrupted);
        assert_eq!(outcome.cursor, 60);
        assert!(outcome.cost.is_none());
        // The interrupted cycle still committed its checkpoint
        assert_eq!(cursors(&store, "dest").await, vec![0, 30, 60]);
        assert_eq!(
            outcome.into_result().unwrap_err().exit_code(),
            crate::error::EXIT_INTERRUPTED
        );
    }

    #[tokio::test]
    async fn test_amend_persists_engine_state() {
        let (_dir, store, mut executor) = setup(ScriptedEngine::default(), 3);
        let mut run = fresh_run(100, 30, 3);
        executor.prepare(&mut run).await.unwrap();

        executor
            .amend(&mut run, |engine| {
                engine.restores = 42;
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(cursors(&store, "dest").await, vec![0, 0]);
    }

    #[tokio::test]
    async fn test_slow_accounting_does_not_block_exit() {
        let (_dir, _store, executor) = setup(ScriptedEngine::default(), 3);
        let mut executor = executor.with_accounting(Arc::new(SlowAccounting));

        let started = std::time::Instant::now();
        let outcome = executor.run(fresh_run(10, 5, 3)).await.unwrap();

        assert_eq!(outcome.state, RunState::Done);
        assert!(outcome.cost.is_none());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    mod viewers {
        use super::*;
        use anyhow::Result;

        fn is_alive(pid: u32) -> bool {
            nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
        }

        /// Spawns `sleep` viewers and records whether the previous one was still alive
        struct RecordingLauncher {
            inner: ViewerLauncher,
            pids: Mutex<Vec<u32>>,
            overlaps: AtomicUsize,
        }

        impl AuxiliaryLauncher for RecordingLauncher {
            fn launch(&self, simulation: &str, start: u64, end: u64) -> Result<Option<AuxiliaryProcess>> {
                let mut pids = self.pids.lock().unwrap();
                if pids.last().is_some_and(|pid| is_alive(*pid)) {
                    self.overlaps.fetch_add(1, Ordering::SeqCst);
                }
                let process = self.inner.launch(simulation, start, end)?;
                if let Some(pid) = process.as_ref().and_then(|p| p.id()) {
                    pids.push(pid);
                }
                Ok(process)
            }
        }

        #[tokio::test]
        async fn test_viewer_of_each_cycle_is_gone_before_the_next() {
            let launcher = Arc::new(RecordingLauncher {
                inner: ViewerLauncher::new(
                    ViewerConfig {
                        command: Some("sleep".to_string()),
                        args: vec!["30".to_string()],
                        headless_args: Vec::new(),
                    },
                    VisualizationMode::Headless,
                ),
                pids: Mutex::new(Vec::new()),
                overlaps: AtomicUsize::new(0),
            });
            let engine = ScriptedEngine::with_script(vec![None, zero_progress(), None]);
            let registry = AuxiliaryRegistry::new();
            let (_dir, _store, executor) = setup(engine, 3);
            let mut executor = executor
                .with_launcher(launcher.clone())
                .with_registry(registry.clone());

            let outcome = executor.run(fresh_run(30, 10, 3)).await.unwrap();

            assert_eq!(outcome.state, RunState::Done);
            let pids = launcher.pids.lock().unwrap().clone();
            assert_eq!(pids.len(), 4);
            assert_eq!(launcher.overlaps.load(Ordering::SeqCst), 0);
            assert!(pids.iter().all(|pid| !is_alive(*pid)));
            assert_eq!(registry.live(), None);
        }

        #[tokio::test]
        async fn test_spawn_failure_does_not_stop_the_run() {
            let launcher = Arc::new(ViewerLauncher::new(
                ViewerConfig {
                    command: Some("/nonexistent/viewer".to_string()),
                    ..ViewerConfig::default()
                },
                VisualizationMode::On,
            ));
            let (_dir, _store, executor) = setup(ScriptedEngine::default(), 3);
            let mut executor = executor.with_launcher(launcher);

            let outcome = executor.run(fresh_run(20, 10, 3)).await.unwrap();

            assert_eq!(outcome.state, RunState::Done);
            assert_eq!(outcome.cycles, 2);
        }
    }
}
