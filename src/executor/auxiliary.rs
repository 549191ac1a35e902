//! Per-cycle auxiliary visualization process
//!
//! A viewer may be spawned for the duration of each cycle. It runs in its own
//! process group so teardown reaches anything it forked. At most one is live
//! at a time; its pid is published in an [`AuxiliaryRegistry`] so the signal
//! thread can kill it on a forced exit.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum VisualizationMode {
    #[default]
    On,
    Off,
    Headless,
}

/// How to start the viewer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewerConfig {
    /// Program to run; no viewer is started when unset
    #[serde(default)]
    pub command: Option<String>,

    /// Arguments; `{simulation}` is replaced by the destination name
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra arguments appended in headless mode
    #[serde(default)]
    pub headless_args: Vec<String>,
}

/// Spawns the auxiliary process of a cycle
pub trait AuxiliaryLauncher: Send + Sync {
    /// Start a process for the window `[start, end)`; `None` when nothing should run
    fn launch(&self, simulation: &str, start: u64, end: u64) -> Result<Option<AuxiliaryProcess>>;
}

/// Launches the configured viewer program
pub struct ViewerLauncher {
    config: ViewerConfig,
    mode: VisualizationMode,
}

impl ViewerLauncher {
    pub fn new(config: ViewerConfig, mode: VisualizationMode) -> Self {
        Self { config, mode }
    }

    fn arguments(&self, simulation: &str) -> Vec<String> {
        let mut args: Vec<String> = self
            .config
            .args
            .iter()
            .map(|a| a.replace("{simulation}", simulation))
            .collect();
        if self.mode == VisualizationMode::Headless {
            args.extend(
                self.config
                    .headless_args
                    .iter()
                    .map(|a| a.replace("{simulation}", simulation)),
            );
        }
        args
    }
}

impl AuxiliaryLauncher for ViewerLauncher {
    fn launch(&self, simulation: &str, start: u64, end: u64) -> Result<Option<AuxiliaryProcess>> {
        let program = match (&self.mode, &self.config.command) {
            (VisualizationMode::Off, _) | (_, None) => return Ok(None),
            (_, Some(program)) => program,
        };

        let mut command = Command::new(program);
        command
            .args(self.arguments(simulation))
            .env("SIMDRIVE_SIMULATION", simulation)
            .env("SIMDRIVE_WINDOW_START", start.to_string())
            .env("SIMDRIVE_WINDOW_END", end.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            command.process_group(0);
        }

        let child = command
            .spawn()
            .with_context(|| format!("Failed to spawn viewer '{}'", program))?;
        let process = AuxiliaryProcess::new(child);
        debug!(
            "Spawned viewer {} (pid {:?}) for steps {}..{}",
            program,
            process.id(),
            start,
            end
        );
        Ok(Some(process))
    }
}

/// A live auxiliary process owned by one cycle
#[derive(Debug)]
pub struct AuxiliaryProcess {
    child: Child,
    pid: Option<u32>,
    started_at: Instant,
}

impl AuxiliaryProcess {
    pub fn new(child: Child) -> Self {
        let pid = child.id();
        Self {
            child,
            pid,
            started_at: Instant::now(),
        }
    }

    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// SIGTERM the process group, then SIGKILL it if still alive after `grace`
    ///
    /// The group is signalled even when the viewer itself has already exited,
    /// since anything it forked stays in the group.
    pub async fn terminate(mut self, grace: Duration) -> Result<()> {
        let deadline = Instant::now() + grace;

        #[cfg(unix)]
        {
            if let Some(pid) = self.pid {
                signal_group(pid, nix::sys::signal::Signal::SIGTERM);
            }
        }

        let waited = tokio::time::timeout(grace, self.child.wait()).await;
        match waited {
            Ok(status) => {
                let status = status.context("Failed to reap viewer")?;
                debug!(
                    "Viewer exited with {} after {:?}",
                    status,
                    self.started_at.elapsed()
                );
            }
            Err(_) => {
                warn!(
                    "Viewer (pid {:?}) ignored SIGTERM for {:?}, killing it",
                    self.pid, grace
                );
                #[cfg(unix)]
                {
                    if let Some(pid) = self.pid {
                        signal_group(pid, nix::sys::signal::Signal::SIGKILL);
                    }
                }
                self.child.kill().await.context("Failed to kill viewer")?;
            }
        }

        #[cfg(unix)]
        {
            if let Some(pid) = self.pid {
                while group_alive(pid) && Instant::now() < deadline {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                if group_alive(pid) {
                    debug!("Viewer process group {} outlived its leader, killing it", pid);
                    signal_group(pid, nix::sys::signal::Signal::SIGKILL);
                }
            }
        }
        #[cfg(not(unix))]
        let _ = deadline;

        Ok(())
    }
}

#[cfg(unix)]
fn group_alive(pid: u32) -> bool {
    let pgid = nix::unistd::Pid::from_raw(-(pid as i32));
    nix::sys::signal::kill(pgid, None).is_ok()
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::unistd::Pid;

    // Negative pid addresses the whole process group
    let pgid = Pid::from_raw(-(pid as i32));
    if let Err(e) = nix::sys::signal::kill(pgid, signal) {
        debug!("Sending {:?} to process group {} failed: {}", signal, pid, e);
    }
}

/// Pid of the live auxiliary process, shared with the signal thread
#[derive(Debug, Clone, Default)]
pub struct AuxiliaryRegistry {
    live: Arc<Mutex<Option<u32>>>,
}

impl AuxiliaryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, pid: u32) {
        *self.live.lock().unwrap_or_else(PoisonError::into_inner) = Some(pid);
    }

    pub fn clear(&self) {
        *self.live.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn live(&self) -> Option<u32> {
        *self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// SIGKILL the live process group, if any
    pub fn kill_live(&self) {
        let pid = self.live.lock().unwrap_or_else(PoisonError::into_inner).take();
        #[cfg(unix)]
        {
            if let Some(pid) = pid {
                signal_group(pid, nix::sys::signal::Signal::SIGKILL);
            }
        }
        #[cfg(not(unix))]
        let _ = pid;
    }
}
