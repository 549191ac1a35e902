//! Interrupt handling
//!
//! The first SIGINT/SIGTERM asks the executor to stop at the next cycle
//! boundary. A second one kills the live viewer and exits immediately.

use crate::executor::AuxiliaryRegistry;
use anyhow::Result;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::warn;

/// Exit status for a forced exit on `signal`
pub fn exit_status(signal: i32) -> i32 {
    128 + signal
}

/// Install SIGINT/SIGTERM handlers driving `cancel`
pub fn setup_interrupt_handlers(cancel: Arc<AtomicBool>, registry: AuxiliaryRegistry) -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;

    thread::spawn(move || {
        for sig in signals.forever() {
            if !cancel.swap(true, Ordering::SeqCst) {
                warn!(
                    "Received signal {}, stopping at the next checkpoint boundary (repeat to force)",
                    sig
                );
                eprintln!("Interrupted, finishing the current window. Press Ctrl-C again to force exit.");
                continue;
            }

            warn!("Received signal {} again, killing viewer and exiting", sig);
            registry.kill_live();
            std::process::exit(exit_status(sig));
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status() {
        assert_eq!(exit_status(SIGINT), 130);
        assert_eq!(exit_status(SIGTERM), 143);
    }
}
