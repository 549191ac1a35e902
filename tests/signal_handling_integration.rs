#![cfg(unix)]

use nix::sys::signal::{raise, Signal};
use simdrive::app::setup_interrupt_handlers;
use simdrive::executor::AuxiliaryRegistry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[test]
fn test_first_interrupt_requests_cancellation() {
    let cancelled = Arc::new(AtomicBool::new(false));
    setup_interrupt_handlers(Arc::clone(&cancelled), AuxiliaryRegistry::new()).unwrap();

    // The handler thread only exits the process on a second signal
    raise(Signal::SIGINT).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while !cancelled.load(Ordering::SeqCst) {
        assert!(Instant::now() < deadline, "cancellation flag was never set");
        std::thread::sleep(Duration::from_millis(10));
    }
}
