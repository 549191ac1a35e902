//! Application module
//!
//! Process-level concerns of the `simdrive` binary:
//! - Verbosity and log filter selection
//! - Logging setup
//! - Fatal error reporting and exit codes
//! - Interrupt handling

pub mod config;
pub mod error_handling;
pub mod logging;
pub mod runtime;
pub mod signal_handler;

pub use config::AppConfig;
pub use error_handling::handle_fatal_error;
pub use logging::init_logging;
pub use runtime::initialize_app;
pub use signal_handler::setup_interrupt_handlers;
