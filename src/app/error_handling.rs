//! Error handling utilities

use crate::error::SimError;
use tracing::error;

/// Handle fatal errors and exit with appropriate status code
///
/// A [`SimError`] anywhere in the chain decides the exit code and the
/// message shown; its developer message is added with `-v`. Anything else
/// exits with 1.
pub fn handle_fatal_error(error: anyhow::Error, verbose: u8) -> ! {
    error!("Fatal error: {:#}", error);

    let sim_error = error
        .chain()
        .find_map(|cause| cause.downcast_ref::<SimError>());

    let exit_code = if let Some(sim_err) = sim_error {
        eprintln!("{}", sim_err.user_message());

        if verbose >= 1 {
            eprintln!("\nContext Chain:\n{}", sim_err.developer_message());
        }

        sim_err.exit_code()
    } else {
        eprintln!("Error: {error}");

        if verbose >= 1 {
            eprintln!("\nError chain:");
            for (i, cause) in error.chain().enumerate() {
                eprintln!("  {}: {}", i, cause);
            }
        }

        1
    };

    std::process::exit(exit_code)
}
