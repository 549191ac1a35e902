use clap::Parser;
use simdrive::app::{handle_fatal_error, initialize_app};
use simdrive::cli::{execute_command, Cli};
use tracing::debug;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let verbose = cli.verbose;

    initialize_app(verbose, cli.config.as_deref());
    debug!("Dispatching command {:?}", cli.command);

    if let Err(e) = execute_command(cli).await {
        handle_fatal_error(e, verbose);
    }
}
