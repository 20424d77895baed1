mod cli;
mod utils;

use clap::Parser;
use cli::Cli;
use std::process::ExitCode;
use utils::logging::setup_logging;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_logging(cli.log_level.as_deref()) {
        eprintln!("Warning: Failed to initialize logging: {e}. Using default logging.");
    }

    match cli.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
