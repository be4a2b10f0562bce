use odm_core::logging;

mod cli;

use crate::cli::CliCommand;

#[tokio::main]
async fn main() {
    // Initialize logging as early as possible; logging::init falls back to
    // stderr on its own when the state dir is unwritable.
    logging::init();

    // Parse CLI, dispatch, and map the run summary to the exit code.
    match CliCommand::run_from_args().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("odm error: {:#}", err);
            std::process::exit(1);
        }
    }
}
