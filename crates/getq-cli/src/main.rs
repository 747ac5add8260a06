mod cli;

use crate::cli::CliCommand;

#[tokio::main]
async fn main() {
    // Logging waits for the config (it carries the filter); run_from_args
    // initializes it right after loading.
    if let Err(err) = CliCommand::run_from_args().await {
        eprintln!("getq error: {:#}", err);
        std::process::exit(1);
    }
}
