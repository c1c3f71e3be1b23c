// src/main.rs

use std::process::ExitCode;

use actiongraph::{cli, logging, run};

/// Exit status for errors that happen before or outside a run.
const SETUP_FAILURE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::parse();
    if let Err(err) = logging::init_logging(args.log_level) {
        eprintln!("actiongraph: {err:#}");
        return ExitCode::from(SETUP_FAILURE);
    }

    match run(args).await {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(err) => {
            eprintln!("actiongraph: {err:#}");
            ExitCode::from(SETUP_FAILURE)
        }
    }
}
