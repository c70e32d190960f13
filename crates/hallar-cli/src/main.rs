//! Hallador: locate GUI elements from the command line
//!
//! ## Usage
//!
//! ```bash
//! hallador locate --asset save_button --fallback 0.5,0.9 --click single
//! hallador locate --label "Save" --screenshot shot.png --json
//! hallador verify --label "Settings" --strict
//! hallador health stats.json --max-ratio 0.3
//! hallador config init -o hallar.yaml
//! ```

use clap::Parser;
use hallador::{handlers, logging, Cli, CliResult, Commands, Printer};
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);
    let printer = Printer::new(cli.quiet);

    match cli.command {
        Commands::Locate(args) => handlers::locate::execute_locate(&args, printer),
        Commands::Verify(args) => handlers::locate::execute_verify(&args, printer),
        Commands::Stats(args) => handlers::stats::execute_stats(&args, printer),
        Commands::Health(args) => handlers::health::execute_health(&args, printer),
        Commands::Config(args) => handlers::config::execute_config(&args, printer),
    }
}
