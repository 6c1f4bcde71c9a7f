mod cli;
mod execute;

use std::process::ExitCode;
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;
use crate::cli::CLI;

fn main() -> ExitCode {
    let cli = CLI::parse();

    // 0 = warnings only, 1 = info, 2+ = debug. RUST_LOG wins when set.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match cli.verbose {
        0 => EnvFilter::new("shed=warn"),
        1 => EnvFilter::new("shed=info"),
        _ => EnvFilter::new("shed=debug"),
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    match execute::execute(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
