// src/bin/fassembler.rs

use anyhow::Result;
use clap::Parser;
use colored::*;
use fassembler::{
    cli::{
        Cli,
        args::UsageError,
        handlers::{self, build::BuildOutcome},
    },
    core::{conflict::ConflictError, task},
};
use std::io::Write;
use std::process::ExitCode;

// --- Exit codes ---

const EXIT_FAILURE: u8 = 1;
const EXIT_USAGE: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

/// Plain messages for `info`, a colored prefix for warnings and errors.
fn init_logging(cli: &Cli) {
    let default = cli.log_filter().to_string();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format(|buf, record| match record.level() {
            log::Level::Error => writeln!(buf, "{} {}", "error:".red().bold(), record.args()),
            log::Level::Warn => writeln!(buf, "{} {}", "warning:".yellow().bold(), record.args()),
            _ => writeln!(buf, "{}", record.args()),
        })
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);
    log::debug!("CLI args parsed: {cli:?}");

    match run_cli(&cli) {
        Ok(BuildOutcome::Complete) => ExitCode::SUCCESS,
        Ok(BuildOutcome::Incomplete(_)) => ExitCode::from(EXIT_FAILURE),
        Err(e) => ExitCode::from(report_error(&e)),
    }
}

fn run_cli(cli: &Cli) -> Result<BuildOutcome> {
    handlers::dispatch(cli)
}

// --- Centralized Error Handling ---

fn report_error(e: &anyhow::Error) -> u8 {
    if let Some(usage) = e.downcast_ref::<UsageError>() {
        eprintln!("{}: {}", "Usage error".red().bold(), usage);
        eprintln!("Try '{} --help' for more information.", env!("CARGO_BIN_NAME"));
        return EXIT_USAGE;
    }
    match task::interruption(e) {
        Some(ConflictError::Interrupted) => {
            eprintln!("\n{}", "Interrupted.".yellow());
            EXIT_INTERRUPTED
        }
        Some(ConflictError::Aborted) => {
            eprintln!("\n{}", "Aborted. The build is incomplete.".yellow().bold());
            EXIT_FAILURE
        }
        _ => {
            eprintln!("\n{}: {:#}", "Error".red().bold(), e);
            EXIT_FAILURE
        }
    }
}
