// src/cli/handlers/mod.rs

// One module per thing the command line can ask for.

pub mod build;
pub mod commons;
pub mod describe;
pub mod list;

use crate::cli::Cli;
use anyhow::Result;
use build::BuildOutcome;
use commons::Session;

/// Routes a parsed command line to its handler.
pub fn dispatch(cli: &Cli) -> Result<BuildOutcome> {
    let session = Session::open(cli)?;
    if cli.list_projects {
        list::handle(&session, cli.json)?;
        Ok(BuildOutcome::Complete)
    } else if cli.project_help {
        describe::handle(&session)?;
        Ok(BuildOutcome::Complete)
    } else {
        build::handle(session)
    }
}
