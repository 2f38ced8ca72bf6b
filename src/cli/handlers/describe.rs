// src/cli/handlers/describe.rs

use super::commons::Session;
use crate::cli::args::UsageError;
use crate::core::conflict::AutoPolicy;
use crate::core::log_context::LogContext;
use crate::core::maker::{Maker, MakerOptions};
use crate::core::runtime::VenvBuilder;
use anyhow::Result;

/// Prints the settings and numbered tasks of each requested project.
/// Nothing is changed and nothing is asked.
pub fn handle(session: &Session) -> Result<()> {
    if session.positional.projects.is_empty() {
        return Err(UsageError::NoProjects.into());
    }
    let plan = session
        .registry
        .plan(&session.positional.projects, &session.env)?;

    let options = MakerOptions {
        simulate: true,
        quick: true,
    };
    let mut maker = Maker::new(
        session.env.base_path(),
        options,
        Box::new(AutoPolicy),
        LogContext::new(),
    );
    let runtime = VenvBuilder::default();
    let mut store = session.store.clone();
    for project in &plan {
        println!("{}", project.describe(&mut maker, &store, &session.env, &runtime)?);
        project.setup_config(&mut store)?;
    }
    Ok(())
}
