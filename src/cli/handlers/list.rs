// src/cli/handlers/list.rs

use super::commons::Session;
use anyhow::Result;
use colored::Colorize;

pub fn handle(session: &Session, json: bool) -> Result<()> {
    let infos = session.registry.infos();
    if json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(());
    }

    let built = session.env.completed_projects()?;
    if infos.is_empty() {
        println!("{}", "No projects are registered.".yellow());
        return Ok(());
    }
    let width = infos.iter().map(|i| i.name.len()).max().unwrap_or(0);
    println!("{}", "Available projects:".bold());
    for info in &infos {
        let marker = if built.contains(&info.name) {
            "built".green().to_string()
        } else {
            String::new()
        };
        println!(
            "  {:<width$}  {}  {} {}",
            info.name.cyan().bold(),
            info.title,
            format!("({})", info.origin).dimmed(),
            marker
        );
    }
    Ok(())
}
