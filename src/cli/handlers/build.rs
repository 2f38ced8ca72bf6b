// src/cli/handlers/build.rs

use super::commons::Session;
use crate::cli::args::UsageError;
use crate::core::expr::underline;
use crate::core::log_context::LogContext;
use crate::core::project::Project;
use crate::core::runtime::VenvBuilder;
use crate::core::step::Step;
use crate::core::task::TaskKind;
use anyhow::{Context, Result};
use colored::Colorize;

/// How a build run ended when no error stopped it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Complete,
    /// Projects where the user continued past a failed task.
    Incomplete(Vec<String>),
}

/// External tools some task kinds cannot do without.
fn tool_for(kind: &TaskKind) -> Option<(&'static str, &'static str)> {
    match kind {
        TaskKind::Patch(_) => Some(("patch", "applying patches")),
        TaskKind::CreateRuntime(_) => Some(("python3", "creating runtimes")),
        _ => None,
    }
}

fn collect_tools(steps: &[Step], tools: &mut Vec<(&'static str, &'static str)>) {
    for step in steps {
        match step {
            Step::Task(task) => {
                if let Some(tool) = tool_for(task.kind())
                    && !tools.contains(&tool)
                {
                    tools.push(tool);
                }
                if let TaskKind::WithService(service) = task.kind() {
                    collect_tools(&service.steps, tools);
                }
            }
            Step::Conditional {
                branches, otherwise, ..
            } => {
                for branch in branches {
                    collect_tools(&branch.steps, tools);
                }
                collect_tools(otherwise, tools);
            }
            Step::ForEach { steps, .. } => collect_tools(steps, tools),
        }
    }
}

pub fn required_tools(plan: &[Project]) -> Vec<(&'static str, &'static str)> {
    let mut tools = Vec::new();
    for project in plan {
        collect_tools(&project.steps, &mut tools);
    }
    tools
}

/// Checks every project's settings before anything runs, applying the
/// settings of earlier projects first so later ones can inherit them.
fn confirm_plan(plan: &[Project], session: &Session) -> Result<()> {
    let mut preview = session.store.clone();
    for project in plan {
        project.setup_config(&mut preview)?;
        project.confirm_settings(&preview)?;
    }
    Ok(())
}

pub fn handle(mut session: Session) -> Result<BuildOutcome> {
    if session.positional.projects.is_empty() {
        return Err(UsageError::NoProjects.into());
    }
    let plan = session
        .registry
        .plan(&session.positional.projects, &session.env)?;
    if plan.is_empty() {
        println!("{}", "Nothing to build.".yellow());
        return Ok(BuildOutcome::Complete);
    }
    session.env.preflight(&required_tools(&plan))?;
    confirm_plan(&plan, &session)?;

    let log = LogContext::new();
    let mut maker = session.maker(log.clone());
    let runtime = VenvBuilder::default();
    if maker.simulate() {
        log.notify("Simulating: nothing will be changed");
    }
    let names: Vec<&str> = plan.iter().map(|p| p.name.as_str()).collect();
    log.info(format!("Building {}", names.join(", ")));

    let mut incomplete = Vec::new();
    for project in &plan {
        log.notify(underline(&format!("Project {} ({})", project.title, project.name), "-"));
        let report = project
            .run(&mut maker, &mut session.store, &session.env, &runtime)
            .with_context(|| format!("Project '{}' did not build", project.name))?;

        if report.fully_successful() {
            if !maker.simulate() {
                session.env.record_completed(&project.name)?;
            }
            log.notify(format!("{} built ({} tasks)", project.name, report.tasks_run));
        } else {
            log.warn(format!(
                "{} finished with failed tasks: {}",
                project.name,
                report.failures.join(", ")
            ));
            incomplete.push(project.name.clone());
        }
    }

    if incomplete.is_empty() {
        println!("{}", "Installation successful.".green().bold());
        Ok(BuildOutcome::Complete)
    } else {
        println!(
            "{} Incomplete: {}",
            "Installation not completely successful.".yellow().bold(),
            incomplete.join(", ")
        );
        Ok(BuildOutcome::Incomplete(incomplete))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::step::Branch;
    use crate::core::task::{CreateRuntime, Patch, Script, Task, WithService};

    #[test]
    fn test_required_tools_walk_nested_steps_once() {
        let patch = || Task::new("Patch", TaskKind::Patch(Patch::new("fix.diff", "src")));
        let mut project = Project::new("demo", "Demo");
        project.steps = vec![
            Step::Task(Task::new("Echo", TaskKind::Script(Script::new("echo hi")))),
            Step::Conditional {
                name: "maybe".into(),
                branches: vec![Branch {
                    condition: "True".into(),
                    steps: vec![Step::Task(patch())],
                }],
                otherwise: vec![Step::Task(patch())],
            },
        ];
        assert_eq!(
            required_tools(&[project]),
            vec![("patch", "applying patches")]
        );
    }

    #[test]
    fn test_required_tools_include_steps_run_inside_a_service() {
        let inner = vec![Step::Task(Task::new(
            "Runtime",
            TaskKind::CreateRuntime(CreateRuntime::new("lib/py")),
        ))];
        let mut project = Project::new("db", "Database");
        project.steps = vec![Step::Task(Task::new(
            "With the database running",
            TaskKind::WithService(WithService::new("pg_ctl start", "pg_ctl stop", inner)),
        ))];
        assert_eq!(
            required_tools(&[project]),
            vec![("python3", "creating runtimes")]
        );
    }
}
