// src/core/step.rs

use crate::core::expr;
use crate::core::log_context::LogContext;
use crate::core::task::{Binding, Task};
use crate::core::template::TemplateError;
use crate::core::value::{Value, asbool};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StepError {
    #[error("Could not evaluate condition '{condition}' in step '{step}'")]
    Condition {
        step: String,
        condition: String,
        #[source]
        source: TemplateError,
    },
    #[error("Could not expand the values of step '{step}'")]
    Values {
        step: String,
        #[source]
        source: TemplateError,
    },
}

/// One branch of a conditional: the steps run when `condition` holds.
#[derive(Debug, Clone)]
pub struct Branch {
    pub condition: String,
    pub steps: Vec<Step>,
}

/// An entry in a project's step list. Control steps expand into plain tasks
/// when the project is bound, so the executor only ever sees tasks.
#[derive(Debug, Clone)]
pub enum Step {
    Task(Task),
    /// The first branch whose condition is true wins, else `otherwise`.
    Conditional {
        name: String,
        branches: Vec<Branch>,
        otherwise: Vec<Step>,
    },
    /// Repeats `steps` once per item of `values`, with `variable` bound to it.
    ForEach {
        name: String,
        variable: String,
        values: Value,
        steps: Vec<Step>,
    },
}

impl Step {
    pub fn name(&self) -> String {
        match self {
            Self::Task(task) => task.label(),
            Self::Conditional { name, .. } | Self::ForEach { name, .. } => name.clone(),
        }
    }
}

fn condition_holds(
    step: &str,
    condition: &str,
    binding: Binding<'_>,
    locals: &BTreeMap<String, Value>,
) -> Result<bool, StepError> {
    let err = |source| StepError::Condition {
        step: step.to_string(),
        condition: condition.to_string(),
        source,
    };
    let ns = binding.namespace(locals);
    let parsed = expr::parse(condition).map_err(err)?;
    let value = expr::realize(expr::eval(&parsed, &ns).map_err(err)?, &ns).map_err(err)?;
    // Strings come from configuration, where "false" and "0" mean false.
    Ok(match &value {
        Value::Str(text) => asbool(text).unwrap_or(!text.is_empty()),
        other => other.is_truthy(),
    })
}

/// Expands `step` into the tasks it stands for, with `locals` in scope.
pub fn expand(
    step: &Step,
    binding: Binding<'_>,
    log: &LogContext,
    locals: &BTreeMap<String, Value>,
) -> Result<Vec<Task>, StepError> {
    match step {
        Step::Task(task) => Ok(vec![task.with_locals(locals)]),
        Step::Conditional {
            name,
            branches,
            otherwise,
        } => {
            for branch in branches {
                let holds = condition_holds(name, &branch.condition, binding, locals)?;
                log.info(format!(
                    "Condition {} is {}",
                    branch.condition,
                    if holds { "True" } else { "False" }
                ));
                if holds {
                    return expand_all(&branch.steps, binding, log, locals);
                }
            }
            expand_all(otherwise, binding, log, locals)
        }
        Step::ForEach {
            name,
            variable,
            values,
            steps,
        } => {
            let ns = binding.namespace(locals);
            let values = ns
                .interpolate_value(values, name)
                .map_err(|source| StepError::Values {
                    step: name.clone(),
                    source,
                })?;
            let mut tasks = Vec::new();
            for item in values.to_items() {
                let mut scoped = locals.clone();
                scoped.insert(variable.clone(), item);
                tasks.extend(expand_all(steps, binding, log, &scoped)?);
            }
            Ok(tasks)
        }
    }
}

pub fn expand_all(
    steps: &[Step],
    binding: Binding<'_>,
    log: &LogContext,
    locals: &BTreeMap<String, Value>,
) -> Result<Vec<Task>, StepError> {
    let mut tasks = Vec::new();
    for step in steps {
        tasks.extend(expand(step, binding, log, locals)?);
    }
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config_store::{ConfigStore, Source};
    use crate::core::environment::Environment;
    use crate::core::project::ProjectState;
    use crate::core::task::{LogMessage, TaskKind};

    fn log_task(name: &str) -> Step {
        Step::Task(Task::new(name, TaskKind::Log(LogMessage::new(name))))
    }

    fn labels(tasks: &[Task]) -> Vec<String> {
        tasks.iter().map(Task::label).collect()
    }

    fn fixture() -> (ConfigStore, Environment, ProjectState) {
        let mut store = ConfigStore::new();
        store.set("site", "use_cache", "false", Source::Unset);
        store.set("site", "mode", "production", Source::Unset);
        (
            store,
            Environment::new("/srv/site"),
            ProjectState::new("site", "The site", "site"),
        )
    }

    #[test]
    fn test_conditional_picks_first_true_branch() {
        let (store, env, project) = fixture();
        let binding = Binding {
            store: &store,
            env: &env,
            project: &project,
        };
        let step = Step::Conditional {
            name: "Pick".into(),
            branches: vec![
                Branch {
                    condition: "config.use_cache".into(),
                    steps: vec![log_task("cache")],
                },
                Branch {
                    condition: "config.mode == 'production'".into(),
                    steps: vec![log_task("prod"), log_task("prod too")],
                },
            ],
            otherwise: vec![log_task("fallback")],
        };

        let tasks = expand(&step, binding, &LogContext::new(), &BTreeMap::new()).unwrap();
        assert_eq!(labels(&tasks), vec!["prod", "prod too"]);
    }

    #[test]
    fn test_conditional_falls_back_to_otherwise() {
        let (store, env, project) = fixture();
        let binding = Binding {
            store: &store,
            env: &env,
            project: &project,
        };
        let step = Step::Conditional {
            name: "Pick".into(),
            branches: vec![Branch {
                condition: "'0'".into(),
                steps: vec![log_task("never")],
            }],
            otherwise: vec![log_task("fallback")],
        };

        let tasks = expand(&step, binding, &LogContext::new(), &BTreeMap::new()).unwrap();
        assert_eq!(labels(&tasks), vec!["fallback"]);
    }

    #[test]
    fn test_for_each_binds_loop_variable() {
        let (store, env, project) = fixture();
        let binding = Binding {
            store: &store,
            env: &env,
            project: &project,
        };
        let step = Step::ForEach {
            name: "Hosts".into(),
            variable: "host".into(),
            values: Value::List(vec!["alpha".into(), "beta".into()]),
            steps: vec![log_task("Configure {{host}}")],
        };

        let tasks = expand(&step, binding, &LogContext::new(), &BTreeMap::new()).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].locals()["host"], Value::from("alpha"));
        assert_eq!(tasks[1].locals()["host"], Value::from("beta"));
    }

    #[test]
    fn test_bad_condition_reports_step() {
        let (store, env, project) = fixture();
        let binding = Binding {
            store: &store,
            env: &env,
            project: &project,
        };
        let step = Step::Conditional {
            name: "Broken".into(),
            branches: vec![Branch {
                condition: "missing_name".into(),
                steps: vec![],
            }],
            otherwise: vec![],
        };
        let err = expand(&step, binding, &LogContext::new(), &BTreeMap::new()).unwrap_err();
        assert!(err.to_string().contains("Broken"));
    }
}
