//! # Projects
//!
//! A project is a named list of steps plus the settings those steps rely on.
//! Running one goes through three phases:
//!
//! 1. `setup_config`: every setting gets a value (explicit, inherited or
//!    default) or the project fails with an actionable error.
//! 2. Every step is expanded into tasks, and every task is bound and
//!    confirmed, before anything runs.
//! 3. Tasks run in order, each in its own log section. Failures are fatal
//!    unattended; interactively the user may continue past them.
//!
//! On a fully successful run the build-local configuration is saved.

use crate::core::config_store::{ConfigError, ConfigStore, Source};
use crate::core::conflict::{ConflictError, FailureDecision, TaskFailure};
use crate::core::environment::Environment;
use crate::core::expr::{indent, underline};
use crate::core::maker::Maker;
use crate::core::runtime::RuntimeBuilder;
use crate::core::step::{self, Step, StepError};
use crate::core::task::{self, Binding, RunContext, Task, TaskError};
use crate::core::value::Value;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProjectError {
    #[error(
        "Project '{project}' needs the setting '{setting}' in section [{section}]{}",
        help_suffix(.help)
    )]
    MissingSetting {
        project: String,
        setting: String,
        section: String,
        help: Option<String>,
    },
    #[error(transparent)]
    Step(#[from] StepError),
    #[error("Task '{task}' could not be prepared")]
    Task {
        task: String,
        #[source]
        source: TaskError,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn help_suffix(help: &Option<String>) -> String {
    help.as_deref().map(|h| format!(" ({h})")).unwrap_or_default()
}

/// A value a project needs from the configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Setting {
    pub name: String,
    /// May itself contain template markup; it is expanded when read.
    pub default: Option<String>,
    pub help: Option<String>,
    /// `(section, option)` of a global value to fall back on.
    pub inherit: Option<(String, String)>,
}

impl Setting {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
            help: None,
            inherit: None,
        }
    }

    pub fn default(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn help(mut self, text: impl Into<String>) -> Self {
        self.help = Some(text.into());
        self
    }

    pub fn inherit(mut self, section: impl Into<String>, option: impl Into<String>) -> Self {
        self.inherit = Some((section.into(), option.into()));
        self
    }
}

/// Per-run state of a project, visible to templates as `project`.
#[derive(Debug, Clone)]
pub struct ProjectState {
    pub name: String,
    pub title: String,
    pub section: String,
    /// Hand-off values between tasks of one run (such as the runtime location).
    pub build_properties: BTreeMap<String, Value>,
}

impl ProjectState {
    pub fn new(
        name: impl Into<String>,
        title: impl Into<String>,
        section: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            section: section.into(),
            build_properties: BTreeMap::new(),
        }
    }

    pub fn as_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), Value::Str(self.name.clone()));
        map.insert("title".to_string(), Value::Str(self.title.clone()));
        map.insert("section".to_string(), Value::Str(self.section.clone()));
        map.insert(
            "build_properties".to_string(),
            Value::Map(self.build_properties.clone()),
        );
        Value::Map(map)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub project: String,
    pub tasks_run: usize,
    /// Labels of the tasks the user chose to continue past.
    pub failures: Vec<String>,
}

impl RunReport {
    pub fn fully_successful(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    pub title: String,
    pub description: Option<String>,
    /// The configuration section holding this project's settings.
    pub section: String,
    pub settings: Vec<Setting>,
    pub steps: Vec<Step>,
    pub depends_on: Vec<String>,
}

impl Project {
    pub fn new(name: impl Into<String>, title: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            section: name.clone(),
            name,
            title: title.into(),
            description: None,
            settings: Vec::new(),
            steps: Vec::new(),
            depends_on: Vec::new(),
        }
    }

    fn resolve_setting(&self, store: &ConfigStore, setting: &Setting) -> Result<Option<String>, ProjectError> {
        if store.entry(&self.section, &setting.name).is_some() {
            return Ok(None);
        }
        let inherited = setting
            .inherit
            .as_ref()
            .and_then(|(section, option)| store.get(section, option));
        match inherited.map(str::to_string).or_else(|| setting.default.clone()) {
            Some(value) => Ok(Some(value)),
            None => Err(ProjectError::MissingSetting {
                project: self.name.clone(),
                setting: setting.name.clone(),
                section: self.section.clone(),
                help: setting.help.clone(),
            }),
        }
    }

    /// Fills every setting without an explicit value from its inherited
    /// global value or its default. Resolved values are stored without a
    /// source file, so they are saved into the build-local file.
    pub fn setup_config(&self, store: &mut ConfigStore) -> Result<(), ProjectError> {
        for setting in &self.settings {
            if let Some(value) = self.resolve_setting(store, setting)? {
                log::debug!("[{}] {} = {value:?}", self.section, setting.name);
                store.set(&self.section, &setting.name, &value, Source::Unset);
            }
        }
        Ok(())
    }

    /// Checks that every setting can be resolved, changing nothing.
    pub fn confirm_settings(&self, store: &ConfigStore) -> Result<(), ProjectError> {
        self.settings
            .iter()
            .try_for_each(|setting| self.resolve_setting(store, setting).map(|_| ()))
    }

    /// Expands, binds and confirms every step.
    fn prepare(
        &self,
        maker: &mut Maker,
        store: &ConfigStore,
        env: &Environment,
        state: &mut ProjectState,
        runtime: &dyn RuntimeBuilder,
    ) -> Result<Vec<Task>, ProjectError> {
        let prepare_err = |task: &Task, source| ProjectError::Task {
            task: task.label(),
            source,
        };
        let mut tasks = Vec::new();
        for step in &self.steps {
            let expanded = step::expand(
                step,
                Binding {
                    store,
                    env,
                    project: state,
                },
                maker.log(),
                &BTreeMap::new(),
            )?;
            for mut task in expanded {
                let binding = Binding {
                    store,
                    env,
                    project: state,
                };
                if let Err(source) = task.bind(binding, maker) {
                    return Err(prepare_err(&task, source));
                }
                if let Err(source) = task.setup_build_properties(state, env.base_path(), runtime) {
                    return Err(prepare_err(&task, source));
                }
                tasks.push(task);
            }
        }
        for task in &mut tasks {
            if let Err(source) = task.confirm(state) {
                return Err(prepare_err(task, source));
            }
        }
        Ok(tasks)
    }

    pub fn run(
        &self,
        maker: &mut Maker,
        store: &mut ConfigStore,
        env: &Environment,
        runtime: &dyn RuntimeBuilder,
    ) -> Result<RunReport> {
        self.setup_config(store)?;
        let mut state = ProjectState::new(&self.name, &self.title, &self.section);
        let mut tasks = self
            .prepare(maker, store, env, &mut state, runtime)
            .with_context(|| format!("Could not set up project '{}'", self.name))?;

        let mut report = RunReport {
            project: self.name.clone(),
            tasks_run: 0,
            failures: Vec::new(),
        };
        let total = tasks.len();
        for (index, task) in tasks.iter_mut().enumerate() {
            let label = task.label();
            let log = maker.log().clone();
            log.begin_section(format!("{}: {label}", self.name));
            log.notify(format!("{}/{total}. {label}", index + 1));

            let result = {
                let _indent = log.indented();
                let mut ctx = RunContext {
                    maker: &mut *maker,
                    store: &mut *store,
                    env,
                    project: &mut state,
                    runtime,
                };
                task.run(&mut ctx)
            };
            report.tasks_run += 1;

            let Err(err) = result else { continue };
            let err = err.context(format!("Task '{label}' in project '{}' failed", self.name));
            if task::interruption(&err).is_some() || !maker.interactive() {
                return Err(err);
            }

            log.error(format!("{err:#}"));
            let failure = TaskFailure {
                project: self.name.clone(),
                task: label.clone(),
                error: format!("{err:#}"),
                traceback: format!("{err:?}"),
                log_lines: log.section_lines(),
            };
            match maker.resolver_mut().resolve_failure(&failure)? {
                FailureDecision::Continue => {
                    log.warn(format!("Continuing past the failure of '{label}'"));
                    report.failures.push(label);
                }
                FailureDecision::Abort => return Err(err.context(ConflictError::Aborted)),
            }
        }

        if report.fully_successful() && !maker.simulate() {
            let build_ini = env.build_ini();
            maker.ensure_dir(env.etc_dir())?;
            store.save(&build_ini, &ConfigStore::local_sources(&build_ini))?;
        }
        Ok(report)
    }

    /// The titled, numbered plan of this project, without running anything.
    pub fn describe(
        &self,
        maker: &mut Maker,
        store: &ConfigStore,
        env: &Environment,
        runtime: &dyn RuntimeBuilder,
    ) -> Result<String> {
        let mut store = store.clone();
        self.setup_config(&mut store)?;
        let mut state = ProjectState::new(&self.name, &self.title, &self.section);
        let tasks = self.prepare(maker, &store, env, &mut state, runtime)?;

        let mut out = underline(&format!("{} ({})", self.title, self.name), "=");
        out.push('\n');
        if let Some(description) = &self.description {
            out.push_str(&format!("\n{}\n", description.trim_end()));
        }
        if !self.settings.is_empty() {
            out.push_str(&format!("\nSettings ([{}]):\n", self.section));
            for setting in &self.settings {
                let value = store.get(&self.section, &setting.name).unwrap_or_default();
                out.push_str(&format!("  {} = {value}\n", setting.name));
                if let Some(help) = &setting.help {
                    out.push_str(&format!("{}\n", indent(help, "      ")));
                }
            }
        }
        out.push_str("\nTasks:\n");
        let binding = Binding {
            store: &store,
            env,
            project: &state,
        };
        for (index, task) in tasks.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", index + 1, task.label()));
            out.push_str(&indent(&task.describe(binding), "    "));
            out.push('\n');
        }
        Ok(out)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::conflict::{AutoPolicy, ConflictResolver, ScriptedResolver};
    use crate::core::log_context::LogContext;
    use crate::core::maker::MakerOptions;
    use crate::core::runtime::VenvBuilder;
    use crate::core::task::{EnsureFile, LogMessage, Script, TaskKind};
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn maker(base: &Path, resolver: Box<dyn ConflictResolver>) -> Maker {
        Maker::new(base, MakerOptions::default(), resolver, LogContext::new())
    }

    fn failing_project(base: &Path) -> Project {
        let mut project = Project::new("broken", "Broken project");
        project.steps = vec![
            Step::Task(Task::new("Fail", TaskKind::Script(Script::new("false")))),
            Step::Task(Task::new(
                "Marker",
                TaskKind::EnsureFile(EnsureFile::new(
                    base.join("marker").display().to_string(),
                    "ran",
                )),
            )),
        ];
        project
    }

    #[test]
    fn test_setting_precedence() {
        let mut project = Project::new("site", "Site");
        project.settings = vec![
            Setting::new("port").default("8080").inherit("general", "base_port"),
            Setting::new("host").default("localhost"),
            Setting::new("admin").default("nobody"),
        ];
        let mut store = ConfigStore::new();
        store.set("general", "base_port", "9000", Source::CommandLine);
        store.set("site", "admin", "root", Source::CommandLine);

        project.setup_config(&mut store).unwrap();

        assert_eq!(store.get("site", "port"), Some("9000"));
        assert_eq!(store.get("site", "host"), Some("localhost"));
        assert_eq!(store.get("site", "admin"), Some("root"));
        assert_eq!(store.source("site", "host"), Some(&Source::Unset));
    }

    #[test]
    fn test_missing_setting_is_named() {
        let mut project = Project::new("site", "Site");
        project.settings = vec![Setting::new("secret").help("The signing secret")];
        let store = ConfigStore::new();

        let err = project.confirm_settings(&store).unwrap_err().to_string();
        assert!(err.contains("secret"));
        assert!(err.contains("The signing secret"));
    }

    #[test]
    fn test_default_is_visible_to_tasks_and_saved() {
        let dir = tempdir().unwrap();
        let env = Environment::new(dir.path());
        let mut project = Project::new("app", "App");
        project.settings = vec![Setting::new("x").default("1")];
        project.steps = vec![Step::Task(Task::new(
            "Write x",
            TaskKind::EnsureFile(EnsureFile::new("x.txt", "{{config.x}}")),
        ))];
        let mut store = ConfigStore::new();
        let mut maker = maker(dir.path(), Box::new(AutoPolicy));

        let report = project
            .run(&mut maker, &mut store, &env, &VenvBuilder::default())
            .unwrap();

        assert!(report.fully_successful());
        assert_eq!(report.tasks_run, 1);
        assert_eq!(fs::read_to_string(dir.path().join("x.txt")).unwrap(), "1");
        let saved = fs::read_to_string(env.build_ini()).unwrap();
        assert!(saved.contains("[app]\nx = 1"));
    }

    #[test]
    fn test_failure_is_fatal_unattended() {
        let dir = tempdir().unwrap();
        let env = Environment::new(dir.path());
        let project = failing_project(dir.path());
        let mut store = ConfigStore::new();
        let mut maker = maker(dir.path(), Box::new(AutoPolicy));

        let err = project
            .run(&mut maker, &mut store, &env, &VenvBuilder::default())
            .unwrap_err();

        assert!(format!("{err:#}").contains("Task 'Fail'"));
        assert!(!dir.path().join("marker").exists());
        assert!(!env.build_ini().exists());
    }

    #[test]
    fn test_interactive_continue_marks_run_incomplete() {
        let dir = tempdir().unwrap();
        let env = Environment::new(dir.path());
        let project = failing_project(dir.path());
        let mut resolver = ScriptedResolver::default();
        resolver.failures.push_back(FailureDecision::Continue);
        let mut store = ConfigStore::new();
        let mut maker = maker(dir.path(), Box::new(resolver));

        let report = project
            .run(&mut maker, &mut store, &env, &VenvBuilder::default())
            .unwrap();

        assert_eq!(report.failures, vec!["Fail".to_string()]);
        assert!(!report.fully_successful());
        assert!(dir.path().join("marker").exists());
        assert!(!env.build_ini().exists());
    }

    #[test]
    fn test_interactive_abort_is_an_interruption() {
        let dir = tempdir().unwrap();
        let env = Environment::new(dir.path());
        let project = failing_project(dir.path());
        let mut resolver = ScriptedResolver::default();
        resolver.failures.push_back(FailureDecision::Abort);
        let mut store = ConfigStore::new();
        let mut maker = maker(dir.path(), Box::new(resolver));

        let err = project
            .run(&mut maker, &mut store, &env, &VenvBuilder::default())
            .unwrap_err();
        assert_eq!(task::interruption(&err), Some(ConflictError::Aborted));
        assert!(!dir.path().join("marker").exists());
    }

    #[test]
    fn test_bad_task_fails_before_anything_runs() {
        let dir = tempdir().unwrap();
        let env = Environment::new(dir.path());
        let mut project = Project::new("app", "App");
        project.steps = vec![
            Step::Task(Task::new(
                "First",
                TaskKind::EnsureFile(EnsureFile::new("first.txt", "one")),
            )),
            Step::Task(Task::new(
                "Second",
                TaskKind::Log(LogMessage::new("{{nowhere}}")),
            )),
        ];
        let mut store = ConfigStore::new();
        let mut maker = maker(dir.path(), Box::new(AutoPolicy));

        assert!(
            project
                .run(&mut maker, &mut store, &env, &VenvBuilder::default())
                .is_err()
        );
        assert!(!dir.path().join("first.txt").exists());
    }

    #[test]
    fn test_describe_lists_numbered_tasks() {
        let dir = tempdir().unwrap();
        let env = Environment::new(dir.path());
        let mut project = Project::new("app", "App");
        project.settings = vec![Setting::new("greeting").default("Hi").help("What to say")];
        project.steps = vec![Step::Task(Task::new(
            "Greet",
            TaskKind::Log(LogMessage::new("{{config.greeting}} there")),
        ))];
        let store = ConfigStore::new();
        let mut maker = maker(dir.path(), Box::new(AutoPolicy));

        let text = project
            .describe(&mut maker, &store, &env, &VenvBuilder::default())
            .unwrap();

        assert!(text.starts_with("App (app)\n========="));
        assert!(text.contains("  greeting = Hi\n"));
        assert!(text.contains("1. Greet\n    Log: Hi there"));
        assert!(store.get("app", "greeting").is_none());
    }
}
