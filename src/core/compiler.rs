//! # Compiler
//!
//! Turns a project definition file (TOML) into a runtime [`Project`]: settings
//! become [`Setting`]s, task entries become [`Step`]s holding raw
//! [`Interpolated`] attributes. Nothing is interpolated here; templates are
//! only resolved when a task is bound to a run.

use crate::core::interpolated::Interpolated;
use crate::core::project::{Project, Setting};
use crate::core::step::{Branch, Step};
use crate::core::task::{
    Checkout, CopyDir, CopyFile, CreateRuntime, EnsureDir, EnsureFile, EnsureSymlink,
    InstallPackages, LogMessage, Patch, SaveSetting, Script, Task, TaskKind, WithService,
};
use crate::core::value::Value;
use crate::models::{ProjectFile, RawValue, SettingDef, TaskDef};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading a project definition.
#[derive(Error, Debug)]
pub enum CompilerError {
    #[error("I/O error while reading project file '{path}': {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The TOML content is invalid or does not match the project schema.
    #[error("Failed to parse project definition '{origin}': {source}")]
    TomlParse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid project definition '{origin}': {message}")]
    Invalid { origin: String, message: String },
}

// --- PUBLIC COMPILER API ---

/// Loads and compiles a project file from disk.
pub fn load_project_file(path: &Path) -> Result<Project, CompilerError> {
    let text = fs::read_to_string(path).map_err(|source| CompilerError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_project(&text, &path.display().to_string())
}

/// Parses and compiles project TOML; `origin` names it in error messages.
pub fn parse_project(text: &str, origin: &str) -> Result<Project, CompilerError> {
    let file: ProjectFile = toml::from_str(text).map_err(|source| CompilerError::TomlParse {
        origin: origin.to_string(),
        source,
    })?;
    compile_project(file, origin)
}

pub fn compile_project(file: ProjectFile, origin: &str) -> Result<Project, CompilerError> {
    let invalid = |message: String| CompilerError::Invalid {
        origin: origin.to_string(),
        message,
    };
    if file.name.trim().is_empty() || file.name.contains(char::is_whitespace) {
        return Err(invalid(format!(
            "project name {:?} must be a single non-empty word",
            file.name
        )));
    }

    let mut project = Project::new(
        file.name.clone(),
        file.title.unwrap_or_else(|| file.name.clone()),
    );
    project.description = file.description;
    if let Some(section) = file.section {
        project.section = section;
    }
    project.depends_on = file.depends_on;
    project.settings = file
        .settings
        .into_iter()
        .map(|def| compile_setting(def).map_err(&invalid))
        .collect::<Result<_, _>>()?;
    project.steps = compile_steps(file.tasks);
    Ok(project)
}

// --- SETTINGS ---

fn compile_setting(def: SettingDef) -> Result<Setting, String> {
    let mut setting = Setting::new(def.name.clone());
    setting.default = def.default.map(|d| d.to_string());
    setting.help = def.help;
    if let Some(inherit) = def.inherit {
        let Some((section, option)) = inherit.split_once('.') else {
            return Err(format!(
                "setting '{}' inherits from {inherit:?}, expected 'section.option'",
                def.name
            ));
        };
        setting.inherit = Some((section.to_string(), option.to_string()));
    }
    Ok(setting)
}

// --- TASKS ---

/// Converts a raw TOML value into a template value.
pub fn value_from_toml(raw: RawValue) -> Value {
    match raw {
        RawValue::String(s) => Value::Str(s),
        RawValue::Integer(i) => Value::Int(i),
        RawValue::Boolean(b) => Value::Bool(b),
        RawValue::Float(f) => Value::Str(f.to_string()),
        RawValue::Datetime(d) => Value::Str(d.to_string()),
        RawValue::Array(items) => Value::List(items.into_iter().map(value_from_toml).collect()),
        RawValue::Table(table) => Value::Map(
            table
                .into_iter()
                .map(|(k, v)| (k, value_from_toml(v)))
                .collect(),
        ),
    }
}

fn table_value(table: BTreeMap<String, RawValue>) -> Value {
    Value::Map(
        table
            .into_iter()
            .map(|(k, v)| (k, value_from_toml(v)))
            .collect(),
    )
}

/// Replaces an attribute's raw value when the file sets it.
fn set(attr: &mut Interpolated, raw: Option<RawValue>) {
    if let Some(raw) = raw {
        *attr = Interpolated::new(attr.attribute(), value_from_toml(raw));
    }
}

fn task(name: Option<String>, kind: TaskKind) -> Step {
    let name = name.unwrap_or_else(|| kind.name().replace('_', " "));
    Step::Task(Task::new(name, kind))
}

pub fn compile_steps(defs: Vec<TaskDef>) -> Vec<Step> {
    defs.into_iter().map(compile_step).collect()
}

fn compile_step(def: TaskDef) -> Step {
    match def {
        TaskDef::Script(d) => {
            let mut kind = Script::new(value_from_toml(d.command));
            set(&mut kind.cwd, d.cwd);
            if let Some(env) = d.env {
                kind.env = Interpolated::new("env", table_value(env));
            }
            set(&mut kind.stdin, d.stdin);
            set(&mut kind.use_runtime, d.use_runtime);
            kind.accept_codes = d.accept_codes;
            task(d.name, TaskKind::Script(kind))
        }
        TaskDef::CopyDir(d) => {
            let mut kind = CopyDir::new(value_from_toml(d.source), value_from_toml(d.dest));
            set(&mut kind.overwrite, d.overwrite);
            set(&mut kind.include_hidden, d.include_hidden);
            task(d.name, TaskKind::CopyDir(kind))
        }
        TaskDef::CopyFile(d) => {
            let mut kind = CopyFile::new(value_from_toml(d.source), value_from_toml(d.dest));
            set(&mut kind.overwrite, d.overwrite);
            task(d.name, TaskKind::CopyFile(kind))
        }
        TaskDef::EnsureFile(d) => {
            let mut kind = EnsureFile::new(value_from_toml(d.dest), Value::None);
            set(&mut kind.content, d.content);
            set(&mut kind.content_path, d.content_path);
            set(&mut kind.overwrite, d.overwrite);
            set(&mut kind.force_overwrite, d.force_overwrite);
            set(&mut kind.executable, d.executable);
            task(d.name, TaskKind::EnsureFile(kind))
        }
        TaskDef::EnsureSymlink(d) => {
            let mut kind = EnsureSymlink::new(value_from_toml(d.source), value_from_toml(d.dest));
            set(&mut kind.overwrite, d.overwrite);
            task(d.name, TaskKind::EnsureSymlink(kind))
        }
        TaskDef::EnsureDir(d) => {
            let mut kind = EnsureDir::new(value_from_toml(d.dest));
            set(&mut kind.vcs_add, d.vcs_add);
            set(&mut kind.vcs, d.vcs);
            task(d.name, TaskKind::EnsureDir(kind))
        }
        TaskDef::Checkout(d) => {
            let mut kind = Checkout::new(value_from_toml(d.repository), value_from_toml(d.dest));
            set(&mut kind.revision, d.revision);
            set(&mut kind.vcs, d.vcs);
            task(d.name, TaskKind::Checkout(kind))
        }
        TaskDef::SaveSetting(d) => {
            let mut kind = SaveSetting::new(BTreeMap::new());
            kind.values = Interpolated::new("values", table_value(d.values));
            set(&mut kind.section, d.section);
            set(&mut kind.overwrite, d.overwrite);
            set(&mut kind.overwrite_if_empty, d.overwrite_if_empty);
            task(d.name, TaskKind::SaveSetting(kind))
        }
        TaskDef::Patch(d) => {
            let mut kind = Patch::new(value_from_toml(d.files), value_from_toml(d.dest));
            set(&mut kind.strip, d.strip);
            task(d.name, TaskKind::Patch(kind))
        }
        TaskDef::Log(d) => {
            let mut kind = LogMessage::new(value_from_toml(d.message));
            set(&mut kind.level, d.level);
            task(d.name, TaskKind::Log(kind))
        }
        TaskDef::CreateRuntime(d) => {
            let mut kind = CreateRuntime::new(value_from_toml(d.path));
            set(&mut kind.system_packages, d.system_packages);
            task(d.name, TaskKind::CreateRuntime(kind))
        }
        TaskDef::InstallPackages(d) => task(
            d.name,
            TaskKind::InstallPackages(InstallPackages::new(value_from_toml(d.packages))),
        ),
        TaskDef::WithService(d) => {
            let mut kind = WithService::new(
                value_from_toml(d.start),
                value_from_toml(d.stop),
                compile_steps(d.tasks),
            );
            set(&mut kind.cwd, d.cwd);
            task(d.name, TaskKind::WithService(kind))
        }
        TaskDef::Conditional(d) => Step::Conditional {
            name: d.name.unwrap_or_else(|| "conditional".to_string()),
            branches: d
                .branches
                .into_iter()
                .map(|b| Branch {
                    condition: b.when,
                    steps: compile_steps(b.tasks),
                })
                .collect(),
            otherwise: compile_steps(d.otherwise),
        },
        TaskDef::ForEach(d) => Step::ForEach {
            name: d
                .name
                .unwrap_or_else(|| format!("for each {}", d.variable)),
            variable: d.variable,
            values: value_from_toml(d.values),
            steps: compile_steps(d.tasks),
        },
    }
}
