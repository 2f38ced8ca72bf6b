//! # Tasks
//!
//! A task is one declarative build step. Its attributes are kept as raw
//! templates ([`Interpolated`]) and resolved against a namespace built fresh
//! for that task: once when it is bound, for confirmation and descriptions,
//! and again right before it runs, so values saved by earlier tasks of the
//! same run are seen. The lifecycle is explicit:
//!
//! ```text
//! Constructed -> Bound -> Confirmed -> Executing -> Completed | Failed
//! ```
//!
//! Binding and confirmation happen for every task of a project before the
//! first one runs, so configuration problems surface up front.

use crate::constants::GENERAL_SECTION;
use crate::core::config_store::{ConfigStore, Source};
use crate::core::conflict::{ConflictError, TemplateDecision, TemplateFailure};
use crate::core::environment::Environment;
use crate::core::expr::{dedent, indent};
use crate::core::interpolated::{AttributeError, Interpolated};
use crate::core::maker::{CopyOptions, FileOptions, Maker, MakerError};
use crate::core::namespace::Namespace;
use crate::core::project::ProjectState;
use crate::core::runtime::{RuntimeBuilder, RuntimeError};
use crate::core::step::{self, Step, StepError};
use crate::core::template::TemplateError;
use crate::core::value::Value;
use crate::core::vcs::{self, VcsError};
use crate::system::executor::{CommandSpec, ExecutionError};
use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Build property keys set by `create_runtime`.
pub const RUNTIME_PATH: &str = "runtime_path";
pub const RUNTIME_BIN: &str = "runtime_bin";
pub const RUNTIME_PYTHON: &str = "runtime_python";
pub const RUNTIME_LIB: &str = "runtime_lib";

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Task '{0}' has not been bound to a run")]
    NotBound(String),
    #[error("Task '{0}' has not been confirmed")]
    NotConfirmed(String),
    #[error(transparent)]
    Attribute(#[from] AttributeError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    #[error(transparent)]
    Step(#[from] Box<StepError>),
    #[error("Task '{task}': {message}")]
    Invalid { task: String, message: String },
    #[error("You must run a create_runtime task before this task")]
    NoRuntime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Constructed,
    Bound,
    Confirmed,
    Executing,
    Completed,
    Failed,
}

// --- Run access ---

/// Read-only view of the run a task is bound against.
#[derive(Debug, Clone, Copy)]
pub struct Binding<'a> {
    pub store: &'a ConfigStore,
    pub env: &'a Environment,
    pub project: &'a ProjectState,
}

impl<'a> Binding<'a> {
    /// A fresh namespace: `env`, `project`, `config` (the project's section),
    /// every configuration section by name, and the given local variables.
    pub fn namespace(&self, locals: &BTreeMap<String, Value>) -> Namespace<'a> {
        let mut ns = Namespace::new(self.store).with_base_path(self.env.base_path());
        ns.set("env", self.env.as_value());
        ns.set("project", self.project.as_value());
        ns.set("config", Value::Section(self.project.section.clone()));
        for (name, value) in locals {
            ns.set(name, value.clone());
        }
        ns
    }
}

/// Mutable access to the run while a task executes.
#[derive(Debug)]
pub struct RunContext<'a> {
    pub maker: &'a mut Maker,
    pub store: &'a mut ConfigStore,
    pub env: &'a Environment,
    pub project: &'a mut ProjectState,
    pub runtime: &'a dyn RuntimeBuilder,
}

// --- Task kinds ---

/// Runs an external command.
#[derive(Debug, Clone)]
pub struct Script {
    /// A command line (split like a shell would) or a list of arguments.
    pub command: Interpolated,
    pub cwd: Interpolated,
    /// A table of environment overrides.
    pub env: Interpolated,
    pub stdin: Interpolated,
    /// Put the project runtime's bin directory first on `PATH`.
    pub use_runtime: Interpolated,
    pub accept_codes: Vec<i32>,
}

impl Script {
    pub fn new(command: impl Into<Value>) -> Self {
        Self {
            command: Interpolated::new("command", command),
            cwd: Interpolated::new("cwd", Value::None),
            env: Interpolated::new("env", Value::None),
            stdin: Interpolated::new("stdin", Value::None),
            use_runtime: Interpolated::new("use_runtime", false),
            accept_codes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CopyDir {
    pub source: Interpolated,
    pub dest: Interpolated,
    pub overwrite: Interpolated,
    pub include_hidden: Interpolated,
}

impl CopyDir {
    pub fn new(source: impl Into<Value>, dest: impl Into<Value>) -> Self {
        Self {
            source: Interpolated::new("source", source),
            dest: Interpolated::new("dest", dest),
            overwrite: Interpolated::new("overwrite", false),
            include_hidden: Interpolated::new("include_hidden", false),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CopyFile {
    pub source: Interpolated,
    pub dest: Interpolated,
    pub overwrite: Interpolated,
}

impl CopyFile {
    pub fn new(source: impl Into<Value>, dest: impl Into<Value>) -> Self {
        Self {
            source: Interpolated::new("source", source),
            dest: Interpolated::new("dest", dest),
            overwrite: Interpolated::new("overwrite", false),
        }
    }
}

/// Writes literal content, or a template file rendered with the task namespace.
#[derive(Debug, Clone)]
pub struct EnsureFile {
    pub dest: Interpolated,
    pub content: Interpolated,
    pub content_path: Interpolated,
    /// When false, an existing file is never touched.
    pub overwrite: Interpolated,
    /// Replace differing content without asking.
    pub force_overwrite: Interpolated,
    pub executable: Interpolated,
}

impl EnsureFile {
    pub fn new(dest: impl Into<Value>, content: impl Into<Value>) -> Self {
        Self {
            dest: Interpolated::new("dest", dest),
            content: Interpolated::new("content", content),
            content_path: Interpolated::new("content_path", Value::None),
            overwrite: Interpolated::new("overwrite", true),
            force_overwrite: Interpolated::new("force_overwrite", false),
            executable: Interpolated::new("executable", false),
        }
    }

    pub fn from_template(dest: impl Into<Value>, content_path: impl Into<Value>) -> Self {
        Self {
            content: Interpolated::new("content", Value::None),
            content_path: Interpolated::new("content_path", content_path),
            ..Self::new(dest, Value::None)
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnsureSymlink {
    pub source: Interpolated,
    pub dest: Interpolated,
    pub overwrite: Interpolated,
}

impl EnsureSymlink {
    pub fn new(source: impl Into<Value>, dest: impl Into<Value>) -> Self {
        Self {
            source: Interpolated::new("source", source),
            dest: Interpolated::new("dest", dest),
            overwrite: Interpolated::new("overwrite", false),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnsureDir {
    pub dest: Interpolated,
    pub vcs_add: Interpolated,
    pub vcs: Interpolated,
}

impl EnsureDir {
    pub fn new(dest: impl Into<Value>) -> Self {
        Self {
            dest: Interpolated::new("dest", dest),
            vcs_add: Interpolated::new("vcs_add", false),
            vcs: Interpolated::new("vcs", "svn"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Checkout {
    pub repository: Interpolated,
    pub dest: Interpolated,
    pub revision: Interpolated,
    pub vcs: Interpolated,
}

impl Checkout {
    pub fn new(repository: impl Into<Value>, dest: impl Into<Value>) -> Self {
        Self {
            repository: Interpolated::new("repository", repository),
            dest: Interpolated::new("dest", dest),
            revision: Interpolated::new("revision", Value::None),
            vcs: Interpolated::new("vcs", "git"),
        }
    }
}

/// Writes options into `build.ini`.
#[derive(Debug, Clone)]
pub struct SaveSetting {
    pub section: Interpolated,
    /// A table of option names to values.
    pub values: Interpolated,
    pub overwrite: Interpolated,
    pub overwrite_if_empty: Interpolated,
}

impl SaveSetting {
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Self {
            section: Interpolated::new("section", GENERAL_SECTION),
            values: Interpolated::new("values", values),
            overwrite: Interpolated::new("overwrite", true),
            overwrite_if_empty: Interpolated::new("overwrite_if_empty", true),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Patch {
    /// Patch files; names containing `*` or `?` are expanded.
    pub files: Interpolated,
    pub dest: Interpolated,
    pub strip: Interpolated,
}

impl Patch {
    pub fn new(files: impl Into<Value>, dest: impl Into<Value>) -> Self {
        Self {
            files: Interpolated::new("files", files),
            dest: Interpolated::new("dest", dest),
            strip: Interpolated::new("strip", 0_i64),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogMessage {
    pub message: Interpolated,
    pub level: Interpolated,
}

impl LogMessage {
    pub fn new(message: impl Into<Value>) -> Self {
        Self {
            message: Interpolated::new("message", message),
            level: Interpolated::new("level", "notify"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateRuntime {
    pub path: Interpolated,
    pub system_packages: Interpolated,
}

impl CreateRuntime {
    pub fn new(path: impl Into<Value>) -> Self {
        Self {
            path: Interpolated::new("path", path),
            system_packages: Interpolated::new("system_packages", false),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstallPackages {
    pub packages: Interpolated,
}

impl InstallPackages {
    pub fn new(packages: impl Into<Value>) -> Self {
        Self {
            packages: Interpolated::new("packages", packages),
        }
    }
}

/// Starts a service, runs nested steps, and always stops the service again.
#[derive(Debug, Clone)]
pub struct WithService {
    pub start: Interpolated,
    pub stop: Interpolated,
    pub cwd: Interpolated,
    pub steps: Vec<Step>,
    tasks: Vec<Task>,
}

impl WithService {
    pub fn new(start: impl Into<Value>, stop: impl Into<Value>, steps: Vec<Step>) -> Self {
        Self {
            start: Interpolated::new("start", start),
            stop: Interpolated::new("stop", stop),
            cwd: Interpolated::new("cwd", Value::None),
            steps,
            tasks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TaskKind {
    Script(Script),
    CopyDir(CopyDir),
    CopyFile(CopyFile),
    EnsureFile(EnsureFile),
    EnsureSymlink(EnsureSymlink),
    EnsureDir(EnsureDir),
    Checkout(Checkout),
    SaveSetting(SaveSetting),
    Patch(Patch),
    Log(LogMessage),
    CreateRuntime(CreateRuntime),
    InstallPackages(InstallPackages),
    WithService(WithService),
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Script(_) => "script",
            Self::CopyDir(_) => "copy_dir",
            Self::CopyFile(_) => "copy_file",
            Self::EnsureFile(_) => "ensure_file",
            Self::EnsureSymlink(_) => "ensure_symlink",
            Self::EnsureDir(_) => "ensure_dir",
            Self::Checkout(_) => "checkout",
            Self::SaveSetting(_) => "save_setting",
            Self::Patch(_) => "patch",
            Self::Log(_) => "log",
            Self::CreateRuntime(_) => "create_runtime",
            Self::InstallPackages(_) => "install_packages",
            Self::WithService(_) => "with_service",
        }
    }

    fn attributes(&self) -> Vec<&Interpolated> {
        match self {
            Self::Script(s) => vec![&s.command, &s.cwd, &s.env, &s.stdin, &s.use_runtime],
            Self::CopyDir(c) => vec![&c.source, &c.dest, &c.overwrite, &c.include_hidden],
            Self::CopyFile(c) => vec![&c.source, &c.dest, &c.overwrite],
            Self::EnsureFile(e) => vec![
                &e.dest,
                &e.content,
                &e.content_path,
                &e.overwrite,
                &e.force_overwrite,
                &e.executable,
            ],
            Self::EnsureSymlink(l) => vec![&l.source, &l.dest, &l.overwrite],
            Self::EnsureDir(d) => vec![&d.dest, &d.vcs_add, &d.vcs],
            Self::Checkout(c) => vec![&c.repository, &c.dest, &c.revision, &c.vcs],
            Self::SaveSetting(s) => {
                vec![&s.section, &s.values, &s.overwrite, &s.overwrite_if_empty]
            }
            Self::Patch(p) => vec![&p.files, &p.dest, &p.strip],
            Self::Log(l) => vec![&l.message, &l.level],
            Self::CreateRuntime(r) => vec![&r.path, &r.system_packages],
            Self::InstallPackages(i) => vec![&i.packages],
            Self::WithService(w) => vec![&w.start, &w.stop, &w.cwd],
        }
    }

    fn attributes_mut(&mut self) -> Vec<&mut Interpolated> {
        match self {
            Self::Script(s) => vec![
                &mut s.command,
                &mut s.cwd,
                &mut s.env,
                &mut s.stdin,
                &mut s.use_runtime,
            ],
            Self::CopyDir(c) => vec![
                &mut c.source,
                &mut c.dest,
                &mut c.overwrite,
                &mut c.include_hidden,
            ],
            Self::CopyFile(c) => vec![&mut c.source, &mut c.dest, &mut c.overwrite],
            Self::EnsureFile(e) => vec![
                &mut e.dest,
                &mut e.content,
                &mut e.content_path,
                &mut e.overwrite,
                &mut e.force_overwrite,
                &mut e.executable,
            ],
            Self::EnsureSymlink(l) => vec![&mut l.source, &mut l.dest, &mut l.overwrite],
            Self::EnsureDir(d) => vec![&mut d.dest, &mut d.vcs_add, &mut d.vcs],
            Self::Checkout(c) => vec![
                &mut c.repository,
                &mut c.dest,
                &mut c.revision,
                &mut c.vcs,
            ],
            Self::SaveSetting(s) => vec![
                &mut s.section,
                &mut s.values,
                &mut s.overwrite,
                &mut s.overwrite_if_empty,
            ],
            Self::Patch(p) => vec![&mut p.files, &mut p.dest, &mut p.strip],
            Self::Log(l) => vec![&mut l.message, &mut l.level],
            Self::CreateRuntime(r) => vec![&mut r.path, &mut r.system_packages],
            Self::InstallPackages(i) => vec![&mut i.packages],
            Self::WithService(w) => vec![&mut w.start, &mut w.stop, &mut w.cwd],
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Self::Script(_) => {
                "
                Run the command:
                  {{task.command}}
                {{if task.cwd}}
                in {{task.cwd}}
                {{endif}}
                {{if asbool(task.use_runtime)}}
                The project runtime is put first on PATH.
                {{endif}}
                {{if task.stdin}}
                Send {{repr(task.stdin)}} as stdin.
                {{endif}}
                "
            }
            Self::CopyDir(_) => {
                "
                Copy the tree {{task.source}} to {{task.dest}}, filling in _tmpl files.
                {{if asbool(task.include_hidden)}}
                Hidden files are copied too.
                {{endif}}
                "
            }
            Self::CopyFile(_) => "Copy {{task.source}} to {{task.dest}}",
            Self::EnsureFile(_) => {
                "
                Write the file {{task.dest}}
                {{if task.content_path}}
                from the template {{task.content_path}}
                {{else}}
                with the content:
                {{indent(task.content, '    ')}}
                {{endif}}
                {{if asbool(task.executable)}}
                and make it executable.
                {{endif}}
                {{if not asbool(task.overwrite)}}
                An existing file is left alone.
                {{elif asbool(task.force_overwrite)}}
                An existing file is overwritten without asking.
                {{endif}}
                "
            }
            Self::EnsureSymlink(_) => {
                "
                Symlink {{task.dest}} to {{task.source}}
                {{if asbool(task.overwrite)}}
                (replacing any other symlink)
                {{endif}}
                "
            }
            Self::EnsureDir(_) => {
                "
                Create the directory {{task.dest}}
                {{if asbool(task.vcs_add)}}
                and add it to {{task.vcs}}
                {{endif}}
                "
            }
            Self::Checkout(_) => {
                "
                Check out {{task.repository}} to {{task.dest}} with {{task.vcs}}
                {{if task.revision}}
                at revision {{task.revision}}
                {{endif}}
                "
            }
            Self::SaveSetting(_) => {
                "
                Save into build.ini, section [{{task.section}}]:
                {{for key, value in items(task.values)}}
                  * {{key}} = {{repr(value)}}
                {{endfor}}
                "
            }
            Self::Patch(_) => {
                "
                Apply the patches {{task.files}}
                in {{task.dest}} with -p {{task.strip}}
                "
            }
            Self::Log(_) => "Log: {{task.message}}",
            Self::CreateRuntime(_) => {
                "
                Create an isolated runtime in {{task.path}}
                {{if asbool(task.system_packages)}}
                with access to the system packages
                {{endif}}
                "
            }
            Self::InstallPackages(_) => "Install {{task.packages}} into the project runtime",
            Self::WithService(_) => {
                "
                Start the service with {{task.start}}, run the tasks below,
                then stop it with {{task.stop}}
                "
            }
        }
    }
}

// --- Task ---

#[derive(Debug, Clone)]
pub struct Task {
    name: Interpolated,
    kind: TaskKind,
    state: TaskState,
    locals: BTreeMap<String, Value>,
}

/// Asks an interactive resolver what to do about a template error.
/// Returns whether to try again.
fn retry_template(
    maker: &mut Maker,
    ns: &Namespace<'_>,
    task: &str,
    error: &dyn fmt::Display,
    source: &str,
) -> Result<bool, ConflictError> {
    if !maker.interactive() {
        return Ok(false);
    }
    let failure = TemplateFailure {
        task: task.to_string(),
        error: error.to_string(),
        source: source.to_string(),
        namespace: ns.string_repr(),
    };
    match maker.resolver_mut().resolve_template_error(&failure)? {
        TemplateDecision::Retry => Ok(true),
        TemplateDecision::Cancel => Ok(false),
        TemplateDecision::Abort => Err(ConflictError::Aborted),
    }
}

/// The error and its causes on one line.
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut text = err.to_string();
    let mut cause = err.source();
    while let Some(inner) = cause {
        text.push_str(&format!(": {inner}"));
        cause = inner.source();
    }
    text
}

fn resolve_attribute(
    attr: &mut Interpolated,
    ns: &Namespace<'_>,
    owner: &str,
    maker: &mut Maker,
) -> Result<(), TaskError> {
    loop {
        let result = attr.resolve(ns, owner).map(|_| ());
        match result {
            Ok(()) => return Ok(()),
            Err(err @ AttributeError::Template { .. }) => {
                let source = attr.raw().to_string();
                if !retry_template(maker, ns, owner, &error_chain(&err), &source)? {
                    return Err(err.into());
                }
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn command_spec(value: &Value) -> Result<CommandSpec, ExecutionError> {
    match value {
        Value::List(items) => {
            let spec = CommandSpec::new(items.iter().map(ToString::to_string));
            if spec.argv.is_empty() {
                return Err(ExecutionError::EmptyCommand);
            }
            Ok(spec)
        }
        other => CommandSpec::parse(&other.to_string()),
    }
}

fn runtime_property(project: &ProjectState, key: &str) -> Result<PathBuf, TaskError> {
    project
        .build_properties
        .get(key)
        .map(ToString::to_string)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .ok_or(TaskError::NoRuntime)
}

/// Expands glob patterns relative to `base`, each pattern's matches in name
/// order. Plain paths are kept as given, existing or not.
fn expand_globs(patterns: &[String], base: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for pattern in patterns {
        let path = if Path::new(pattern).is_relative() {
            base.join(pattern)
        } else {
            PathBuf::from(pattern)
        };
        let full = path.to_string_lossy();
        if !full.contains(['*', '?', '[']) {
            files.push(path);
            continue;
        }
        let mut matched = glob::glob(&full)
            .with_context(|| format!("Invalid file pattern '{pattern}'"))?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Could not expand '{pattern}'"))?;
        matched.sort();
        files.extend(matched);
    }
    Ok(files)
}

impl Task {
    pub fn new(name: impl Into<Value>, kind: TaskKind) -> Self {
        Self {
            name: Interpolated::new("name", name),
            kind,
            state: TaskState::Constructed,
            locals: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn locals(&self) -> &BTreeMap<String, Value> {
        &self.locals
    }

    /// A copy of this task with extra loop variables in scope.
    pub fn with_locals(&self, locals: &BTreeMap<String, Value>) -> Self {
        let mut task = self.clone();
        task.locals
            .extend(locals.iter().map(|(k, v)| (k.clone(), v.clone())));
        task
    }

    /// The resolved name once bound, the raw name before.
    pub fn label(&self) -> String {
        self.name
            .string()
            .unwrap_or_else(|_| self.name.raw().to_string())
    }

    /// Nested tasks (those run inside a `with_service` task).
    pub fn subtasks(&self) -> &[Task] {
        match &self.kind {
            TaskKind::WithService(w) => &w.tasks,
            _ => &[],
        }
    }

    fn task_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), self.name.lazy());
        map.insert("kind".to_string(), Value::from(self.kind.name()));
        for attr in self.kind.attributes() {
            map.insert(attr.attribute().to_string(), attr.lazy());
        }
        Value::Map(map)
    }

    /// The namespace this task renders its templates with.
    pub fn namespace<'a>(&self, binding: Binding<'a>) -> Namespace<'a> {
        let mut ns = binding.namespace(&self.locals);
        ns.set("task", self.task_value());
        ns
    }

    /// Resolves the name and every attribute against a fresh namespace.
    ///
    /// With `strict` unset, a template that cannot be rendered yet (say, it
    /// reads a setting an earlier task saves) is left unresolved; it is
    /// resolved again when the task runs.
    fn resolve_all(
        &mut self,
        binding: Binding<'_>,
        maker: &mut Maker,
        strict: bool,
    ) -> Result<(), TaskError> {
        self.name.clear();
        for attr in self.kind.attributes_mut() {
            attr.clear();
        }
        let ns = self.namespace(binding);
        let owner = format!("{} task '{}'", self.kind.name(), self.name.raw());
        let mut attrs = vec![&mut self.name];
        attrs.extend(self.kind.attributes_mut());
        for attr in attrs {
            if strict {
                resolve_attribute(attr, &ns, &owner, maker)?;
                continue;
            }
            let name = attr.attribute();
            match attr.resolve(&ns, &owner) {
                Ok(_) => {}
                Err(err @ AttributeError::Template { .. }) => {
                    log::debug!("{owner}: deferring attribute '{name}': {}", error_chain(&err));
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Binds the task to a run. Attributes that already render are cached
    /// for confirmation and descriptions; `create_runtime` must render fully
    /// since later tasks read the build properties it publishes.
    pub fn bind(&mut self, binding: Binding<'_>, maker: &mut Maker) -> Result<(), TaskError> {
        let strict = matches!(self.kind, TaskKind::CreateRuntime(_));
        self.resolve_all(binding, maker, strict)?;

        if let TaskKind::WithService(service) = &mut self.kind {
            service.tasks.clear();
            for step in &service.steps {
                let expanded = step::expand(step, binding, maker.log(), &self.locals)
                    .map_err(Box::new)?;
                for mut task in expanded {
                    task.bind(binding, maker)?;
                    service.tasks.push(task);
                }
            }
        }
        self.state = TaskState::Bound;
        Ok(())
    }

    /// Publishes values later tasks depend on (such as the runtime location).
    pub fn setup_build_properties(
        &self,
        project: &mut ProjectState,
        base: &Path,
        runtime: &dyn RuntimeBuilder,
    ) -> Result<(), TaskError> {
        if let TaskKind::CreateRuntime(create) = &self.kind {
            let root = base.join(create.path.string()?);
            let layout = runtime.layout(&root);
            let mut set = |key: &str, path: &Path| {
                project
                    .build_properties
                    .insert(key.to_string(), Value::Str(path.display().to_string()));
            };
            set(RUNTIME_PATH, &layout.root);
            set(RUNTIME_BIN, &layout.bin_dir);
            set(RUNTIME_PYTHON, &layout.python);
            set(RUNTIME_LIB, &layout.lib_dir);
        }
        Ok(())
    }

    /// Checks the bound attributes before anything in the project runs.
    pub fn confirm(&mut self, project: &ProjectState) -> Result<(), TaskError> {
        if self.state == TaskState::Constructed {
            return Err(TaskError::NotBound(self.label()));
        }
        self.check(project)?;
        if let TaskKind::WithService(w) = &mut self.kind {
            for task in &mut w.tasks {
                task.confirm(project)?;
            }
        }
        self.state = TaskState::Confirmed;
        Ok(())
    }

    /// Validates the attributes resolved so far.
    fn check(&self, project: &ProjectState) -> Result<(), TaskError> {
        let invalid = |message: &str| TaskError::Invalid {
            task: self.label(),
            message: message.to_string(),
        };

        match &self.kind {
            TaskKind::EnsureFile(e) if e.content.is_resolved() && e.content_path.is_resolved() => {
                let has_content = !matches!(e.content.get()?, Value::None);
                let has_path = e.content_path.optional()?.is_some();
                if has_content == has_path {
                    let message = "needs exactly one of 'content' and 'content_path'";
                    return Err(invalid(message));
                }
            }
            TaskKind::Script(s) if s.use_runtime.is_resolved() => {
                if s.use_runtime.flag()? {
                    runtime_property(project, RUNTIME_BIN)?;
                }
            }
            TaskKind::InstallPackages(_) => {
                runtime_property(project, RUNTIME_PATH)?;
            }
            TaskKind::SaveSetting(s) if s.values.is_resolved() => {
                if !matches!(s.values.get()?, Value::Map(_)) {
                    return Err(invalid("'values' must be a table"));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// The rendered description of what this task will do.
    pub fn describe(&self, binding: Binding<'_>) -> String {
        let ns = self.namespace(binding);
        let template = dedent(self.kind.description());
        let mut text = match ns.interpolate(template.trim_start_matches('\n'), "description") {
            Ok(text) => text.trim_end().to_string(),
            Err(e) => format!("({} task; error in description: {e})", self.kind.name()),
        };
        for (index, task) in self.subtasks().iter().enumerate() {
            text.push_str(&format!("\n  {}. {}\n", index + 1, task.label()));
            text.push_str(&indent(&task.describe(binding), "      "));
        }
        text
    }

    /// Runs a confirmed task.
    pub fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<()> {
        if self.state != TaskState::Confirmed {
            return Err(TaskError::NotConfirmed(self.label()).into());
        }
        self.state = TaskState::Executing;
        let result = self.refresh(ctx).and_then(|()| self.execute(ctx));
        self.state = if result.is_ok() {
            TaskState::Completed
        } else {
            TaskState::Failed
        };
        result
    }

    /// Resolves every attribute again against the store as it is now, so
    /// values saved by earlier tasks of the run are seen.
    fn refresh(&mut self, ctx: &mut RunContext<'_>) -> Result<()> {
        let binding = Binding {
            store: &*ctx.store,
            env: ctx.env,
            project: &*ctx.project,
        };
        self.resolve_all(binding, &mut *ctx.maker, true)?;
        self.check(ctx.project)?;
        Ok(())
    }

    fn execute(&mut self, ctx: &mut RunContext<'_>) -> Result<()> {
        if let TaskKind::WithService(service) = &mut self.kind {
            return run_with_service(service, ctx);
        }

        match &self.kind {
            TaskKind::Script(s) => {
                let mut spec = command_spec(s.command.get()?)?;
                spec.cwd = Some(match s.cwd.optional()? {
                    Some(cwd) => ctx.maker.path(cwd),
                    None => ctx.env.base_path().to_path_buf(),
                });
                if let Value::Map(env) = s.env.get()? {
                    for (key, value) in env {
                        spec.env.insert(key.clone(), value.to_string());
                    }
                }
                if let Some(stdin) = s.stdin.optional()? {
                    spec.stdin = Some(stdin);
                }
                if s.use_runtime.flag()? {
                    spec.extra_path.push(runtime_property(ctx.project, RUNTIME_BIN)?);
                }
                spec.accept_codes = s.accept_codes.clone();
                ctx.maker.run_command(&spec)?;
            }
            TaskKind::CopyDir(c) => {
                let options = CopyOptions {
                    overwrite: c.overwrite.flag()?,
                    include_hidden: c.include_hidden.flag()?,
                };
                let ns = self.namespace(Binding {
                    store: ctx.store,
                    env: ctx.env,
                    project: ctx.project,
                });
                ctx.maker
                    .copy_dir(c.source.string()?, c.dest.string()?, &ns, options)?;
            }
            TaskKind::CopyFile(c) => {
                let options = CopyOptions {
                    overwrite: c.overwrite.flag()?,
                    include_hidden: false,
                };
                let ns = self.namespace(Binding {
                    store: ctx.store,
                    env: ctx.env,
                    project: ctx.project,
                });
                ctx.maker
                    .copy_file(c.source.string()?, c.dest.string()?, Some(&ns), options)?;
            }
            TaskKind::EnsureFile(e) => self.ensure_file(e, ctx)?,
            TaskKind::EnsureSymlink(l) => {
                ctx.maker
                    .ensure_symlink(l.source.string()?, l.dest.string()?, l.overwrite.flag()?)?;
            }
            TaskKind::EnsureDir(d) => {
                if d.vcs_add.flag()? {
                    let vcs = vcs::vcs_for(&d.vcs.string()?)?;
                    ctx.maker.ensure_dir_tracked(d.dest.string()?, vcs.as_ref())?;
                } else {
                    ctx.maker.ensure_dir(d.dest.string()?)?;
                }
            }
            TaskKind::Checkout(c) => {
                let vcs = vcs::vcs_for(&c.vcs.string()?)?;
                let dest = PathBuf::from(c.dest.string()?);
                let revision = c.revision.optional()?;
                vcs::checkout_or_update(
                    ctx.maker,
                    vcs.as_ref(),
                    &c.repository.string()?,
                    &dest,
                    revision.as_deref(),
                )?;
            }
            TaskKind::SaveSetting(s) => save_setting(s, ctx)?,
            TaskKind::Patch(p) => apply_patches(p, ctx)?,
            TaskKind::Log(l) => {
                let message = l.message.string()?;
                let log = ctx.maker.log();
                match l.level.string()?.to_ascii_lowercase().as_str() {
                    "debug" => log.debug(message),
                    "info" => log.info(message),
                    "warn" | "warning" => log.warn(message),
                    "error" => log.error(message),
                    _ => log.notify(message),
                }
            }
            TaskKind::CreateRuntime(r) => {
                let root = ctx.maker.path(r.path.string()?);
                ctx.runtime
                    .create(ctx.maker, &root, r.system_packages.flag()?)?;
            }
            TaskKind::InstallPackages(i) => {
                let root = runtime_property(ctx.project, RUNTIME_PATH)?;
                let layout = ctx.runtime.layout(&root);
                ctx.runtime
                    .install(ctx.maker, &layout, &i.packages.items()?)?;
            }
            TaskKind::WithService(_) => {}
        }
        Ok(())
    }

    fn ensure_file(&self, e: &EnsureFile, ctx: &mut RunContext<'_>) -> Result<()> {
        let dest = ctx.maker.path(e.dest.string()?);
        if !e.overwrite.flag()? && ctx.maker.exists(&dest) {
            ctx.maker.log().notify(format!(
                "File {} already exists; not overwriting",
                ctx.maker.display_path(&dest)
            ));
            return Ok(());
        }

        let content = match e.content_path.optional()? {
            Some(template_path) => {
                let path = ctx.maker.path(template_path);
                let ns = self.namespace(Binding {
                    store: ctx.store,
                    env: ctx.env,
                    project: ctx.project,
                });
                loop {
                    let raw = fs::read_to_string(&path)
                        .with_context(|| format!("Could not read template {}", path.display()))?;
                    match ns.interpolate(&raw, &ctx.maker.display_path(&path)) {
                        Ok(text) => break text,
                        Err(err) => {
                            if !retry_template(ctx.maker, &ns, &self.label(), &err, &raw)? {
                                return Err(err.into());
                            }
                        }
                    }
                }
            }
            None => e.content.string()?,
        };

        let options = FileOptions {
            overwrite: e.force_overwrite.flag()?,
            executable: e.executable.flag()?,
        };
        ctx.maker.ensure_file(&dest, &content, options)?;
        Ok(())
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label(), self.kind.name())
    }
}

fn run_with_service(service: &mut WithService, ctx: &mut RunContext<'_>) -> Result<()> {
    let cwd = match service.cwd.optional()? {
        Some(cwd) => ctx.maker.path(cwd),
        None => ctx.env.base_path().to_path_buf(),
    };
    let start = command_spec(service.start.get()?)?.cwd(&cwd);
    let stop = command_spec(service.stop.get()?)?.cwd(&cwd);

    ctx.maker.run_command(&start).context("Could not start the service")?;
    let result = {
        let _indent = ctx.maker.log().indented();
        service.tasks.iter_mut().try_for_each(|task| {
            ctx.maker.log().notify(format!("Running {}", task.label()));
            task.run(ctx)
                .with_context(|| format!("Task '{}' failed", task.label()))
        })
    };
    let stopped = ctx.maker.run_command(&stop);
    result?;
    stopped.context("Could not stop the service")?;
    Ok(())
}

fn save_setting(s: &SaveSetting, ctx: &mut RunContext<'_>) -> Result<()> {
    let section = s
        .section
        .optional()?
        .unwrap_or_else(|| GENERAL_SECTION.to_string());
    let Value::Map(values) = s.values.get()? else {
        bail!("'values' must be a table");
    };
    let overwrite = s.overwrite.flag()?;
    let overwrite_if_empty = s.overwrite_if_empty.flag()?;
    let build_ini = ctx.env.build_ini();

    for (key, value) in values {
        let value = value.to_string();
        let current = ctx.store.get(&section, key).map(str::to_string);
        let should_write = match &current {
            None => true,
            Some(current) => {
                overwrite || (overwrite_if_empty && current.is_empty()) || *current == value
            }
        };
        if should_write {
            ctx.maker
                .log()
                .info(format!("Setting [{section}] {key} = {value:?}"));
            ctx.store
                .set(&section, key, &value, Source::File(build_ini.clone()));
        } else if let Some(current) = current {
            ctx.maker.log().notify(format!(
                "Not overwriting build.ini option [{section}] {key} = {current:?} (new value would have been {value:?})"
            ));
        }
    }

    if ctx.maker.simulate() {
        return Ok(());
    }
    ctx.maker.ensure_dir(ctx.env.etc_dir())?;
    ctx.store
        .save(&build_ini, &ConfigStore::local_sources(&build_ini))?;
    Ok(())
}

fn apply_patches(p: &Patch, ctx: &mut RunContext<'_>) -> Result<()> {
    let dest = ctx.maker.path(p.dest.string()?);
    let strip = p.strip.int()?;
    let files = expand_globs(&p.files.items()?, ctx.env.base_path())?;
    if files.is_empty() {
        bail!("No patch files matched {}", p.files.raw());
    }
    ctx.maker.log().notify(format!(
        "Applying patches {}",
        files
            .iter()
            .map(|f| ctx.maker.display_path(f))
            .collect::<Vec<_>>()
            .join(", ")
    ));
    let _indent = ctx.maker.log().indented();

    for file in files {
        // patch exits with 1 when a hunk was rejected or already applied.
        let spec = CommandSpec::new([
            "patch".to_string(),
            "-p".to_string(),
            strip.to_string(),
            "--forward".to_string(),
            "-i".to_string(),
            file.display().to_string(),
        ])
        .cwd(&dest)
        .accept(1);
        let Some(output) = ctx.maker.run_command(&spec)? else {
            continue;
        };
        if output.code == 0 {
            ctx.maker
                .log()
                .info(format!("Applied {}", ctx.maker.display_path(&file)));
        } else if output.stdout.contains("Reversed (or previously applied) patch detected") {
            ctx.maker.log().info("Patch already applied.");
        } else {
            ctx.maker
                .log()
                .error(format!("stdout:\n{}", output.stdout.trim_end()));
            if !output.stderr.trim().is_empty() {
                ctx.maker
                    .log()
                    .error(format!("stderr:\n{}", output.stderr.trim_end()));
            }
            bail!(
                "Patch {} failed in {} (exit code {})",
                file.display(),
                dest.display(),
                output.code
            );
        }
    }
    Ok(())
}

/// The user interruption behind an error, if any. These end the whole run
/// even when other failures could be continued past.
pub fn interruption(err: &anyhow::Error) -> Option<ConflictError> {
    fn from_maker(err: &MakerError) -> Option<ConflictError> {
        match err {
            MakerError::Conflict(c @ (ConflictError::Aborted | ConflictError::Interrupted)) => {
                Some(c.clone())
            }
            MakerError::Command(ExecutionError::Interrupted { .. }) => {
                Some(ConflictError::Interrupted)
            }
            _ => None,
        }
    }

    if let Some(c @ (ConflictError::Aborted | ConflictError::Interrupted)) =
        err.downcast_ref::<ConflictError>()
    {
        return Some(c.clone());
    }
    err.chain().find_map(|cause| {
        if let Some(c) = cause.downcast_ref::<ConflictError>() {
            return matches!(c, ConflictError::Aborted | ConflictError::Interrupted)
                .then(|| c.clone());
        }
        if let Some(e) = cause.downcast_ref::<MakerError>() {
            return from_maker(e);
        }
        if let Some(VcsError::Maker(e)) = cause.downcast_ref::<VcsError>() {
            return from_maker(e);
        }
        if let Some(RuntimeError::Maker(e)) = cause.downcast_ref::<RuntimeError>() {
            return from_maker(e);
        }
        if let Some(TaskError::Conflict(c)) = cause.downcast_ref::<TaskError>() {
            return matches!(c, ConflictError::Aborted | ConflictError::Interrupted)
                .then(|| c.clone());
        }
        if let Some(ExecutionError::Interrupted { .. }) = cause.downcast_ref::<ExecutionError>() {
            return Some(ConflictError::Interrupted);
        }
        None
    })
}
