//! # Project Registry
//!
//! Maps project names to factories that build a fresh [`Project`] for every
//! run. Built-in projects are embedded in the binary; definition files found
//! in `BASE/projects/` or a `--projects-dir` are registered on top of them and
//! replace built-ins of the same name.
//!
//! Requested names are turned into a run plan by [`ProjectRegistry::plan`],
//! which expands the `all` and `missing` pseudo-projects and orders projects so
//! that each one runs after the projects it depends on.

use crate::constants::{PROJECT_FILE_EXTENSION, PROJECTS_DIR};
use crate::core::compiler::{self, CompilerError};
use crate::core::environment::{Environment, EnvironmentError};
use crate::core::project::Project;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use thiserror::Error;
use walkdir::WalkDir;

/// Built-in project definitions.
const BUILTIN_PROJECTS: &[(&str, &str)] = &[
    ("base.toml", include_str!("../../projects/base.toml")),
    ("runtime.toml", include_str!("../../projects/runtime.toml")),
    ("supervisor.toml", include_str!("../../projects/supervisor.toml")),
];

/// Pseudo-project standing for every project listed in the requirements file.
pub const ALL: &str = "all";
/// Pseudo-project standing for the projects not built yet.
pub const MISSING: &str = "missing";

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("No project named '{name}' (available: {available})")]
    NotFound { name: String, available: String },
    #[error("Projects depend on each other in a cycle: {0}")]
    Cycle(String),
    #[error(transparent)]
    Compile(#[from] CompilerError),
    #[error(transparent)]
    Environment(#[from] EnvironmentError),
    #[error("Could not scan project directory '{path}': {source}")]
    Scan {
        path: std::path::PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

type ProjectFactory = Box<dyn Fn() -> Result<Project, CompilerError>>;

struct Registration {
    origin: String,
    title: String,
    factory: ProjectFactory,
}

/// Where a registered project comes from, for listings.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ProjectInfo {
    pub name: String,
    pub title: String,
    pub origin: String,
}

#[derive(Default)]
pub struct ProjectRegistry {
    projects: BTreeMap<String, Registration>,
}

impl fmt::Debug for ProjectRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectRegistry")
            .field("projects", &self.projects.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in projects.
    pub fn with_builtins() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for (file, text) in BUILTIN_PROJECTS {
            registry.register_source(&format!("<builtin>/{file}"), text)?;
        }
        Ok(registry)
    }

    /// Registers a factory under `name`, replacing any earlier registration.
    pub fn register<F>(&mut self, name: &str, title: &str, origin: &str, factory: F)
    where
        F: Fn() -> Result<Project, CompilerError> + 'static,
    {
        if let Some(previous) = self.projects.get(name) {
            log::debug!(
                "Project '{name}' from {origin} replaces the one from {}",
                previous.origin
            );
        }
        self.projects.insert(
            name.to_string(),
            Registration {
                origin: origin.to_string(),
                title: title.to_string(),
                factory: Box::new(factory),
            },
        );
    }

    /// Registers a project definition given as TOML text. The text is
    /// compiled once to validate it and again for every fresh instance.
    pub fn register_source(&mut self, origin: &str, text: &str) -> Result<String, RegistryError> {
        let project = compiler::parse_project(text, origin)?;
        let name = project.name.clone();
        let text = text.to_string();
        let owned_origin = origin.to_string();
        self.register(&name, &project.title, origin, move || {
            compiler::parse_project(&text, &owned_origin)
        });
        Ok(name)
    }

    /// Registers every `*.toml` file directly inside `dir`. A missing
    /// directory registers nothing.
    pub fn scan_dir(&mut self, dir: &Path) -> Result<Vec<String>, RegistryError> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        let walker = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name();
        for entry in walker {
            let entry = entry.map_err(|source| RegistryError::Scan {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            let is_definition = entry.file_type().is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext == PROJECT_FILE_EXTENSION);
            if !is_definition {
                continue;
            }
            let text = std::fs::read_to_string(path).map_err(|source| CompilerError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            names.push(self.register_source(&path.display().to_string(), &text)?);
        }
        log::debug!("Registered {} project(s) from {}", names.len(), dir.display());
        Ok(names)
    }

    /// The built-ins plus the definitions in `BASE/projects` and `extra_dirs`.
    pub fn discover(env: &Environment, extra_dirs: &[&Path]) -> Result<Self, RegistryError> {
        let mut registry = Self::with_builtins()?;
        registry.scan_dir(&env.base_path().join(PROJECTS_DIR))?;
        for dir in extra_dirs {
            registry.scan_dir(dir)?;
        }
        Ok(registry)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.projects.keys().map(String::as_str)
    }

    pub fn infos(&self) -> Vec<ProjectInfo> {
        self.projects
            .iter()
            .map(|(name, reg)| ProjectInfo {
                name: name.clone(),
                title: reg.title.clone(),
                origin: reg.origin.clone(),
            })
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.projects.contains_key(name)
    }

    /// Builds a fresh instance of the project called `name`.
    pub fn create(&self, name: &str) -> Result<Project, RegistryError> {
        let registration = self
            .projects
            .get(name)
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
                available: self.names().collect::<Vec<_>>().join(", "),
            })?;
        Ok((registration.factory)()?)
    }

    /// Expands pseudo-projects and drops duplicates, keeping first occurrences.
    fn expand_requested(
        &self,
        requested: &[String],
        env: &Environment,
    ) -> Result<Vec<String>, RegistryError> {
        let mut names = Vec::new();
        for name in requested {
            match name.as_str() {
                ALL => names.extend(self.all_projects(env)?),
                MISSING => {
                    let completed: BTreeSet<String> =
                        env.completed_projects()?.into_iter().collect();
                    names.extend(
                        self.all_projects(env)?
                            .into_iter()
                            .filter(|p| !completed.contains(p)),
                    );
                }
                _ => names.push(name.clone()),
            }
        }
        let mut seen = BTreeSet::new();
        names.retain(|name| seen.insert(name.clone()));
        Ok(names)
    }

    /// The requirements list, or every registered project when there is none.
    fn all_projects(&self, env: &Environment) -> Result<Vec<String>, RegistryError> {
        let listed = env.all_projects()?;
        if listed.is_empty() {
            return Ok(self.names().map(str::to_string).collect());
        }
        Ok(listed)
    }

    /// The projects to run for `requested`, each after its dependencies.
    /// Dependencies not yet built are added to the plan.
    pub fn plan(&self, requested: &[String], env: &Environment) -> Result<Vec<Project>, RegistryError> {
        let completed: BTreeSet<String> = env.completed_projects()?.into_iter().collect();
        let names = self.expand_requested(requested, env)?;
        let mut planner = Planner {
            registry: self,
            completed: &completed,
            requested: names.iter().cloned().collect(),
            placed: BTreeSet::new(),
            stack: Vec::new(),
            order: Vec::new(),
        };
        for name in &names {
            planner.visit(name)?;
        }
        Ok(planner.order)
    }
}

/// Depth-first topological ordering over `depends_on`.
struct Planner<'a> {
    registry: &'a ProjectRegistry,
    completed: &'a BTreeSet<String>,
    requested: BTreeSet<String>,
    placed: BTreeSet<String>,
    stack: Vec<String>,
    order: Vec<Project>,
}

impl Planner<'_> {
    fn visit(&mut self, name: &str) -> Result<(), RegistryError> {
        if self.placed.contains(name) {
            return Ok(());
        }
        if let Some(start) = self.stack.iter().position(|n| n == name) {
            let mut chain = self.stack[start..].to_vec();
            chain.push(name.to_string());
            return Err(RegistryError::Cycle(chain.join(" -> ")));
        }

        let project = self.registry.create(name)?;
        self.stack.push(name.to_string());
        for dependency in &project.depends_on {
            let wanted = self.requested.contains(dependency) || !self.completed.contains(dependency);
            if wanted {
                self.visit(dependency)?;
            } else {
                log::debug!("'{name}' depends on '{dependency}', which is already built");
            }
        }
        self.stack.pop();
        self.placed.insert(name.to_string());
        self.order.push(project);
        Ok(())
    }
}
