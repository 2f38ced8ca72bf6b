// src/cli/handlers/commons.rs

// Setup shared by every handler: base directory, layered configuration,
// project registry and the maker.

use crate::cli::Cli;
use crate::cli::args::{self, PositionalArgs};
use crate::cli::prompt::InteractivePrompter;
use crate::core::config_store::ConfigStore;
use crate::core::conflict::{AutoPolicy, ConflictResolver};
use crate::core::environment::{self, Environment};
use crate::core::log_context::LogContext;
use crate::core::maker::{Maker, MakerOptions};
use crate::core::paths;
use crate::core::registry::ProjectRegistry;
use anyhow::{Context, Result};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

/// Everything a handler needs to know about this invocation.
#[derive(Debug)]
pub struct Session {
    pub env: Environment,
    pub store: ConfigStore,
    pub registry: ProjectRegistry,
    pub positional: PositionalArgs,
    pub interactive: bool,
    pub simulate: bool,
    pub quick: bool,
}

/// Expands `~` and variables in a path given on the command line.
fn expand_arg(path: &Path, cwd: &Path) -> Result<PathBuf> {
    Ok(paths::expand_path(&path.to_string_lossy(), cwd)?)
}

/// Reads the configuration layers, lowest priority first: global defaults,
/// `etc/build.ini`, `-c` files, then command-line assignments.
pub fn load_config(
    env: &Environment,
    extra: &[PathBuf],
    positional: &PositionalArgs,
) -> Result<ConfigStore> {
    let mut store = ConfigStore::new();
    let mut layered = paths::global_defaults_files();
    layered.push(env.build_ini());
    let read = store.load(&layered)?;
    log::debug!("Read configuration layers: {read:?}");

    for path in extra {
        store
            .read_file(path)
            .with_context(|| format!("Could not load configuration file {}", path.display()))?;
    }
    positional.apply(&mut store);
    Ok(store)
}

impl Session {
    pub fn open(cli: &Cli) -> Result<Self> {
        args::check_base_typo(cli.base.as_deref())?;
        let positional = PositionalArgs::parse(&cli.args)?;

        let cwd = std::env::current_dir().context("Could not read the current directory")?;
        let base = match cli.base.as_deref() {
            Some(b) => Some(expand_arg(Path::new(b), &cwd)?),
            None => None,
        };
        let env = Environment::new(environment::discover_base(base.as_deref())?);
        log::debug!("Base directory: {}", env.base_path().display());

        let config_files = cli
            .config
            .iter()
            .map(|c| expand_arg(c, &cwd))
            .collect::<Result<Vec<_>>>()?;
        let store = load_config(&env, &config_files, &positional)?;
        let extra_dirs = cli
            .projects_dir
            .iter()
            .map(|d| expand_arg(d, &cwd))
            .collect::<Result<Vec<_>>>()?;
        let extra_dirs: Vec<&Path> = extra_dirs.iter().map(PathBuf::as_path).collect();
        let registry = ProjectRegistry::discover(&env, &extra_dirs)?;

        Ok(Self {
            env,
            store,
            registry,
            positional,
            interactive: !cli.no_interactive && std::io::stdin().is_terminal(),
            simulate: cli.simulate,
            quick: cli.quick,
        })
    }

    /// A maker for this invocation; prompts only when running interactively.
    pub fn maker(&self, log: LogContext) -> Maker {
        let resolver: Box<dyn ConflictResolver> = if self.interactive {
            Box::new(InteractivePrompter::new())
        } else {
            Box::new(AutoPolicy)
        };
        let options = MakerOptions {
            simulate: self.simulate,
            quick: self.quick,
        };
        Maker::new(self.env.base_path(), options, resolver, log)
    }
}
