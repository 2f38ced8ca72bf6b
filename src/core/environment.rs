//! # Environment
//!
//! The base directory a build is assembled into and the per-build state kept
//! under it: `etc/build.ini`, the list of completed projects in
//! `etc/projects.txt`, and the `requirements/all-projects.txt` list used by
//! the `all` pseudo-project.

use crate::constants::{ALL_PROJECTS_FILE, BUILD_INI, ETC_DIR, PROJECTS_FILE, VAR_DIR};
use crate::core::value::Value;
use crate::system::tools::{self, ToolError};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnvironmentError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("The home directory {0} is missing or not writable")]
    HomeNotWritable(PathBuf),
    #[error("Could not determine the current directory: {0}")]
    NoCurrentDir(#[source] std::io::Error),
}

/// The build being assembled.
#[derive(Debug, Clone)]
pub struct Environment {
    base_path: PathBuf,
    hostname: String,
}

fn detect_hostname() -> String {
    fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Reads a list file: one entry per line, blank lines and `#` comments ignored.
fn read_list(path: &Path) -> Result<Vec<String>, EnvironmentError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(source) => Err(EnvironmentError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

impl Environment {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            hostname: detect_hostname(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn etc_dir(&self) -> PathBuf {
        self.base_path.join(ETC_DIR)
    }

    pub fn var_dir(&self) -> PathBuf {
        self.base_path.join(VAR_DIR)
    }

    pub fn build_ini(&self) -> PathBuf {
        self.etc_dir().join(BUILD_INI)
    }

    pub fn projects_file(&self) -> PathBuf {
        self.etc_dir().join(PROJECTS_FILE)
    }

    /// Projects recorded as successfully built, in the order they completed.
    pub fn completed_projects(&self) -> Result<Vec<String>, EnvironmentError> {
        read_list(&self.projects_file())
    }

    /// Records `name` as built. Recording the same project twice is a no-op.
    pub fn record_completed(&self, name: &str) -> Result<(), EnvironmentError> {
        let mut completed = self.completed_projects()?;
        if completed.iter().any(|p| p == name) {
            return Ok(());
        }
        completed.push(name.to_string());

        let etc = self.etc_dir();
        fs::create_dir_all(&etc).map_err(|source| EnvironmentError::Io {
            path: etc.clone(),
            source,
        })?;
        let path = self.projects_file();
        let mut text = completed.join("\n");
        text.push('\n');
        fs::write(&path, text).map_err(|source| EnvironmentError::Io { path, source })
    }

    /// The projects the `all` pseudo-project stands for.
    pub fn all_projects(&self) -> Result<Vec<String>, EnvironmentError> {
        read_list(&self.base_path.join(ALL_PROJECTS_FILE))
    }

    /// Fails early when the machine cannot run a build at all.
    pub fn preflight(&self, required_tools: &[(&str, &str)]) -> Result<(), EnvironmentError> {
        tools::require_unix()?;
        if let Some(home) = dirs::home_dir() {
            let writable = fs::metadata(&home).is_ok_and(|m| m.is_dir() && !m.permissions().readonly());
            if !writable {
                return Err(EnvironmentError::HomeNotWritable(home));
            }
        }
        for (tool, purpose) in required_tools {
            let found = tools::require_tool(tool, purpose)?;
            log::debug!("Found {tool} at {}", found.display());
        }
        Ok(())
    }

    /// The environment as seen from templates (`env.base_path`, `env.hostname`, ...).
    pub fn as_value(&self) -> Value {
        let mut map = BTreeMap::new();
        let path = |p: PathBuf| Value::Str(p.display().to_string());
        map.insert("base_path".to_string(), path(self.base_path.clone()));
        map.insert("hostname".to_string(), Value::Str(self.hostname.clone()));
        map.insert("etc".to_string(), path(self.etc_dir()));
        map.insert("var".to_string(), path(self.var_dir()));
        map.insert("build_ini".to_string(), path(self.build_ini()));
        Value::Map(map)
    }
}

/// Picks the base directory when none was given: the parent of the
/// executable's directory or the current directory, whichever already holds
/// `etc/build.ini`, falling back to the current directory.
pub fn discover_base(explicit: Option<&Path>) -> Result<PathBuf, EnvironmentError> {
    let cwd = std::env::current_dir().map_err(EnvironmentError::NoCurrentDir)?;
    if let Some(path) = explicit {
        let path = if path.is_relative() {
            cwd.join(path)
        } else {
            path.to_path_buf()
        };
        return Ok(dunce::simplified(&path).to_path_buf());
    }

    let beside_exe = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().and_then(Path::parent).map(Path::to_path_buf));
    let found = beside_exe
        .into_iter()
        .chain(std::iter::once(cwd.clone()))
        .find(|candidate| candidate.join(ETC_DIR).join(BUILD_INI).is_file());
    match found {
        Some(base) => {
            log::debug!("Using base directory {} (found {ETC_DIR}/{BUILD_INI})", base.display());
            Ok(base)
        }
        None => Ok(cwd),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_completed_projects_are_recorded_once() {
        let dir = tempdir().unwrap();
        let env = Environment::new(dir.path());
        assert!(env.completed_projects().unwrap().is_empty());

        env.record_completed("base").unwrap();
        env.record_completed("web").unwrap();
        env.record_completed("base").unwrap();

        assert_eq!(env.completed_projects().unwrap(), vec!["base", "web"]);
    }

    #[test]
    fn test_all_projects_skips_comments() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("requirements")).unwrap();
        fs::write(
            dir.path().join(ALL_PROJECTS_FILE),
            "# everything\nbase\n\nweb\n",
        )
        .unwrap();
        let env = Environment::new(dir.path());
        assert_eq!(env.all_projects().unwrap(), vec!["base", "web"]);
    }

    #[test]
    fn test_explicit_base_is_anchored_at_cwd() {
        let dir = tempdir().unwrap();
        assert_eq!(discover_base(Some(dir.path())).unwrap(), dir.path());
    }

    #[test]
    fn test_as_value_exposes_paths() {
        let env = Environment::new("/srv/site");
        match env.as_value() {
            Value::Map(map) => {
                assert_eq!(map["base_path"], Value::from("/srv/site"));
                assert_eq!(map["build_ini"], Value::from("/srv/site/etc/build.ini"));
            }
            other => panic!("unexpected value: {other:?}"),
        }
    }
}
