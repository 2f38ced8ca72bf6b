// src/core/paths.rs

use crate::constants::{APP_CONFIG_DIRNAME, DEFAULTS_FILENAME};
use lazy_static::lazy_static;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

lazy_static! {
    static ref APP_CONFIG_DIR: Mutex<Option<PathBuf>> = Mutex::new(None);
}

#[derive(Error, Debug)]
pub enum PathError {
    #[error("Could not find system config directory.")]
    ConfigDirNotFound,
    #[error("Could not expand path '{template}': {message}")]
    Expansion { template: String, message: String },
}

/// Returns the user-level configuration directory (`~/.config/fassembler`).
///
/// Memoized: the first call computes the path, later calls return the cached value.
pub fn get_app_config_dir() -> Result<PathBuf, PathError> {
    let mut cached = APP_CONFIG_DIR
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(path) = &*cached {
        return Ok(path.clone());
    }
    let path = dirs::config_dir()
        .ok_or(PathError::ConfigDirNotFound)?
        .join(APP_CONFIG_DIRNAME);
    *cached = Some(path.clone());
    Ok(path)
}

/// The global defaults files, lowest priority first. Absent files are skipped by the loader.
pub fn global_defaults_files() -> Vec<PathBuf> {
    let mut files = vec![
        Path::new("/etc")
            .join(APP_CONFIG_DIRNAME)
            .join(DEFAULTS_FILENAME),
    ];
    if let Ok(dir) = get_app_config_dir() {
        files.push(dir.join(DEFAULTS_FILENAME));
    }
    files
}

/// Expands `~` and `$VARS` in `template` and anchors relative results at `base`.
pub fn expand_path(template: &str, base: &Path) -> Result<PathBuf, PathError> {
    let expanded = shellexpand::full(template).map_err(|e| PathError::Expansion {
        template: template.to_string(),
        message: e.to_string(),
    })?;
    let path = PathBuf::from(expanded.as_ref());
    Ok(if path.is_relative() {
        base.join(path)
    } else {
        path
    })
}

/// A short form of `path` for messages: relative to `base` when inside it,
/// with the home directory abbreviated to `~` otherwise.
pub fn display_path(path: &Path, base: &Path) -> String {
    if let Ok(relative) = path.strip_prefix(base) {
        if relative.as_os_str().is_empty() {
            return ".".to_string();
        }
        return relative.display().to_string();
    }
    if let Some(home) = dirs::home_dir() {
        if let Ok(relative) = path.strip_prefix(&home) {
            return format!("~/{}", relative.display());
        }
    }
    path.display().to_string()
}

/// Whether a file name is hidden (dot-prefixed).
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// The first free backup name: `name.bak`, `name.bak1`, `name.bak2`, ...
pub fn backup_name(path: &Path) -> PathBuf {
    let base = path.as_os_str().to_string_lossy().into_owned();
    let mut candidate = PathBuf::from(format!("{base}.bak"));
    let mut counter = 1;
    while candidate.symlink_metadata().is_ok() {
        candidate = PathBuf::from(format!("{base}.bak{counter}"));
        counter += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_expand_path_anchors_relative_paths() {
        let base = Path::new("/srv/build");
        assert_eq!(
            expand_path("etc/build.ini", base).unwrap(),
            PathBuf::from("/srv/build/etc/build.ini")
        );
        assert_eq!(expand_path("/opt/x", base).unwrap(), PathBuf::from("/opt/x"));
    }

    #[test]
    fn test_display_path_is_relative_to_base() {
        let base = Path::new("/srv/build");
        assert_eq!(display_path(Path::new("/srv/build/etc"), base), "etc");
        assert_eq!(display_path(base, base), ".");
        assert_eq!(display_path(Path::new("/opt/other"), base), "/opt/other");
    }

    #[test]
    fn test_backup_name_picks_first_free_suffix() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("app.conf");
        assert_eq!(backup_name(&file), dir.path().join("app.conf.bak"));

        fs::write(dir.path().join("app.conf.bak"), "").unwrap();
        fs::write(dir.path().join("app.conf.bak1"), "").unwrap();
        assert_eq!(backup_name(&file), dir.path().join("app.conf.bak2"));
    }
}
