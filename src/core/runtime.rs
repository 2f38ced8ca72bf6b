// src/core/runtime.rs

use crate::core::maker::{Maker, MakerError, Outcome};
use crate::system::executor::CommandSpec;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Maker(#[from] MakerError),
    #[error("No packages given to install")]
    NothingToInstall,
}

/// Where the pieces of an isolated runtime live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLayout {
    pub root: PathBuf,
    pub bin_dir: PathBuf,
    pub lib_dir: PathBuf,
    /// The interpreter inside the runtime.
    pub python: PathBuf,
}

/// Creates isolated runtime environments and installs packages into them.
pub trait RuntimeBuilder: fmt::Debug {
    fn layout(&self, root: &Path) -> RuntimeLayout;

    fn create(
        &self,
        maker: &mut Maker,
        root: &Path,
        with_system_packages: bool,
    ) -> Result<Outcome, RuntimeError>;

    fn install(
        &self,
        maker: &mut Maker,
        layout: &RuntimeLayout,
        packages: &[String],
    ) -> Result<(), RuntimeError>;
}

/// Python virtual environments built with `python3 -m venv`.
#[derive(Debug, Clone)]
pub struct VenvBuilder {
    pub interpreter: String,
}

impl Default for VenvBuilder {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
        }
    }
}

impl RuntimeBuilder for VenvBuilder {
    fn layout(&self, root: &Path) -> RuntimeLayout {
        let bin_dir = root.join("bin");
        RuntimeLayout {
            root: root.to_path_buf(),
            python: bin_dir.join("python"),
            bin_dir,
            lib_dir: root.join("lib"),
        }
    }

    fn create(
        &self,
        maker: &mut Maker,
        root: &Path,
        with_system_packages: bool,
    ) -> Result<Outcome, RuntimeError> {
        let layout = self.layout(root);
        if layout.python.exists() {
            maker.log().info(format!(
                "Runtime at {} already exists",
                maker.display_path(root)
            ));
            return Ok(Outcome::Unchanged);
        }

        if let Some(parent) = root.parent() {
            maker.ensure_dir(parent)?;
        }
        let mut argv = vec![self.interpreter.clone(), "-m".into(), "venv".into()];
        if with_system_packages {
            argv.push("--system-site-packages".into());
        }
        argv.push(root.display().to_string());
        maker.run_command(&CommandSpec::new(argv))?;
        maker
            .log()
            .notify(format!("Created runtime at {}", maker.display_path(root)));
        Ok(Outcome::Created)
    }

    fn install(
        &self,
        maker: &mut Maker,
        layout: &RuntimeLayout,
        packages: &[String],
    ) -> Result<(), RuntimeError> {
        if packages.is_empty() {
            return Err(RuntimeError::NothingToInstall);
        }
        let mut argv = vec![
            layout.python.display().to_string(),
            "-m".into(),
            "pip".into(),
            "install".into(),
        ];
        argv.extend(packages.iter().cloned());
        let mut spec = CommandSpec::new(argv).env("VIRTUAL_ENV", layout.root.display().to_string());
        spec.extra_path.push(layout.bin_dir.clone());
        maker.run_command(&spec)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::conflict::AutoPolicy;
    use crate::core::log_context::LogContext;
    use crate::core::maker::MakerOptions;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_layout_places_interpreter_in_bin() {
        let layout = VenvBuilder::default().layout(Path::new("/srv/build/lib/python"));
        assert_eq!(layout.bin_dir, PathBuf::from("/srv/build/lib/python/bin"));
        assert_eq!(layout.python, PathBuf::from("/srv/build/lib/python/bin/python"));
        assert_eq!(layout.lib_dir, PathBuf::from("/srv/build/lib/python/lib"));
    }

    #[test]
    fn test_existing_runtime_is_left_alone() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("env");
        fs::create_dir_all(root.join("bin")).unwrap();
        fs::write(root.join("bin/python"), "").unwrap();
        let mut maker = Maker::new(
            dir.path(),
            MakerOptions::default(),
            Box::new(AutoPolicy),
            LogContext::new(),
        );

        let outcome = VenvBuilder::default().create(&mut maker, &root, false).unwrap();
        assert_eq!(outcome, Outcome::Unchanged);
    }

    #[test]
    fn test_simulated_install_runs_nothing() {
        let dir = tempdir().unwrap();
        let builder = VenvBuilder::default();
        let layout = builder.layout(&dir.path().join("env"));
        let mut maker = Maker::new(
            dir.path(),
            MakerOptions {
                simulate: true,
                quick: false,
            },
            Box::new(AutoPolicy),
            LogContext::new(),
        );

        builder
            .install(&mut maker, &layout, &["requests".to_string()])
            .unwrap();
        assert!(matches!(
            builder.install(&mut maker, &layout, &[]),
            Err(RuntimeError::NothingToInstall)
        ));
    }
}
