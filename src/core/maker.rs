//! # Maker
//!
//! Idempotent filesystem and process primitives. Every operation can be
//! repeated with the same arguments: when the filesystem is already in the
//! desired state nothing is mutated. Conflicts are described as values and
//! handed to the configured [`ConflictResolver`]; the maker never prompts.
//!
//! In simulate mode every decision is still taken and logged ("would ..."),
//! but nothing on disk changes and no process is started.

use crate::constants::{SHADOW_SUFFIX, TEMPLATE_SUFFIX};
use crate::core::conflict::{
    ConflictError, ConflictResolver, ExistingEntry, FileConflict, FileDecision, SymlinkConflict,
    SymlinkDecision,
};
use crate::core::expr::{MapScope, Scope};
use crate::core::log_context::LogContext;
use crate::core::namespace::Namespace;
use crate::core::paths;
use crate::core::template::{TemplateError, render_str};
use crate::core::vcs::Vcs;
use crate::system::executor::{self, CommandOutput, CommandSpec, ExecutionError};
use lazy_static::lazy_static;
use regex::Regex;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

lazy_static! {
    static ref FILENAME_VAR_RE: Regex = Regex::new(r"\+([A-Za-z_]\w*)\+").unwrap();
}

#[derive(Error, Debug)]
pub enum MakerError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("'{0}' exists and is not a directory")]
    NotADirectory(PathBuf),
    #[error("'{0}' exists and is not a regular file")]
    NotAFile(PathBuf),
    #[error("Refusing to symlink '{0}' to itself")]
    SelfLink(PathBuf),
    #[error("Unknown variable '+{var}+' in file name '{path}'")]
    UnknownFilenameVar { path: PathBuf, var: String },
    #[error("'{0}' is a template but no template variables were provided")]
    MissingRenderer(PathBuf),
    #[error("Could not fill template '{path}'")]
    Template {
        path: PathBuf,
        #[source]
        source: TemplateError,
    },
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    #[error(transparent)]
    Command(#[from] ExecutionError),
    #[error("Could not walk directory: {0}")]
    Walk(#[from] walkdir::Error),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> MakerError + '_ {
    move |source| MakerError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// What an operation did (or, in simulate mode, would have done).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Unchanged,
    Updated,
    Skipped,
}

impl Outcome {
    /// Combines the outcomes of several sub-operations.
    fn merge(self, other: Self) -> Self {
        use Outcome::{Created, Skipped, Unchanged, Updated};
        match (self, other) {
            (Unchanged, x) | (x, Unchanged) => x,
            (Created, Created) => Created,
            (Skipped, Skipped) => Skipped,
            _ => Updated,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MakerOptions {
    /// Decide and log, but never mutate.
    pub simulate: bool,
    /// Skip slow refreshes such as updating existing checkouts.
    pub quick: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FileOptions {
    /// Replace differing content without asking.
    pub overwrite: bool,
    pub executable: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CopyOptions {
    /// In unattended runs, replace files whose content differs.
    pub overwrite: bool,
    pub include_hidden: bool,
}

/// Renders template files and resolves `+var+` markers in file names.
pub trait Renderer {
    fn render(&self, source: &str, name: &str) -> Result<String, TemplateError>;
    fn filename_var(&self, name: &str) -> Option<String>;
}

impl Renderer for Namespace<'_> {
    fn render(&self, source: &str, name: &str) -> Result<String, TemplateError> {
        self.interpolate(source, name)
    }

    fn filename_var(&self, name: &str) -> Option<String> {
        let value = self.lookup(name).ok()?;
        crate::core::expr::realize(value, self)
            .ok()
            .map(|v| v.to_string())
    }
}

impl Renderer for MapScope<'_> {
    fn render(&self, source: &str, name: &str) -> Result<String, TemplateError> {
        render_str(source, name, self)
    }

    fn filename_var(&self, name: &str) -> Option<String> {
        self.lookup(name).ok().map(|v| v.to_string())
    }
}

enum FileState {
    Absent,
    Same,
    Different(String),
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).is_ok_and(|m| m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    true
}

#[cfg(unix)]
fn symlink(source: &Path, dest: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(source, dest)
}

#[cfg(not(unix))]
fn symlink(_source: &Path, _dest: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        ErrorKind::Unsupported,
        "symlinks require a Unix system",
    ))
}

/// The hidden file keeping the raw template next to its rendering.
pub fn shadow_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{name}{SHADOW_SUFFIX}"))
}

/// The filesystem/process operation layer.
#[derive(Debug)]
pub struct Maker {
    base_path: PathBuf,
    simulate: bool,
    quick: bool,
    resolver: Box<dyn ConflictResolver>,
    log: LogContext,
}

impl Maker {
    pub fn new(
        base_path: impl Into<PathBuf>,
        options: MakerOptions,
        resolver: Box<dyn ConflictResolver>,
        log: LogContext,
    ) -> Self {
        Self {
            base_path: base_path.into(),
            simulate: options.simulate,
            quick: options.quick,
            resolver,
            log,
        }
    }

    // --- Accessors ---

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn simulate(&self) -> bool {
        self.simulate
    }

    pub fn quick(&self) -> bool {
        self.quick
    }

    pub fn interactive(&self) -> bool {
        self.resolver.is_interactive()
    }

    pub fn log(&self) -> &LogContext {
        &self.log
    }

    pub fn resolver_mut(&mut self) -> &mut dyn ConflictResolver {
        self.resolver.as_mut()
    }

    /// Anchors a relative path at the base directory.
    pub fn path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_relative() {
            self.base_path.join(path)
        } else {
            path.to_path_buf()
        }
    }

    pub fn display_path(&self, path: &Path) -> String {
        paths::display_path(path, &self.base_path)
    }

    /// Whether something (even a broken symlink) exists at `path`.
    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.path(path).symlink_metadata().is_ok()
    }

    fn warn_outside_base(&self, path: &Path) {
        if !path.starts_with(&self.base_path) {
            self.log.warn(format!(
                "Writing {} outside of the base directory {}",
                path.display(),
                self.base_path.display()
            ));
        }
    }

    // --- Directories ---

    /// Creates `path` and every missing ancestor, logging each one once.
    pub fn ensure_dir(&mut self, path: impl AsRef<Path>) -> Result<Outcome, MakerError> {
        self.ensure_dir_with(path.as_ref(), None)
    }

    /// Like [`Maker::ensure_dir`], also adding each new directory to version control.
    pub fn ensure_dir_tracked(
        &mut self,
        path: impl AsRef<Path>,
        vcs: &dyn Vcs,
    ) -> Result<Outcome, MakerError> {
        self.ensure_dir_with(path.as_ref(), Some(vcs))
    }

    fn ensure_dir_with(&mut self, path: &Path, vcs: Option<&dyn Vcs>) -> Result<Outcome, MakerError> {
        let path = self.path(path);
        if path.is_dir() {
            self.log
                .debug(format!("Directory {} exists", self.display_path(&path)));
            return Ok(Outcome::Unchanged);
        }
        if path.symlink_metadata().is_ok() {
            return Err(MakerError::NotADirectory(path));
        }

        let mut missing: Vec<PathBuf> = path
            .ancestors()
            .take_while(|p| !p.as_os_str().is_empty() && p.symlink_metadata().is_err())
            .map(Path::to_path_buf)
            .collect();
        missing.reverse();

        for dir in missing {
            self.log.info(format!("Creating {}", self.display_path(&dir)));
            if self.simulate {
                continue;
            }
            match fs::create_dir(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists && dir.is_dir() => {}
                Err(e) => return Err(io_error(&dir)(e)),
            }
            if let Some(vcs) = vcs {
                if let Err(e) = vcs.add(self, &dir) {
                    self.log
                        .warn(format!("Could not add {} to {}: {}", dir.display(), vcs.name(), e));
                }
            }
        }
        Ok(Outcome::Created)
    }

    // --- Files ---

    fn inspect_file(&self, path: &Path, content: &str) -> Result<FileState, MakerError> {
        match fs::symlink_metadata(path) {
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(FileState::Absent),
            Err(e) => Err(io_error(path)(e)),
            Ok(meta) if meta.is_dir() => Err(MakerError::NotAFile(path.to_path_buf())),
            Ok(_) => {
                let bytes = fs::read(path).map_err(io_error(path))?;
                if bytes == content.as_bytes() {
                    Ok(FileState::Same)
                } else {
                    Ok(FileState::Different(String::from_utf8_lossy(&bytes).into_owned()))
                }
            }
        }
    }

    fn write(&self, path: &Path, content: &str) -> Result<(), MakerError> {
        if self.simulate {
            return Ok(());
        }
        fs::write(path, content).map_err(io_error(path))
    }

    /// Ensures `path` exists with exactly `content`.
    ///
    /// Identical content is a no-op (apart from fixing the executable bit).
    /// Differing content is replaced when `overwrite` is set; otherwise an
    /// interactive resolver is asked and an unattended run leaves the file alone.
    pub fn ensure_file(
        &mut self,
        path: impl AsRef<Path>,
        content: &str,
        options: FileOptions,
    ) -> Result<Outcome, MakerError> {
        self.ensure_file_noted(path.as_ref(), content, options, None)
    }

    fn ensure_file_noted(
        &mut self,
        path: &Path,
        content: &str,
        options: FileOptions,
        note: Option<String>,
    ) -> Result<Outcome, MakerError> {
        let path = self.path(path);
        let shown = self.display_path(&path);
        self.warn_outside_base(&path);

        match self.inspect_file(&path, content)? {
            FileState::Absent => {
                if let Some(parent) = path.parent() {
                    self.ensure_dir(parent)?;
                }
                self.log.info(format!("Creating {shown}"));
                self.write(&path, content)?;
                if options.executable {
                    self.make_executable(&path)?;
                }
                Ok(Outcome::Created)
            }
            FileState::Same => {
                self.log.debug(format!("File {shown} matches expected content"));
                if options.executable && !is_executable(&path) {
                    self.make_executable(&path)?;
                    return Ok(Outcome::Updated);
                }
                Ok(Outcome::Unchanged)
            }
            FileState::Different(existing) => {
                if !options.overwrite {
                    let conflict = FileConflict {
                        path: path.clone(),
                        existing,
                        proposed: content.to_string(),
                        note,
                    };
                    self.log.warn(format!(
                        "File {shown} does not match expected content ({})",
                        conflict.diff().summary()
                    ));
                    let decision = if self.simulate {
                        self.log.notify(format!("Would ask what to do with {shown}"));
                        FileDecision::Skip
                    } else {
                        self.resolver.resolve_file(&conflict)?
                    };
                    match decision {
                        FileDecision::Skip => {
                            self.log.notify(format!("Leaving {shown} unchanged"));
                            return Ok(Outcome::Skipped);
                        }
                        FileDecision::Backup => {
                            self.backup_file(&path)?;
                        }
                        FileDecision::Overwrite => {}
                    }
                }
                self.log.notify(format!("Overwriting {shown} with new content"));
                self.write(&path, content)?;
                if options.executable {
                    self.make_executable(&path)?;
                }
                Ok(Outcome::Updated)
            }
        }
    }

    /// Adds the executable bits to `path`.
    pub fn make_executable(&self, path: &Path) -> Result<(), MakerError> {
        self.log
            .info(format!("Making {} executable", self.display_path(path)));
        if self.simulate {
            return Ok(());
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut permissions = fs::metadata(path).map_err(io_error(path))?.permissions();
            permissions.set_mode(permissions.mode() | 0o111);
            fs::set_permissions(path, permissions).map_err(io_error(path))?;
        }
        Ok(())
    }

    /// Copies a file. A source ending in `_tmpl` is rendered (and the suffix
    /// dropped from the destination); its raw text is kept in a hidden shadow
    /// file so later conflicts can tell re-substitution from hand edits.
    pub fn copy_file(
        &mut self,
        src: impl AsRef<Path>,
        dest: impl AsRef<Path>,
        renderer: Option<&dyn Renderer>,
        options: CopyOptions,
    ) -> Result<Outcome, MakerError> {
        let src = self.path(src);
        let mut dest = self.path(dest);
        let src_name = src
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if dest.is_dir() {
            dest = dest.join(&src_name);
        }
        if let Some(stripped) = dest
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(TEMPLATE_SUFFIX))
            .map(str::to_string)
        {
            dest.set_file_name(stripped);
        }

        let raw = fs::read_to_string(&src).map_err(io_error(&src))?;
        let is_template = src_name.ends_with(TEMPLATE_SUFFIX);
        let content = if is_template {
            let renderer = renderer.ok_or_else(|| MakerError::MissingRenderer(src.clone()))?;
            renderer
                .render(&raw, &self.display_path(&src))
                .map_err(|source| MakerError::Template {
                    path: src.clone(),
                    source,
                })?
        } else {
            raw.clone()
        };

        let shadow = shadow_path(&dest);
        let mut file_options = FileOptions {
            overwrite: false,
            executable: is_executable(&src),
        };
        let mut note = None;
        if let FileState::Different(_) = self.inspect_file(&dest, &content)? {
            let same_template = fs::read_to_string(&shadow).is_ok_and(|old_raw| old_raw == raw);
            if same_template {
                note = Some(format!(
                    "{} has different substitutions, but the same original template",
                    self.display_path(&dest)
                ));
            }
            if !self.interactive() {
                file_options.overwrite = options.overwrite;
            }
        }

        let outcome = self.ensure_file_noted(&dest, &content, file_options, note)?;
        if is_template && content != raw && outcome != Outcome::Skipped {
            self.ensure_file(
                &shadow,
                &raw,
                FileOptions {
                    overwrite: true,
                    executable: false,
                },
            )?;
        }
        Ok(outcome)
    }

    fn substitute_filename(
        &self,
        relative: &Path,
        renderer: &dyn Renderer,
    ) -> Result<PathBuf, MakerError> {
        let mut out = PathBuf::new();
        for component in relative.components() {
            let text = component.as_os_str().to_string_lossy();
            let mut unknown = None;
            let replaced = FILENAME_VAR_RE.replace_all(&text, |caps: &regex::Captures<'_>| {
                let var = caps.get(1).map_or("", |m| m.as_str());
                match var {
                    "dot" => ".".to_string(),
                    "plus" => "+".to_string(),
                    other => renderer.filename_var(other).unwrap_or_else(|| {
                        unknown = Some(other.to_string());
                        String::new()
                    }),
                }
            });
            if let Some(var) = unknown {
                return Err(MakerError::UnknownFilenameVar {
                    path: relative.to_path_buf(),
                    var,
                });
            }
            out.push(replaced.as_ref());
        }
        Ok(out)
    }

    /// Recursively copies `src` into `dest`, rendering `_tmpl` files.
    ///
    /// Hidden entries are skipped unless requested, and skipping a hidden
    /// directory skips everything beneath it. Entries are visited in name order.
    pub fn copy_dir(
        &mut self,
        src: impl AsRef<Path>,
        dest: impl AsRef<Path>,
        renderer: &dyn Renderer,
        options: CopyOptions,
    ) -> Result<Outcome, MakerError> {
        let src = self.path(src);
        let dest = self.path(dest);
        self.log.info(format!(
            "Copying {} to {}",
            self.display_path(&src),
            self.display_path(&dest)
        ));
        let _indent = self.log.indented();

        let mut outcome = self.ensure_dir(&dest)?;
        let walker = WalkDir::new(&src)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                options.include_hidden || !paths::is_hidden(&entry.file_name().to_string_lossy())
            });

        for entry in walker {
            let entry = entry?;
            let relative = entry.path().strip_prefix(&src).unwrap_or(entry.path());
            let target = dest.join(self.substitute_filename(relative, renderer)?);
            let file_type = entry.file_type();

            let step = if file_type.is_dir() {
                self.ensure_dir(&target)?
            } else if file_type.is_symlink() {
                let link = fs::read_link(entry.path()).map_err(io_error(entry.path()))?;
                self.ensure_symlink(&link, &target, options.overwrite)?
            } else {
                self.copy_file(entry.path(), &target, Some(renderer), options)?
            };
            outcome = outcome.merge(step);
        }
        Ok(outcome)
    }

    // --- Symlinks ---

    fn create_symlink(&mut self, source: &Path, dest: &Path) -> Result<(), MakerError> {
        if let Some(parent) = dest.parent() {
            self.ensure_dir(parent)?;
        }
        self.log.info(format!(
            "Symlinking {} to {}",
            self.display_path(dest),
            self.display_path(source)
        ));
        if self.simulate {
            return Ok(());
        }
        symlink(source, dest).map_err(io_error(dest))
    }

    /// Ensures `dest` is a symlink pointing at `source`.
    ///
    /// Broken links are replaced. `overwrite` only ever replaces existing
    /// symlinks; files and directories in the way are a conflict.
    pub fn ensure_symlink(
        &mut self,
        source: impl AsRef<Path>,
        dest: impl AsRef<Path>,
        overwrite: bool,
    ) -> Result<Outcome, MakerError> {
        let source = self.path(source);
        let dest = self.path(dest);
        if source == dest {
            return Err(MakerError::SelfLink(dest));
        }
        let shown = self.display_path(&dest);

        let existing = match fs::symlink_metadata(&dest) {
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(io_error(&dest)(e)),
            Ok(meta) if meta.file_type().is_symlink() => {
                let current = fs::read_link(&dest).map_err(io_error(&dest))?;
                let absolute = match dest.parent() {
                    Some(parent) if current.is_relative() => parent.join(&current),
                    _ => current.clone(),
                };
                if !dest.exists() {
                    self.log.warn(format!("Removing broken symlink {shown}"));
                    if !self.simulate {
                        fs::remove_file(&dest).map_err(io_error(&dest))?;
                    }
                    None
                } else if absolute == source
                    || dunce::canonicalize(&absolute).ok() == dunce::canonicalize(&source).ok()
                {
                    self.log.debug(format!(
                        "Symlink {shown} already points to {}",
                        self.display_path(&source)
                    ));
                    return Ok(Outcome::Unchanged);
                } else if overwrite {
                    self.log.notify(format!(
                        "Replacing symlink {shown} (was pointing to {})",
                        current.display()
                    ));
                    if !self.simulate {
                        fs::remove_file(&dest).map_err(io_error(&dest))?;
                    }
                    self.create_symlink(&source, &dest)?;
                    return Ok(Outcome::Updated);
                } else {
                    Some(ExistingEntry::Symlink(current))
                }
            }
            Ok(meta) if meta.is_dir() => Some(ExistingEntry::Directory),
            Ok(_) => Some(ExistingEntry::File),
        };

        let Some(existing) = existing else {
            self.create_symlink(&source, &dest)?;
            return Ok(Outcome::Created);
        };

        let conflict = SymlinkConflict {
            dest: dest.clone(),
            desired: source.clone(),
            existing,
        };
        self.log.warn(format!(
            "{shown} is {}, expected a symlink to {}",
            conflict.existing,
            self.display_path(&source)
        ));
        if self.simulate {
            self.log.notify(format!("Would ask what to do with {shown}"));
            return Ok(Outcome::Skipped);
        }
        match self.resolver.resolve_symlink(&conflict)? {
            SymlinkDecision::Ignore => {
                self.log.notify(format!("Leaving {shown} as it is"));
                Ok(Outcome::Skipped)
            }
            SymlinkDecision::Backup => {
                self.move_to_backup(&dest)?;
                self.create_symlink(&source, &dest)?;
                Ok(Outcome::Updated)
            }
            SymlinkDecision::Wipe => {
                self.rmtree(&dest)?;
                self.create_symlink(&source, &dest)?;
                Ok(Outcome::Updated)
            }
        }
    }

    // --- Backups and removal ---

    /// Copies a file to the first free `.bak` name, returning that name.
    pub fn backup_file(&self, path: &Path) -> Result<PathBuf, MakerError> {
        let backup = paths::backup_name(path);
        self.log.notify(format!(
            "Backing up {} to {}",
            self.display_path(path),
            self.display_path(&backup)
        ));
        if !self.simulate {
            fs::copy(path, &backup).map_err(io_error(path))?;
        }
        Ok(backup)
    }

    /// Moves a file, directory or link to the first free `.bak` name.
    pub fn move_to_backup(&self, path: &Path) -> Result<PathBuf, MakerError> {
        let backup = paths::backup_name(path);
        self.log.notify(format!(
            "Moving {} to {}",
            self.display_path(path),
            self.display_path(&backup)
        ));
        if !self.simulate {
            fs::rename(path, &backup).map_err(io_error(path))?;
        }
        Ok(backup)
    }

    /// Removes a file, link or whole directory tree.
    pub fn rmtree(&self, path: &Path) -> Result<(), MakerError> {
        let path = self.path(path);
        self.log.warn(format!("Deleting {}", self.display_path(&path)));
        if self.simulate {
            return Ok(());
        }
        let meta = match fs::symlink_metadata(&path) {
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            other => other.map_err(io_error(&path))?,
        };
        if meta.is_dir() {
            fs::remove_dir_all(&path).map_err(io_error(&path))
        } else {
            fs::remove_file(&path).map_err(io_error(&path))
        }
    }

    // --- Processes ---

    /// Runs a command. Returns `None` in simulate mode.
    pub fn run_command(&mut self, spec: &CommandSpec) -> Result<Option<CommandOutput>, MakerError> {
        let shown = spec.display();
        if self.simulate {
            self.log.notify(format!("Would run: {shown}"));
            return Ok(None);
        }
        self.log.info(format!("Running {shown}"));
        let _indent = self.log.indented();
        if let Some(cwd) = &spec.cwd {
            self.log.debug(format!("in {}", self.display_path(cwd)));
        }
        for (key, value) in &spec.env {
            self.log.debug(format!("with {key}={value}"));
        }
        for dir in &spec.extra_path {
            self.log.debug(format!("with {} prepended to PATH", dir.display()));
        }

        match executor::run(spec) {
            Ok(output) => {
                for line in output.stdout.lines() {
                    self.log.trace(line);
                }
                Ok(Some(output))
            }
            Err(e) => {
                self.log.error(format!("Error running {shown}: {e}"));
                if let Some(stdout) = e.stdout().filter(|s| !s.trim().is_empty()) {
                    self.log.error(format!("stdout:\n{}", stdout.trim_end()));
                }
                if let Some(stderr) = e.stderr().filter(|s| !s.trim().is_empty()) {
                    self.log.error(format!("stderr:\n{}", stderr.trim_end()));
                }
                Err(e.into())
            }
        }
    }

    /// Runs a read-only query; it runs even in simulate mode and does not log failures.
    pub fn query(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecutionError> {
        self.log.debug(format!("Querying: {}", spec.display()));
        executor::run(spec)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::conflict::{AutoPolicy, ScriptedResolver};
    use crate::core::value::Value;
    use std::collections::BTreeMap;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn maker(base: &Path) -> Maker {
        Maker::new(
            base,
            MakerOptions::default(),
            Box::new(AutoPolicy),
            LogContext::new(),
        )
    }

    fn mode(path: &Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode()
    }

    #[test]
    fn test_ensure_dir_creates_each_ancestor_once_then_is_a_noop() {
        // --- Setup ---
        let dir = tempdir().unwrap();
        let mut maker = maker(dir.path());
        maker.log().begin_section("ensure_dir");

        // --- Execute ---
        let first = maker.ensure_dir("a/b/c").unwrap();

        // --- Assert ---
        assert_eq!(first, Outcome::Created);
        assert!(dir.path().join("a/b/c").is_dir());
        let creating: Vec<String> = maker
            .log()
            .section_lines()
            .into_iter()
            .filter(|l| l.contains("Creating"))
            .collect();
        assert_eq!(creating.len(), 3);

        maker.log().begin_section("again");
        assert_eq!(maker.ensure_dir("a/b/c").unwrap(), Outcome::Unchanged);
        assert!(
            !maker
                .log()
                .section_lines()
                .iter()
                .any(|l| l.contains("Creating"))
        );
    }

    #[test]
    fn test_ensure_file_then_flip_executable_without_rewrite() {
        let dir = tempdir().unwrap();
        let mut maker = maker(dir.path());
        let path = dir.path().join("f.txt");

        assert_eq!(
            maker.ensure_file("f.txt", "hello", FileOptions::default()).unwrap(),
            Outcome::Created
        );
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
        assert_eq!(mode(&path) & 0o111, 0);

        let executable = FileOptions {
            executable: true,
            ..FileOptions::default()
        };
        assert_eq!(
            maker.ensure_file("f.txt", "hello", executable).unwrap(),
            Outcome::Updated
        );
        assert_ne!(mode(&path) & 0o111, 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");

        assert_eq!(
            maker.ensure_file("f.txt", "hello", executable).unwrap(),
            Outcome::Unchanged
        );
    }

    #[test]
    fn test_unattended_conflict_leaves_file_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.conf");
        fs::write(&path, "hand edited\n").unwrap();
        let mut maker = maker(dir.path());

        let outcome = maker
            .ensure_file(&path, "generated\n", FileOptions::default())
            .unwrap();

        assert_eq!(outcome, Outcome::Skipped);
        assert_eq!(fs::read_to_string(&path).unwrap(), "hand edited\n");
    }

    #[test]
    fn test_overwrite_replaces_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.conf");
        fs::write(&path, "old\n").unwrap();
        let mut maker = maker(dir.path());

        let options = FileOptions {
            overwrite: true,
            ..FileOptions::default()
        };
        assert_eq!(
            maker.ensure_file(&path, "new\n", options).unwrap(),
            Outcome::Updated
        );
        assert_eq!(fs::read_to_string(&path).unwrap(), "new\n");
    }

    #[test]
    fn test_interactive_backup_keeps_old_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.conf");
        fs::write(&path, "old\n").unwrap();
        fs::write(dir.path().join("app.conf.bak"), "older\n").unwrap();

        let mut resolver = ScriptedResolver::default();
        resolver.files.push_back(FileDecision::Backup);
        let mut maker = Maker::new(
            dir.path(),
            MakerOptions::default(),
            Box::new(resolver),
            LogContext::new(),
        );

        maker
            .ensure_file(&path, "new\n", FileOptions::default())
            .unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new\n");
        assert_eq!(
            fs::read_to_string(dir.path().join("app.conf.bak1")).unwrap(),
            "old\n"
        );
    }

    #[test]
    fn test_simulate_writes_nothing() {
        let dir = tempdir().unwrap();
        let mut maker = Maker::new(
            dir.path(),
            MakerOptions {
                simulate: true,
                quick: false,
            },
            Box::new(AutoPolicy),
            LogContext::new(),
        );

        assert_eq!(
            maker
                .ensure_file("new/dir/f.txt", "x", FileOptions::default())
                .unwrap(),
            Outcome::Created
        );
        assert!(!dir.path().join("new").exists());
        assert!(
            maker
                .run_command(&CommandSpec::new(["false"]))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_symlink_created_once_and_conflicts_fail_unattended() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("target")).unwrap();
        let mut maker = maker(dir.path());

        assert_eq!(
            maker.ensure_symlink("target", "link", false).unwrap(),
            Outcome::Created
        );
        assert_eq!(
            maker.ensure_symlink("target", "link", false).unwrap(),
            Outcome::Unchanged
        );

        fs::create_dir(dir.path().join("occupied")).unwrap();
        let err = maker.ensure_symlink("target", "occupied", true).unwrap_err();
        assert!(matches!(err, MakerError::Conflict(ConflictError::Unresolved(_))));
    }

    #[test]
    fn test_broken_and_stale_symlinks_are_replaced() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("v1")).unwrap();
        fs::create_dir(dir.path().join("v2")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone"), dir.path().join("broken")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("v1"), dir.path().join("current")).unwrap();
        let mut maker = maker(dir.path());

        assert_eq!(
            maker.ensure_symlink("v2", "broken", false).unwrap(),
            Outcome::Created
        );
        assert_eq!(
            maker.ensure_symlink("v2", "current", true).unwrap(),
            Outcome::Updated
        );
        assert_eq!(
            fs::read_link(dir.path().join("current")).unwrap(),
            dir.path().join("v2")
        );
    }

    #[test]
    fn test_symlink_wipe_decision_replaces_directory() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("target")).unwrap();
        fs::create_dir(dir.path().join("occupied")).unwrap();
        let mut resolver = ScriptedResolver::default();
        resolver.symlinks.push_back(SymlinkDecision::Wipe);
        let mut maker = Maker::new(
            dir.path(),
            MakerOptions::default(),
            Box::new(resolver),
            LogContext::new(),
        );

        maker.ensure_symlink("target", "occupied", false).unwrap();

        assert!(
            fs::symlink_metadata(dir.path().join("occupied"))
                .unwrap()
                .file_type()
                .is_symlink()
        );
    }

    #[test]
    fn test_copy_dir_renders_templates_and_keeps_shadow() {
        // --- Setup ---
        let dir = tempdir().unwrap();
        let src = dir.path().join("skel");
        fs::create_dir_all(src.join(".git")).unwrap();
        fs::create_dir_all(src.join("conf")).unwrap();
        fs::write(src.join("greeting_tmpl"), "Hi {{name}}").unwrap();
        fs::write(src.join("plain.txt"), "as is").unwrap();
        fs::write(src.join(".hidden"), "secret").unwrap();
        fs::write(src.join(".git").join("config"), "[core]").unwrap();
        fs::write(src.join("conf").join("+dot+profile"), "export X=1").unwrap();
        fs::write(src.join("conf").join("+name+.cfg"), "per user").unwrap();

        let mut vars = BTreeMap::new();
        vars.insert("name".to_string(), Value::from("Bob"));
        let scope = MapScope::new(&vars);
        let mut maker = maker(dir.path());
        let dest = dir.path().join("out");

        // --- Execute ---
        let first = maker
            .copy_dir(&src, &dest, &scope, CopyOptions::default())
            .unwrap();

        // --- Assert ---
        assert_eq!(first, Outcome::Created);
        assert_eq!(fs::read_to_string(dest.join("greeting")).unwrap(), "Hi Bob");
        assert_eq!(
            fs::read_to_string(dest.join(".greeting.orig")).unwrap(),
            "Hi {{name}}"
        );
        assert_eq!(fs::read_to_string(dest.join("plain.txt")).unwrap(), "as is");
        assert!(dest.join("conf").join(".profile").is_file());
        assert!(dest.join("conf").join("Bob.cfg").is_file());
        assert!(!dest.join(".hidden").exists());
        assert!(!dest.join(".git").exists());
        assert!(!dest.join("greeting_tmpl").exists());

        let second = maker
            .copy_dir(&src, &dest, &scope, CopyOptions::default())
            .unwrap();
        assert_eq!(second, Outcome::Unchanged);
    }

    #[test]
    fn test_copy_file_notes_resubstitution_conflicts() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("motd_tmpl");
        fs::write(&src, "Welcome {{name}}").unwrap();
        let mut vars = BTreeMap::new();
        vars.insert("name".to_string(), Value::from("Ann"));
        let mut maker = maker(dir.path());
        maker
            .copy_file(&src, "etc", Some(&MapScope::new(&vars)), CopyOptions::default())
            .unwrap();
        // `etc` did not exist as a directory, so it is the destination file itself.
        assert_eq!(fs::read_to_string(dir.path().join("etc")).unwrap(), "Welcome Ann");

        vars.insert("name".to_string(), Value::from("Bea"));
        let overwrite = CopyOptions {
            overwrite: true,
            ..CopyOptions::default()
        };
        maker
            .copy_file(&src, "etc", Some(&MapScope::new(&vars)), overwrite)
            .unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("etc")).unwrap(), "Welcome Bea");
    }

    #[test]
    fn test_unknown_filename_variable_is_an_error() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("skel");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("+missing+.txt"), "").unwrap();
        let vars = BTreeMap::new();
        let mut maker = maker(dir.path());

        let err = maker
            .copy_dir(&src, "out", &MapScope::new(&vars), CopyOptions::default())
            .unwrap_err();
        assert!(matches!(err, MakerError::UnknownFilenameVar { var, .. } if var == "missing"));
    }

    #[test]
    fn test_run_command_reports_failures_with_captures() {
        let dir = tempdir().unwrap();
        let mut maker = maker(dir.path());
        let out = maker
            .run_command(&CommandSpec::new(["sh", "-c", "echo ok"]).cwd(dir.path()))
            .unwrap()
            .unwrap();
        assert_eq!(out.stdout, "ok\n");

        let err = maker
            .run_command(&CommandSpec::new(["sh", "-c", "echo bad >&2; exit 4"]))
            .unwrap_err();
        match err {
            MakerError::Command(ExecutionError::NonZeroExitStatus { code, stderr, .. }) => {
                assert_eq!(code, Some(4));
                assert_eq!(stderr, "bad\n");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
