//! # Config Store
//!
//! Layered INI configuration with per-option provenance.
//!
//! Every `(section, option)` pair remembers where its current value came from
//! (a file, the command line, or nowhere in particular). Persisting the store
//! only writes the entries whose source is in an allowed set, so values that
//! were read from a shared defaults file are never copied into the build-local
//! file.

use crate::constants::{CMDLINE_SOURCE, DEFAULT_SECTION};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while reading or persisting configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A file that was explicitly requested does not exist.
    #[error("Configuration file '{0}' does not exist")]
    Missing(PathBuf),
    /// Reading or writing a configuration file failed.
    #[error("I/O error on configuration file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The INI text could not be parsed.
    #[error("{origin}:{line}: {message}")]
    Parse {
        origin: String,
        line: usize,
        message: String,
    },
    /// The atomically written temp file could not replace the target.
    #[error("Could not replace '{path}': {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: tempfile::PersistError,
    },
}

/// Where a configuration value was last set from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Source {
    /// Read from (or destined for) the given file.
    File(PathBuf),
    /// Given as a `VAR=VALUE` argument.
    CommandLine,
    /// Computed at runtime (setting defaults, inherited values).
    Unset,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::CommandLine => f.write_str(CMDLINE_SOURCE),
            Self::Unset => f.write_str("<unset>"),
        }
    }
}

/// A stored value and its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub value: String,
    pub source: Source,
}

/// The layered configuration store.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    sections: BTreeMap<String, BTreeMap<String, Entry>>,
}

/// Option names are case-insensitive, section names are not.
fn normalize_option(option: &str) -> String {
    option.trim().to_lowercase()
}

/// Whether a command-line `DEFAULT` value hides the section entry `local`.
fn overridden_by(local: &Entry, default: Option<&Entry>) -> bool {
    local.source != Source::CommandLine
        && default.is_some_and(|d| d.source == Source::CommandLine)
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Loading ---

    /// Reads each existing file in order; later files override earlier ones.
    /// Absent files are skipped. Returns the files that were actually read.
    pub fn load<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<Vec<PathBuf>, ConfigError> {
        let mut read = Vec::new();
        for path in paths {
            let path = path.as_ref();
            if !path.is_file() {
                log::debug!("Skipping absent configuration file {}", path.display());
                continue;
            }
            self.read_file(path)?;
            read.push(path.to_path_buf());
        }
        Ok(read)
    }

    /// Reads a file that must exist.
    pub fn read_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("Reading configuration from {}", path.display());
        self.read_str(&text, Source::File(path.to_path_buf()))
    }

    /// Parses INI text, recording `source` as the provenance of every value.
    pub fn read_str(&mut self, text: &str, source: Source) -> Result<(), ConfigError> {
        let origin = source.to_string();
        let mut section: Option<String> = None;
        let mut last_option: Option<String> = None;
        // Blank lines inside a value only count once a continuation follows.
        let mut blank_lines = 0usize;

        for (index, raw_line) in text.lines().enumerate() {
            let line_no = index + 1;
            let trimmed = raw_line.trim();

            if trimmed.is_empty() {
                if last_option.is_some() {
                    blank_lines += 1;
                }
                continue;
            }
            if trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            // Continuation of the previous value.
            if raw_line.starts_with([' ', '\t']) {
                if let (Some(sec), Some(opt)) = (&section, &last_option) {
                    if let Some(entry) = self
                        .sections
                        .get_mut(sec)
                        .and_then(|options| options.get_mut(opt))
                    {
                        entry.value.push_str(&"\n".repeat(blank_lines + 1));
                        entry.value.push_str(trimmed);
                        blank_lines = 0;
                        continue;
                    }
                }
                return Err(ConfigError::Parse {
                    origin,
                    line: line_no,
                    message: "continuation line without a preceding option".to_string(),
                });
            }

            blank_lines = 0;
            if let Some(header) = trimmed.strip_prefix('[') {
                let name = header.strip_suffix(']').ok_or_else(|| ConfigError::Parse {
                    origin: origin.clone(),
                    line: line_no,
                    message: format!("unterminated section header: {trimmed}"),
                })?;
                let name = name.trim().to_string();
                self.sections.entry(name.clone()).or_default();
                section = Some(name);
                last_option = None;
                continue;
            }

            let Some(sec) = &section else {
                return Err(ConfigError::Parse {
                    origin,
                    line: line_no,
                    message: "option found before any [section] header".to_string(),
                });
            };

            let split_at = trimmed.find(['=', ':']).ok_or_else(|| ConfigError::Parse {
                origin: origin.clone(),
                line: line_no,
                message: format!("expected 'name = value', found: {trimmed}"),
            })?;
            let (name, rest) = trimmed.split_at(split_at);
            let option = normalize_option(name);
            if option.is_empty() {
                return Err(ConfigError::Parse {
                    origin,
                    line: line_no,
                    message: "empty option name".to_string(),
                });
            }
            let value = rest.get(1..).unwrap_or_default().trim().to_string();
            self.set(sec, &option, &value, source.clone());
            last_option = Some(option);
        }
        Ok(())
    }

    // --- Access ---

    /// Returns the raw value, falling back to the `DEFAULT` section.
    pub fn get(&self, section: &str, option: &str) -> Option<&str> {
        self.entry(section, option).map(|entry| entry.value.as_str())
    }

    /// Like [`ConfigStore::get`], with a fallback value.
    pub fn get_or(&self, section: &str, option: &str, default: &str) -> String {
        self.get(section, option).unwrap_or(default).to_string()
    }

    /// The stored entry, falling back to the `DEFAULT` section. A `DEFAULT`
    /// value given on the command line wins over section values that were not.
    pub fn entry(&self, section: &str, option: &str) -> Option<&Entry> {
        let option = normalize_option(option);
        let default = self.local_entry(DEFAULT_SECTION, &option);
        match self.local_entry(section, &option) {
            Some(local) if !overridden_by(local, default) => Some(local),
            _ => default,
        }
    }

    /// The entry stored directly in `section`, without `DEFAULT` fallback.
    pub fn local_entry(&self, section: &str, option: &str) -> Option<&Entry> {
        self.sections
            .get(section)
            .and_then(|options| options.get(&normalize_option(option)))
    }

    /// Provenance of the value visible at `(section, option)`.
    pub fn source(&self, section: &str, option: &str) -> Option<&Source> {
        self.entry(section, option).map(|entry| &entry.source)
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.sections.contains_key(section)
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// All options visible in `section`, `DEFAULT` values included.
    pub fn items(&self, section: &str) -> BTreeMap<String, String> {
        let mut items: BTreeMap<String, String> = self
            .sections
            .get(DEFAULT_SECTION)
            .map(|options| {
                options
                    .iter()
                    .map(|(k, e)| (k.clone(), e.value.clone()))
                    .collect()
            })
            .unwrap_or_default();
        if let Some(options) = self.sections.get(section) {
            for (name, entry) in options {
                if !overridden_by(entry, self.local_entry(DEFAULT_SECTION, name)) {
                    items.insert(name.clone(), entry.value.clone());
                }
            }
        }
        items
    }

    // --- Mutation ---

    /// Overwrites the value and its provenance.
    pub fn set(&mut self, section: &str, option: &str, value: &str, source: Source) {
        log::trace!("config [{section}] {option} = {value:?} (from {source})");
        self.sections.entry(section.to_string()).or_default().insert(
            normalize_option(option),
            Entry {
                value: value.to_string(),
                source,
            },
        );
    }

    /// Stores a command-line assignment. An unsectioned (`DEFAULT`) one also
    /// drops the values of other sections it would otherwise be shadowed by,
    /// so the override is what gets persisted.
    pub fn set_override(&mut self, section: &str, option: &str, value: &str) {
        if section == DEFAULT_SECTION {
            let option = normalize_option(option);
            for (name, options) in &mut self.sections {
                let shadowing = name.as_str() != DEFAULT_SECTION
                    && options
                        .get(&option)
                        .is_some_and(|entry| entry.source != Source::CommandLine);
                if shadowing {
                    log::debug!("Command line value for '{option}' replaces [{name}] {option}");
                    options.remove(&option);
                }
            }
        }
        self.set(section, option, value, Source::CommandLine);
    }

    pub fn remove(&mut self, section: &str, option: &str) -> Option<Entry> {
        self.sections
            .get_mut(section)
            .and_then(|options| options.remove(&normalize_option(option)))
    }

    /// Copies every entry of `other` over this store, keeping `other`'s provenance.
    pub fn merge(&mut self, other: &Self) {
        for (section, options) in &other.sections {
            let target = self.sections.entry(section.clone()).or_default();
            for (name, entry) in options {
                target.insert(name.clone(), entry.clone());
            }
        }
    }

    // --- Persistence ---

    /// Renders the entries whose source is in `only_sources` as INI text.
    /// Returns `None` when no entry qualifies.
    pub fn to_ini_string(&self, only_sources: &[Source]) -> Option<String> {
        let mut out = String::new();
        let mut written = 0usize;

        // DEFAULT goes first, the way readers expect it.
        let ordered = self
            .sections
            .iter()
            .filter(|(name, _)| name.as_str() == DEFAULT_SECTION)
            .chain(
                self.sections
                    .iter()
                    .filter(|(name, _)| name.as_str() != DEFAULT_SECTION),
            );

        for (section, options) in ordered {
            let selected: Vec<_> = options
                .iter()
                .filter(|(_, entry)| only_sources.contains(&entry.source))
                .collect();
            if selected.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!("[{section}]\n"));
            for (name, entry) in selected {
                let mut lines = entry.value.lines();
                out.push_str(&format!("{} = {}\n", name, lines.next().unwrap_or_default()));
                for continuation in lines {
                    if continuation.trim().is_empty() {
                        out.push('\n');
                    } else {
                        out.push_str(&format!("    {continuation}\n"));
                    }
                }
                written += 1;
            }
        }

        (written > 0).then_some(out)
    }

    /// Writes the entries whose source is in `only_sources` to `path`.
    ///
    /// When nothing qualifies and `path` already exists the file is left alone,
    /// so an empty store never clobbers persisted state. Returns whether the
    /// file was written.
    pub fn save(&self, path: &Path, only_sources: &[Source]) -> Result<bool, ConfigError> {
        let content = match self.to_ini_string(only_sources) {
            Some(content) => content,
            None if path.exists() => {
                log::debug!("Nothing to save; leaving {} untouched", path.display());
                return Ok(false);
            }
            None => String::new(),
        };

        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let dir = dir.unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(io_err)?;

        let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        temp.write_all(content.as_bytes()).map_err(io_err)?;
        temp.persist(path).map_err(|source| ConfigError::Persist {
            path: path.to_path_buf(),
            source,
        })?;

        log::debug!("Saved configuration to {}", path.display());
        Ok(true)
    }

    /// The sources persisted into the build-local file at `path`.
    pub fn local_sources(path: &Path) -> [Source; 3] {
        [
            Source::File(path.to_path_buf()),
            Source::CommandLine,
            Source::Unset,
        ]
    }
}
