// src/constants.rs

/// The directory (inside the base path) holding persisted build configuration.
pub const ETC_DIR: &str = "etc";

/// The directory (inside the base path) holding runtime state of installed projects.
pub const VAR_DIR: &str = "var";

/// The build-local configuration file (inside `etc/`).
pub const BUILD_INI: &str = "build.ini";

/// The per-build state file listing completed projects (inside `etc/`).
pub const PROJECTS_FILE: &str = "projects.txt";

/// The list of projects the `all` pseudo-project expands to (relative to the base path).
pub const ALL_PROJECTS_FILE: &str = "requirements/all-projects.txt";

/// The directory (inside the base path) scanned for project definition files.
pub const PROJECTS_DIR: &str = "projects";

/// Extension of project definition files.
pub const PROJECT_FILE_EXTENSION: &str = "toml";

/// The name of the user-level configuration directory (in the system config dir).
pub const APP_CONFIG_DIRNAME: &str = "fassembler";

/// The name of the global defaults file, looked up in the user config dir.
pub const DEFAULTS_FILENAME: &str = "defaults.ini";

/// Provenance label for values given on the command line.
pub const CMDLINE_SOURCE: &str = "<cmdline>";

/// The section supplying fallback values for all other sections.
pub const DEFAULT_SECTION: &str = "DEFAULT";

/// The section holding settings shared by every project.
pub const GENERAL_SECTION: &str = "general";

/// Source files ending with this suffix are rendered as templates when copied.
pub const TEMPLATE_SUFFIX: &str = "_tmpl";

/// Suffix of the hidden shadow file that keeps the raw template next to its rendering.
pub const SHADOW_SUFFIX: &str = ".orig";

/// Upper bound for nested template expansion.
pub const MAX_RECURSION_DEPTH: usize = 32;
