// src/cli/args.rs

use crate::constants::DEFAULT_SECTION;
use crate::core::config_store::ConfigStore;
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

lazy_static! {
    // `[section]option=value`
    static ref BRACKETED_RE: Regex =
        Regex::new(r"^\[([A-Za-z0-9_.-]+)\]([A-Za-z_][A-Za-z0-9_-]*)=(.*)$").unwrap();
    // `section.option=value`
    static ref DOTTED_RE: Regex =
        Regex::new(r"^([A-Za-z0-9_-]+)\.([A-Za-z_][A-Za-z0-9_-]*)=(.*)$").unwrap();
    // `option=value`
    static ref PLAIN_RE: Regex = Regex::new(r"^([A-Za-z_][A-Za-z0-9_-]*)=(.*)$").unwrap();
    static ref PROJECT_RE: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").unwrap();
}

/// Errors in how the command line was written. They exit with a distinct code.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum UsageError {
    #[error("'{0}' looks like a typo of --base (use --base=DIR or -b DIR)")]
    BaseTypo(String),
    #[error("Bad setting assignment '{0}' (expected VAR=VALUE, section.VAR=VALUE or [section]VAR=VALUE)")]
    BadAssignment(String),
    #[error("'{0}' is neither a project name nor a VAR=VALUE assignment")]
    BadArgument(String),
    #[error("No projects given (try --list-projects)")]
    NoProjects,
}

/// A configuration value given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub section: String,
    pub option: String,
    pub value: String,
}

/// The positional arguments: project names and setting assignments, in any order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionalArgs {
    pub projects: Vec<String>,
    pub assignments: Vec<Assignment>,
}

impl PositionalArgs {
    pub fn parse(args: &[String]) -> Result<Self, UsageError> {
        let mut parsed = Self::default();
        for arg in args {
            if arg.contains('=') {
                parsed.assignments.push(parse_assignment(arg)?);
            } else if PROJECT_RE.is_match(arg) {
                parsed.projects.push(arg.clone());
            } else {
                return Err(UsageError::BadArgument(arg.clone()));
            }
        }
        Ok(parsed)
    }

    /// Stores every assignment with command-line provenance.
    pub fn apply(&self, store: &mut ConfigStore) {
        for a in &self.assignments {
            log::debug!("Command line sets [{}] {} = {:?}", a.section, a.option, a.value);
            store.set_override(&a.section, &a.option, &a.value);
        }
    }
}

pub fn parse_assignment(arg: &str) -> Result<Assignment, UsageError> {
    let assignment = |section: &str, option: &str, value: &str| Assignment {
        section: section.to_string(),
        option: option.to_string(),
        value: value.to_string(),
    };
    if let Some(caps) = BRACKETED_RE.captures(arg) {
        return Ok(assignment(&caps[1], &caps[2], &caps[3]));
    }
    if let Some(caps) = DOTTED_RE.captures(arg) {
        return Ok(assignment(&caps[1], &caps[2], &caps[3]));
    }
    if let Some(caps) = PLAIN_RE.captures(arg) {
        return Ok(assignment(DEFAULT_SECTION, &caps[1], &caps[2]));
    }
    Err(UsageError::BadAssignment(arg.to_string()))
}

/// `-base DIR` is read as `-b ase`; catch it before `ase` becomes a directory.
pub fn check_base_typo(base: Option<&str>) -> Result<(), UsageError> {
    match base {
        Some(value) if value == "ase" || value.starts_with("ase=") => {
            Err(UsageError::BaseTypo(format!("-b{value}")))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config_store::Source;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_projects_and_assignments_mix() {
        let parsed = PositionalArgs::parse(&args(&[
            "base",
            "port=8080",
            "web.host=example.org",
            "[db]user=admin",
            "supervisor",
        ]))
        .unwrap();

        assert_eq!(parsed.projects, vec!["base", "supervisor"]);
        assert_eq!(
            parsed.assignments,
            vec![
                Assignment {
                    section: "DEFAULT".into(),
                    option: "port".into(),
                    value: "8080".into()
                },
                Assignment {
                    section: "web".into(),
                    option: "host".into(),
                    value: "example.org".into()
                },
                Assignment {
                    section: "db".into(),
                    option: "user".into(),
                    value: "admin".into()
                },
            ]
        );
    }

    #[test]
    fn test_values_may_contain_equals_and_templates() {
        let a = parse_assignment("url={{env.hostname}}/?a=b").unwrap();
        assert_eq!(a.option, "url");
        assert_eq!(a.value, "{{env.hostname}}/?a=b");
    }

    #[test]
    fn test_bad_arguments_are_usage_errors() {
        assert_eq!(
            parse_assignment("=oops"),
            Err(UsageError::BadAssignment("=oops".into()))
        );
        assert!(matches!(
            PositionalArgs::parse(&args(&["../etc"])),
            Err(UsageError::BadArgument(_))
        ));
    }

    #[test]
    fn test_base_typo_is_caught() {
        assert!(check_base_typo(Some("ase")).is_err());
        assert!(check_base_typo(Some("ase=/srv")).is_err());
        assert!(check_base_typo(Some("/srv/site")).is_ok());
        assert!(check_base_typo(None).is_ok());
    }

    #[test]
    fn test_assignments_win_with_cmdline_source() {
        let mut store = ConfigStore::new();
        store.set("DEFAULT", "x", "1", Source::Unset);
        let parsed = PositionalArgs::parse(&args(&["x=2"])).unwrap();
        parsed.apply(&mut store);
        assert_eq!(store.get("app", "x"), Some("2"));
        assert_eq!(store.source("app", "x"), Some(&Source::CommandLine));
    }

    #[test]
    fn test_unsectioned_assignment_replaces_saved_project_value() {
        let mut store = ConfigStore::new();
        store.set("greeting", "x", "1", Source::File("etc/build.ini".into()));
        PositionalArgs::parse(&args(&["greeting", "x=2"]))
            .unwrap()
            .apply(&mut store);
        assert_eq!(store.get("greeting", "x"), Some("2"));
        assert_eq!(store.local_entry("greeting", "x"), None);
    }
}
