//! # Conflict Resolution
//!
//! File operations never block on the terminal themselves. When they hit a
//! conflict they describe it with one of the structures below and hand it to a
//! [`ConflictResolver`], which returns an explicit decision. The interactive
//! prompter lives in the CLI layer; [`AutoPolicy`] is the deterministic policy
//! for unattended runs and [`ScriptedResolver`] replays canned answers.

use crate::core::diff::LineDiff;
use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that end a conflict resolution without a decision.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictError {
    #[error("Aborted by user.")]
    Aborted,
    #[error("Interrupted.")]
    Interrupted,
    /// A conflict that unattended runs refuse to decide.
    #[error("{0}")]
    Unresolved(String),
    #[error("Could not prompt for an answer: {0}")]
    Prompt(String),
}

// --- Files ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileDecision {
    Overwrite,
    Skip,
    /// Copy the current file aside, then overwrite it.
    Backup,
}

/// An existing file whose content differs from the desired content.
#[derive(Debug, Clone)]
pub struct FileConflict {
    pub path: PathBuf,
    pub existing: String,
    pub proposed: String,
    /// Extra context, e.g. that only the template substitutions changed.
    pub note: Option<String>,
}

impl FileConflict {
    pub fn diff(&self) -> LineDiff<'_> {
        LineDiff::new(&self.existing, &self.proposed)
    }
}

// --- Symlinks ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymlinkDecision {
    Ignore,
    Backup,
    Wipe,
}

/// What currently occupies a symlink destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExistingEntry {
    Symlink(PathBuf),
    File,
    Directory,
}

impl fmt::Display for ExistingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Symlink(target) => write!(f, "a symlink to {}", target.display()),
            Self::File => f.write_str("a file"),
            Self::Directory => f.write_str("a directory"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SymlinkConflict {
    pub dest: PathBuf,
    pub desired: PathBuf,
    pub existing: ExistingEntry,
}

// --- Checkouts ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutDecision {
    Ignore,
    Switch,
    Backup,
    Wipe,
}

#[derive(Debug, Clone)]
pub struct CheckoutConflict {
    pub dest: PathBuf,
    pub current_url: String,
    pub expected_url: String,
}

// --- Failures ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    Continue,
    Abort,
}

/// A task (or project) that failed during an interactive run.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub project: String,
    pub task: String,
    pub error: String,
    /// The full error chain.
    pub traceback: String,
    /// Log lines of the failing task's section.
    pub log_lines: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateDecision {
    Retry,
    /// Let the task fail normally.
    Cancel,
    Abort,
}

/// A template that could not be rendered.
#[derive(Debug, Clone)]
pub struct TemplateFailure {
    pub task: String,
    pub error: String,
    pub source: String,
    pub namespace: String,
}

/// Decides conflicts on behalf of the user.
pub trait ConflictResolver: fmt::Debug {
    /// Whether decisions come from a person (and failures may be continued past).
    fn is_interactive(&self) -> bool;

    fn resolve_file(&mut self, conflict: &FileConflict) -> Result<FileDecision, ConflictError>;

    fn resolve_symlink(
        &mut self,
        conflict: &SymlinkConflict,
    ) -> Result<SymlinkDecision, ConflictError>;

    fn resolve_checkout(
        &mut self,
        conflict: &CheckoutConflict,
    ) -> Result<CheckoutDecision, ConflictError>;

    fn resolve_failure(&mut self, failure: &TaskFailure) -> Result<FailureDecision, ConflictError>;

    fn resolve_template_error(
        &mut self,
        failure: &TemplateFailure,
    ) -> Result<TemplateDecision, ConflictError>;
}

/// The unattended policy: never guess, never prompt.
///
/// Differing files are left alone, misplaced symlinks and foreign checkouts
/// are hard failures, and every task failure aborts the run.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoPolicy;

impl ConflictResolver for AutoPolicy {
    fn is_interactive(&self) -> bool {
        false
    }

    fn resolve_file(&mut self, _conflict: &FileConflict) -> Result<FileDecision, ConflictError> {
        Ok(FileDecision::Skip)
    }

    fn resolve_symlink(
        &mut self,
        conflict: &SymlinkConflict,
    ) -> Result<SymlinkDecision, ConflictError> {
        Err(ConflictError::Unresolved(format!(
            "{} is {}, expected a symlink to {}",
            conflict.dest.display(),
            conflict.existing,
            conflict.desired.display()
        )))
    }

    fn resolve_checkout(
        &mut self,
        conflict: &CheckoutConflict,
    ) -> Result<CheckoutDecision, ConflictError> {
        Err(ConflictError::Unresolved(format!(
            "The checkout at {} comes from {}, expected {}",
            conflict.dest.display(),
            conflict.current_url,
            conflict.expected_url
        )))
    }

    fn resolve_failure(&mut self, _failure: &TaskFailure) -> Result<FailureDecision, ConflictError> {
        Ok(FailureDecision::Abort)
    }

    fn resolve_template_error(
        &mut self,
        _failure: &TemplateFailure,
    ) -> Result<TemplateDecision, ConflictError> {
        Ok(TemplateDecision::Abort)
    }
}

/// Replays queued answers, recording every question it was asked.
#[derive(Debug, Default)]
pub struct ScriptedResolver {
    pub files: VecDeque<FileDecision>,
    pub symlinks: VecDeque<SymlinkDecision>,
    pub checkouts: VecDeque<CheckoutDecision>,
    pub failures: VecDeque<FailureDecision>,
    pub templates: VecDeque<TemplateDecision>,
    pub asked: Vec<String>,
}

fn next_answer<T>(queue: &mut VecDeque<T>, question: &str) -> Result<T, ConflictError> {
    queue
        .pop_front()
        .ok_or_else(|| ConflictError::Unresolved(format!("No scripted answer for: {question}")))
}

impl ConflictResolver for ScriptedResolver {
    fn is_interactive(&self) -> bool {
        true
    }

    fn resolve_file(&mut self, conflict: &FileConflict) -> Result<FileDecision, ConflictError> {
        let question = format!("file {}", conflict.path.display());
        self.asked.push(question.clone());
        next_answer(&mut self.files, &question)
    }

    fn resolve_symlink(
        &mut self,
        conflict: &SymlinkConflict,
    ) -> Result<SymlinkDecision, ConflictError> {
        let question = format!("symlink {}", conflict.dest.display());
        self.asked.push(question.clone());
        next_answer(&mut self.symlinks, &question)
    }

    fn resolve_checkout(
        &mut self,
        conflict: &CheckoutConflict,
    ) -> Result<CheckoutDecision, ConflictError> {
        let question = format!("checkout {}", conflict.dest.display());
        self.asked.push(question.clone());
        next_answer(&mut self.checkouts, &question)
    }

    fn resolve_failure(&mut self, failure: &TaskFailure) -> Result<FailureDecision, ConflictError> {
        let question = format!("failure {}", failure.task);
        self.asked.push(question.clone());
        next_answer(&mut self.failures, &question)
    }

    fn resolve_template_error(
        &mut self,
        failure: &TemplateFailure,
    ) -> Result<TemplateDecision, ConflictError> {
        let question = format!("template {}", failure.task);
        self.asked.push(question.clone());
        next_answer(&mut self.templates, &question)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_policy_refuses_destructive_decisions() {
        let mut policy = AutoPolicy;
        let conflict = SymlinkConflict {
            dest: PathBuf::from("/srv/current"),
            desired: PathBuf::from("/srv/releases/2"),
            existing: ExistingEntry::Directory,
        };
        let err = policy.resolve_symlink(&conflict).unwrap_err();
        assert!(err.to_string().contains("/srv/current is a directory"));

        let file = FileConflict {
            path: PathBuf::from("f"),
            existing: "a".into(),
            proposed: "b".into(),
            note: None,
        };
        assert_eq!(policy.resolve_file(&file).unwrap(), FileDecision::Skip);
        assert!(!policy.is_interactive());
    }

    #[test]
    fn test_scripted_resolver_replays_and_records() {
        let mut resolver = ScriptedResolver::default();
        resolver.files.push_back(FileDecision::Backup);
        let file = FileConflict {
            path: PathBuf::from("f.txt"),
            existing: "a\n".into(),
            proposed: "b\n".into(),
            note: None,
        };
        assert_eq!(resolver.resolve_file(&file).unwrap(), FileDecision::Backup);
        assert!(resolver.resolve_file(&file).is_err());
        assert_eq!(resolver.asked, vec!["file f.txt", "file f.txt"]);
    }
}
