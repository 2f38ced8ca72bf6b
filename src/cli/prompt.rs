// src/cli/prompt.rs

use crate::core::conflict::{
    CheckoutConflict, CheckoutDecision, ConflictError, ConflictResolver, FailureDecision,
    FileConflict, FileDecision, SymlinkConflict, SymlinkDecision, TaskFailure, TemplateDecision,
    TemplateFailure,
};
use colored::Colorize;
use dialoguer::{Select, theme::ColorfulTheme};
use std::io::ErrorKind;

const QUIT: &str = "Quit (abort the whole run)";

/// Asks the user on the terminal. "... all" answers are remembered and reused
/// for every later conflict of the same kind.
#[derive(Debug, Default)]
pub struct InteractivePrompter {
    file_all: Option<FileDecision>,
    symlink_all: Option<SymlinkDecision>,
    checkout_all: Option<CheckoutDecision>,
}

impl InteractivePrompter {
    pub fn new() -> Self {
        Self::default()
    }
}

fn prompt_error(err: dialoguer::Error) -> ConflictError {
    match err {
        dialoguer::Error::IO(e) if e.kind() == ErrorKind::Interrupted => ConflictError::Interrupted,
        other => ConflictError::Prompt(other.to_string()),
    }
}

/// Shows a menu; Esc and the quit entry abort the run.
fn choose(prompt: &str, items: &[&str]) -> Result<usize, ConflictError> {
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .items(items)
        .default(0)
        .interact_opt()
        .map_err(prompt_error)?;
    match selection {
        Some(index) if items.get(index) != Some(&QUIT) => Ok(index),
        _ => Err(ConflictError::Aborted),
    }
}

impl ConflictResolver for InteractivePrompter {
    fn is_interactive(&self) -> bool {
        true
    }

    fn resolve_file(&mut self, conflict: &FileConflict) -> Result<FileDecision, ConflictError> {
        if let Some(decision) = self.file_all {
            return Ok(decision);
        }
        let shown = conflict.path.display().to_string();
        let diff = conflict.diff();
        eprintln!(
            "\n{} {} has changed ({})",
            "Conflict:".yellow().bold(),
            shown.cyan(),
            diff.summary()
        );
        if let Some(note) = &conflict.note {
            eprintln!("  {}", note.dimmed());
        }

        let items = [
            "Overwrite",
            "Skip (keep the existing file)",
            "Show diff",
            "Show context diff",
            "Back up, then overwrite",
            "Overwrite all",
            "Skip all",
            "Back up all",
            QUIT,
        ];
        loop {
            let decision = match choose("Overwrite the existing file?", &items)? {
                0 => FileDecision::Overwrite,
                1 => FileDecision::Skip,
                2 => {
                    eprintln!("{}", diff.unified(&shown, "new content", 3));
                    continue;
                }
                3 => {
                    eprintln!("{}", diff.context(&shown, "new content", 3));
                    continue;
                }
                4 => FileDecision::Backup,
                5 => *self.file_all.insert(FileDecision::Overwrite),
                6 => *self.file_all.insert(FileDecision::Skip),
                _ => *self.file_all.insert(FileDecision::Backup),
            };
            return Ok(decision);
        }
    }

    fn resolve_symlink(
        &mut self,
        conflict: &SymlinkConflict,
    ) -> Result<SymlinkDecision, ConflictError> {
        if let Some(decision) = self.symlink_all {
            return Ok(decision);
        }
        eprintln!(
            "\n{} {} should link to {} but is {}",
            "Conflict:".yellow().bold(),
            conflict.dest.display().to_string().cyan(),
            conflict.desired.display(),
            conflict.existing
        );
        let items = [
            "Ignore (leave it as it is)",
            "Back up, then link",
            "Wipe, then link",
            "Ignore all",
            "Back up all",
            "Wipe all",
            QUIT,
        ];
        Ok(match choose("What should happen to it?", &items)? {
            0 => SymlinkDecision::Ignore,
            1 => SymlinkDecision::Backup,
            2 => SymlinkDecision::Wipe,
            3 => *self.symlink_all.insert(SymlinkDecision::Ignore),
            4 => *self.symlink_all.insert(SymlinkDecision::Backup),
            _ => *self.symlink_all.insert(SymlinkDecision::Wipe),
        })
    }

    fn resolve_checkout(
        &mut self,
        conflict: &CheckoutConflict,
    ) -> Result<CheckoutDecision, ConflictError> {
        if let Some(decision) = self.checkout_all {
            return Ok(decision);
        }
        eprintln!(
            "\n{} {} is a checkout of\n    {}\n  but should be a checkout of\n    {}",
            "Conflict:".yellow().bold(),
            conflict.dest.display().to_string().cyan(),
            conflict.current_url,
            conflict.expected_url
        );
        let items = [
            "Ignore (keep the current checkout)",
            "Switch to the new repository",
            "Back up, then check out fresh",
            "Wipe, then check out fresh",
            "Ignore all",
            "Switch all",
            QUIT,
        ];
        Ok(match choose("What should happen to the checkout?", &items)? {
            0 => CheckoutDecision::Ignore,
            1 => CheckoutDecision::Switch,
            2 => CheckoutDecision::Backup,
            3 => CheckoutDecision::Wipe,
            4 => *self.checkout_all.insert(CheckoutDecision::Ignore),
            _ => *self.checkout_all.insert(CheckoutDecision::Switch),
        })
    }

    fn resolve_failure(&mut self, failure: &TaskFailure) -> Result<FailureDecision, ConflictError> {
        eprintln!(
            "\n{} {} in {}: {}",
            "Failed:".red().bold(),
            failure.task.bold(),
            failure.project,
            failure.error
        );
        let items = [
            "Continue with the next task",
            "Show traceback",
            "View the task's log",
            QUIT,
        ];
        loop {
            match choose("What now?", &items)? {
                0 => return Ok(FailureDecision::Continue),
                1 => eprintln!("{}", failure.traceback),
                _ => {
                    for line in &failure.log_lines {
                        eprintln!("  {line}");
                    }
                }
            }
        }
    }

    fn resolve_template_error(
        &mut self,
        failure: &TemplateFailure,
    ) -> Result<TemplateDecision, ConflictError> {
        eprintln!(
            "\n{} in {}: {}",
            "Template error".red().bold(),
            failure.task,
            failure.error
        );
        let items = [
            "Retry (template files are read again)",
            "Cancel (let the task fail)",
            "Show the template source",
            "Show the namespace",
            QUIT,
        ];
        loop {
            match choose("What now?", &items)? {
                0 => return Ok(TemplateDecision::Retry),
                1 => return Ok(TemplateDecision::Cancel),
                2 => eprintln!("{}", failure.source),
                _ => eprintln!("{}", failure.namespace),
            }
        }
    }
}
