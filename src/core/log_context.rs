//! # Log Context
//!
//! Indentation and per-task section grouping carried as an explicit value
//! through the maker, tasks and projects instead of living in a global logger.
//! Messages still go through the `log` facade; the context only adds the
//! indentation prefix and remembers the lines of the current section so they
//! can be shown again when a task fails.

use colored::Colorize;
use scopeguard::ScopeGuard;
use std::cell::{Cell, RefCell};
use std::fmt::Display;
use std::rc::Rc;

const INDENT: &str = "  ";

/// Restores the previous indentation level when dropped.
pub type IndentGuard = ScopeGuard<Rc<Cell<usize>>, fn(Rc<Cell<usize>>)>;

/// Cheap to clone; clones share the same indentation and section.
#[derive(Debug, Clone, Default)]
pub struct LogContext {
    indent: Rc<Cell<usize>>,
    section: Rc<RefCell<Section>>,
}

#[derive(Debug, Default)]
struct Section {
    title: String,
    lines: Vec<String>,
}

impl LogContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indents every message until the returned guard is dropped.
    pub fn indented(&self) -> IndentGuard {
        self.indent.set(self.indent.get() + 1);
        let restore: fn(Rc<Cell<usize>>) = |level| level.set(level.get().saturating_sub(1));
        scopeguard::guard(Rc::clone(&self.indent), restore)
    }

    pub fn level(&self) -> usize {
        self.indent.get()
    }

    /// Starts a new section; lines logged from now on are collected under `title`.
    pub fn begin_section(&self, title: impl Into<String>) {
        let mut section = self.section.borrow_mut();
        section.title = title.into();
        section.lines.clear();
    }

    pub fn section_title(&self) -> String {
        self.section.borrow().title.clone()
    }

    /// Lines logged since the current section began.
    pub fn section_lines(&self) -> Vec<String> {
        self.section.borrow().lines.clone()
    }

    fn prefixed(&self, message: &dyn Display) -> String {
        let pad = INDENT.repeat(self.indent.get());
        let text = message.to_string();
        text.lines()
            .map(|line| format!("{pad}{line}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn record(&self, level: &str, text: &str) {
        self.section
            .borrow_mut()
            .lines
            .push(format!("{level:<5} {text}"));
    }

    pub fn trace(&self, message: impl Display) {
        log::trace!("{}", self.prefixed(&message));
    }

    pub fn debug(&self, message: impl Display) {
        let text = self.prefixed(&message);
        self.record("DEBUG", &text);
        log::debug!("{text}");
    }

    pub fn info(&self, message: impl Display) {
        let text = self.prefixed(&message);
        self.record("INFO", &text);
        log::info!("{text}");
    }

    /// A notable step, highlighted for the user.
    pub fn notify(&self, message: impl Display) {
        let text = self.prefixed(&message);
        self.record("INFO", &text);
        log::info!("{}", text.bold());
    }

    pub fn warn(&self, message: impl Display) {
        let text = self.prefixed(&message);
        self.record("WARN", &text);
        log::warn!("{text}");
    }

    pub fn error(&self, message: impl Display) {
        let text = self.prefixed(&message);
        self.record("ERROR", &text);
        log::error!("{text}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indentation_is_restored_when_guard_drops() {
        let log = LogContext::new();
        assert_eq!(log.level(), 0);
        {
            let _outer = log.indented();
            let _inner = log.indented();
            assert_eq!(log.level(), 2);
        }
        assert_eq!(log.level(), 0);
    }

    #[test]
    fn test_section_collects_indented_lines() {
        let log = LogContext::new();
        log.info("before");
        log.begin_section("Task 1");
        {
            let _guard = log.indented();
            log.warn("careful");
        }
        assert_eq!(log.section_title(), "Task 1");
        assert_eq!(log.section_lines(), vec!["WARN    careful".to_string()]);
    }

    #[test]
    fn test_clones_share_state() {
        let log = LogContext::new();
        let clone = log.clone();
        let _guard = log.indented();
        assert_eq!(clone.level(), 1);
    }
}
