//! # fassembler
//!
//! Assembles a site build out of projects. Each project is a named, ordered
//! list of tasks (ensure a directory, write a file from a template, check out
//! a repository, run a script, ...) whose attributes are templates over a
//! layered, provenance-tracking configuration store.
//!
//! - **`core`**: the configuration store, the template language, tasks,
//!   projects and the filesystem maker that performs every change.
//! - **`system`**: external processes and tool lookup.
//! - **`cli`**: argument parsing, interactive prompts and handlers.

pub mod cli;
pub mod constants;
pub mod core;
pub mod models;
pub mod system;
