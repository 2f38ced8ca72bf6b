//! # System Interaction Layer
//!
//! Abstractions over the underlying operating system, kept apart from the
//! build engine so the engine only deals with plain command descriptions.
//!
//! ## Modules
//!
//! - **`executor`**: spawns external processes, captures their output and turns
//!   unexpected exit codes into structured errors carrying both captures.
//! - **`tools`**: locates required executables in `PATH` and reports missing
//!   tools or unsupported platforms by name.

pub mod executor;
pub mod tools;
