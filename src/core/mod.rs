// src/core/mod.rs

pub mod compiler;
pub mod config_store;
pub mod conflict;
pub mod diff;
pub mod environment;
pub mod expr;
pub mod interpolated;
pub mod log_context;
pub mod maker;
pub mod namespace;
pub mod paths;
pub mod project;
pub mod registry;
pub mod runtime;
pub mod step;
pub mod task;
pub mod template;
pub mod value;
pub mod vcs;
