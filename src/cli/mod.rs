//! Command-line interface for volusphere.
//!
//! Provides commands for running the worker pool, creating projects, and
//! operator actions on jobs and experiences.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};
