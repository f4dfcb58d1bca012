//! Command-line interface for autoresearch.
//!
//! Provides commands for running research cycles, inspecting the last run
//! summary and recalling notes from earlier runs.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
