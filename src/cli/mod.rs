//! Command-line interface for newsreel.
//!
//! Provides commands to run the pipeline on a schedule, run a single cycle
//! or stage, settle held publishes and inspect the store.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
