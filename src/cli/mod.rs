//! CLI module for the cluster deployer.
//!
//! This module provides the command-line interface for running,
//! validating and listing cluster plans.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, SelectArgs};
pub use output::OutputFormatter;
