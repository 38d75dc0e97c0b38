//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Operation;

/// Deployer - ephemeral AKS and GKE clusters for CI.
#[derive(Parser, Debug)]
#[command(name = "deployer")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the plans file.
    #[arg(long, global = true, env = "DEPLOYER_PLANS_FILE")]
    pub plans_file: Option<PathBuf>,

    /// Path to the run configuration file.
    #[arg(long, global = true, env = "DEPLOYER_RUN_CONFIG")]
    pub run_config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Plan selection shared by the commands that resolve a plan.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct SelectArgs {
    /// Plan id (defaults to the run config's `id`).
    #[arg(long)]
    pub plan_id: Option<String>,

    /// Override the plan's operation.
    #[arg(long, value_parser = parse_operation)]
    pub operation: Option<Operation>,

    /// Override the plan's cluster name.
    #[arg(long)]
    pub cluster_name: Option<String>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create or delete the cluster described by a plan.
    Execute {
        /// Plan selection.
        #[command(flatten)]
        select: SelectArgs,
    },

    /// Resolve and validate a plan without running anything.
    Validate {
        /// Plan selection.
        #[command(flatten)]
        select: SelectArgs,
    },

    /// List the plans in the plans file.
    List,
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

fn parse_operation(value: &str) -> Result<Operation, String> {
    value.parse().map_err(|e: crate::error::ConfigError| e.to_string())
}
