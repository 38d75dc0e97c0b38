//! Deployer CLI entrypoint.
//!
//! This is the main entrypoint for the deployer command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use cluster_deployer::cli::{Cli, Commands, OutputFormat, OutputFormatter, SelectArgs};
use cluster_deployer::config::{
    ConfigParser, ConfigValidator, PLANS_FILE_NAME, Plan, PlanSelection, RUN_CONFIG_FILE_NAME,
    find_config_file,
};
use cluster_deployer::driver::{Collaborators, registry};
use cluster_deployer::error::{ConfigError, Result};
use cluster_deployer::exec::ShellRunner;
use cluster_deployer::vault::VaultConnector;

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, matches!(cli.output, OutputFormat::Json));

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    match runtime.block_on(run(cli, &formatter)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", formatter.format_error(&e.to_string()));
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` wins over the verbosity flag. JSON output also switches the
/// log lines to JSON.
fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli, formatter: &OutputFormatter) -> Result<()> {
    match &cli.command {
        Commands::Execute { select } => cmd_execute(&cli, select, formatter).await,
        Commands::Validate { select } => cmd_validate(&cli, select, formatter),
        Commands::List => cmd_list(&cli, formatter),
    }
}

/// Resolve a plan and run it.
async fn cmd_execute(cli: &Cli, select: &SelectArgs, formatter: &OutputFormatter) -> Result<()> {
    let plan = load_plan(cli, select)?;

    let validator = ConfigValidator::new();
    let result = validator.validate(&plan)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }

    let collaborators = Collaborators::new(Arc::new(ShellRunner::new()), Arc::new(VaultConnector::new()));
    let driver = registry().create_driver(plan, &collaborators).await?;

    info!(
        "Running {} on {} cluster {}",
        driver.plan().operation,
        driver.plan().provider,
        driver.plan().cluster_name
    );
    let report = driver.run().await?;

    emit(&formatter.format_report(&report))
}

/// Resolve and validate a plan.
fn cmd_validate(cli: &Cli, select: &SelectArgs, formatter: &OutputFormatter) -> Result<()> {
    let plan = load_plan(cli, select)?;
    let result = ConfigValidator::new().check(&plan);

    emit(&formatter.format_validation(&plan, &result))?;

    if let Some(first) = result.errors.first() {
        return Err(ConfigError::validation(
            first.message.clone(),
            first.field.clone(),
        )
        .into());
    }
    Ok(())
}

/// List the plans in the plans file.
fn cmd_list(cli: &Cli, formatter: &OutputFormatter) -> Result<()> {
    let plans_path = resolve_plans_path(cli.plans_file.as_ref())?;
    let plans = ConfigParser::new().load_plans(&plans_path)?;

    emit(&formatter.format_plans(&plans.plans))
}

/// Loads the plans file and run config and resolves the selected plan.
fn load_plan(cli: &Cli, select: &SelectArgs) -> Result<Plan> {
    let plans_path = resolve_plans_path(cli.plans_file.as_ref())?;
    let base = plans_path.parent().unwrap_or_else(|| Path::new("."));

    let parser = ConfigParser::new().with_base_path(base);
    parser.load_dotenv()?;

    let plans = ConfigParser::new().load_plans(&plans_path)?;
    // An explicit run config is taken as given; the default sits next to the plans file.
    let run_config = match &cli.run_config {
        Some(path) => ConfigParser::new().load_run_config(path)?,
        None => parser.load_run_config(RUN_CONFIG_FILE_NAME)?,
    };

    let selection = PlanSelection {
        plan_id: select.plan_id.clone(),
        operation: select.operation,
        cluster_name: select.cluster_name.clone(),
    };

    let plan = ConfigParser::resolve_plan(&plans, &run_config, &selection)?;
    debug!("Resolved plan: {:?}", plan);
    Ok(plan)
}

/// Resolves the plans file path.
fn resolve_plans_path(explicit: Option<&PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.clone()),
        None => find_config_file(".", PLANS_FILE_NAME),
    }
}

/// Writes command output to stdout.
fn emit(output: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", output.trim_end())?;
    Ok(())
}
