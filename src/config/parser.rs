//! Configuration parser for loading plans and run configuration.
//!
//! This module handles loading the plans file and the run configuration from
//! YAML, selecting a plan and layering run-config overrides, environment
//! overrides and command-line selections on top of it.

use crate::error::{ConfigError, DeployerError, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::plan::{Operation, Plan, PlansFile, RunConfig, VaultInfo};

/// Default plans file name.
pub const PLANS_FILE_NAME: &str = "plans.yml";

/// Default run configuration file name.
pub const RUN_CONFIG_FILE_NAME: &str = "run-config.yml";

/// Explicit selections from the command line, applied last.
#[derive(Debug, Clone, Default)]
pub struct PlanSelection {
    /// Plan id, overriding the run config's.
    pub plan_id: Option<String>,
    /// Operation override.
    pub operation: Option<Operation>,
    /// Cluster name override.
    pub cluster_name: Option<String>,
}

/// Configuration parser for loading plans.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads the plans file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_plans(&self, path: impl AsRef<Path>) -> Result<PlansFile> {
        let plans: PlansFile = load_yaml(&self.resolve(path.as_ref()))?;
        debug!("Loaded {} plans", plans.plans.len());
        Ok(plans)
    }

    /// Loads the run configuration. A missing file yields an empty run config.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_run_config(&self, path: impl AsRef<Path>) -> Result<RunConfig> {
        let path = self.resolve(path.as_ref());
        if !path.exists() {
            debug!("No run config at {}, using defaults", path.display());
            return Ok(RunConfig::default());
        }
        load_yaml(&path)
    }

    /// Parses a plans file from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_plans(&self, content: &str, source: Option<&Path>) -> Result<PlansFile> {
        parse_yaml(content, source)
    }

    /// Selects the plan to run and applies every override layer.
    ///
    /// Precedence, lowest first: the plan itself, run-config overrides,
    /// environment variables, then the command-line selection.
    ///
    /// # Errors
    ///
    /// Returns an error if no plan is selected or the id is unknown.
    pub fn resolve_plan(
        plans: &PlansFile,
        run_config: &RunConfig,
        selection: &PlanSelection,
    ) -> Result<Plan> {
        Self::resolve_plan_with(plans, run_config, selection, |key| std::env::var(key).ok())
    }

    /// Like [`ConfigParser::resolve_plan`], reading the environment through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if no plan is selected, the id is unknown, or an
    /// environment override holds an unknown operation.
    pub fn resolve_plan_with<F>(
        plans: &PlansFile,
        run_config: &RunConfig,
        selection: &PlanSelection,
        lookup: F,
    ) -> Result<Plan>
    where
        F: Fn(&str) -> Option<String>,
    {
        let id = selection
            .plan_id
            .as_ref()
            .or(run_config.id.as_ref())
            .ok_or(ConfigError::NoPlanSelected)?;

        let mut plan = plans
            .find(id)
            .cloned()
            .ok_or_else(|| ConfigError::PlanNotFound { id: id.clone() })?;
        info!("Selected plan {} ({} on {})", plan.id, plan.operation, plan.provider);

        run_config.overrides.apply(&mut plan);
        if let Some(vault) = &run_config.vault_info {
            plan.vault_info = Some(vault.clone());
        }

        apply_env_overrides(&mut plan, &lookup)?;

        if let Some(operation) = selection.operation {
            plan.operation = operation;
        }
        if let Some(name) = &selection.cluster_name {
            plan.cluster_name.clone_from(name);
        }

        Ok(plan)
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self.resolve(Path::new(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                DeployerError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        }

        Ok(())
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_path {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    info!("Loading configuration from: {}", path.display());

    if !path.exists() {
        return Err(DeployerError::Config(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        }));
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        DeployerError::Config(ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })
    })?;

    parse_yaml(&content, Some(path))
}

fn parse_yaml<T: DeserializeOwned>(content: &str, source: Option<&Path>) -> Result<T> {
    serde_yaml::from_str(content).map_err(|e| {
        DeployerError::Config(ConfigError::ParseError {
            message: format!("YAML parse error: {e}"),
            location: source.map(|p| p.display().to_string()),
        })
    })
}

/// Applies `DEPLOYER_*` and Vault environment overrides.
///
/// Vault variables only fill fields the configuration left unset.
fn apply_env_overrides<F>(plan: &mut Plan, lookup: &F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(name) = lookup("DEPLOYER_CLUSTER_NAME") {
        debug!("Overriding clusterName from environment");
        plan.cluster_name = name;
    }

    if let Some(operation) = lookup("DEPLOYER_OPERATION") {
        debug!("Overriding operation from environment");
        plan.operation = operation.parse()?;
    }

    if let Some(version) = lookup("DEPLOYER_KUBERNETES_VERSION") {
        debug!("Overriding kubernetesVersion from environment");
        plan.kubernetes_version = version;
    }

    let address = lookup("VAULT_ADDR");
    if plan.vault_info.is_none() && address.is_none() {
        return Ok(());
    }

    let vault = plan.vault_info.get_or_insert_with(VaultInfo::default);
    if vault.address.is_empty() {
        if let Some(address) = address {
            vault.address = address;
        }
    }
    // A configured login method wins over a token from the environment.
    let login_configured =
        vault.role_id.is_some() || vault.secret_id.is_some() || vault.github_token.is_some();
    if !login_configured {
        fill(&mut vault.token, lookup("VAULT_TOKEN"));
    }
    fill(&mut vault.role_id, lookup("VAULT_ROLE_ID"));
    fill(&mut vault.secret_id, lookup("VAULT_SECRET_ID"));
    fill(&mut vault.github_token, lookup("GITHUB_TOKEN"));

    Ok(())
}

fn fill(slot: &mut Option<String>, value: Option<String>) {
    if slot.is_none() {
        *slot = value;
    }
}

/// Finds a configuration file by name.
///
/// Looks in `start_dir` first, then in the user configuration directory
/// (`~/.config/deployer` on Linux).
///
/// # Errors
///
/// Returns an error if the file is found in neither location.
pub fn find_config_file(start_dir: impl AsRef<Path>, name: &str) -> Result<PathBuf> {
    let local = start_dir.as_ref().join(name);
    if local.exists() {
        return Ok(local);
    }

    if let Some(user) = dirs::config_dir().map(|d| d.join("deployer").join(name)) {
        if user.exists() {
            return Ok(user);
        }
    }

    Err(DeployerError::Config(ConfigError::FileNotFound { path: local }))
}
