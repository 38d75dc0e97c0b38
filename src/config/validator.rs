//! Plan validation.
//!
//! Catches malformed plans before any driver is constructed, so a bad plan
//! never reaches the cloud provider.

use crate::error::{ConfigError, DeployerError, Result};
use tracing::debug;

use super::plan::{AksSettings, GkeSettings, Plan, Provider};

/// Maximum GKE cluster name length.
const GKE_MAX_NAME_LEN: usize = 40;

/// Maximum AKS cluster name length.
const AKS_MAX_NAME_LEN: usize = 63;

/// Validator for plans.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a plan.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any check fails.
    pub fn validate(&self, plan: &Plan) -> Result<ValidationResult> {
        let result = self.check(plan);

        if let Some(first_error) = result.errors.first() {
            return Err(DeployerError::Config(ConfigError::validation(
                first_error.message.clone(),
                first_error.field.clone(),
            )));
        }

        debug!("Plan {} passed validation", plan.id);
        Ok(result)
    }

    /// Runs every check and collects all findings without failing.
    #[must_use]
    pub fn check(&self, plan: &Plan) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_common(plan, &mut result);
        match plan.provider {
            Provider::Aks => Self::validate_aks(&plan.aks, plan, &mut result),
            Provider::Gke => Self::validate_gke(&plan.gke, plan, &mut result),
        }

        result
    }

    /// Validates provider-independent fields.
    fn validate_common(plan: &Plan, result: &mut ValidationResult) {
        if plan.cluster_name.is_empty() {
            result.error("clusterName", "Cluster name cannot be empty");
        } else if !is_valid_name(&plan.cluster_name) {
            result.error(
                "clusterName",
                format!(
                    "Cluster name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    plan.cluster_name
                ),
            );
        }

        if plan.machine_type.is_empty() {
            result.error("machineType", "Machine type cannot be empty");
        }

        if plan.kubernetes_version.is_empty() {
            result.error("kubernetesVersion", "Kubernetes version cannot be empty");
        }

        if let Some(vault) = &plan.vault_info {
            if vault.address.is_empty() {
                result.error("vaultInfo.address", "Vault address cannot be empty");
            }
            if vault.role_id.is_some() != vault.secret_id.is_some() {
                result.error(
                    "vaultInfo",
                    "AppRole login needs both roleId and secretId",
                );
            }
        }
    }

    fn validate_aks(aks: &AksSettings, plan: &Plan, result: &mut ValidationResult) {
        if plan.cluster_name.len() > AKS_MAX_NAME_LEN {
            result.error(
                "clusterName",
                format!("AKS cluster names are limited to {AKS_MAX_NAME_LEN} characters"),
            );
        }

        if aks.node_count == 0 {
            result.error("aks.nodeCount", "Node count must be at least 1");
        }

        let needs_vault = aks.resource_group.is_empty() || aks.acr_name.is_empty();
        if (needs_vault || plan.service_account) && plan.vault_info.is_none() {
            result.error(
                "vaultInfo",
                "AKS plans with an empty resourceGroup/acrName or serviceAccount need vaultInfo",
            );
        }
    }

    fn validate_gke(gke: &GkeSettings, plan: &Plan, result: &mut ValidationResult) {
        if plan.cluster_name.len() > GKE_MAX_NAME_LEN {
            result.error(
                "clusterName",
                format!("GKE cluster names are limited to {GKE_MAX_NAME_LEN} characters"),
            );
        }

        for (field, value) in [
            ("gke.region", &gke.region),
            ("gke.adminUsername", &gke.admin_username),
            ("gke.gcpScopes", &gke.gcp_scopes),
        ] {
            if value.is_empty() {
                result.error(field, format!("{field} cannot be empty"));
            }
        }

        if gke.node_count_per_zone == 0 {
            result.error("gke.nodeCountPerZone", "Node count per zone must be at least 1");
        }

        if gke.vm_max_map_count && gke.ssh_user.is_empty() {
            result.error("gke.sshUser", "vmMapMax needs an ssh user");
        }

        if (gke.gcloud_project.is_empty() || plan.service_account) && plan.vault_info.is_none() {
            result.error(
                "vaultInfo",
                "GKE plans with an empty gcloudProject or serviceAccount need vaultInfo",
            );
        }

        if gke.psp {
            result
                .warnings
                .push(String::from("gke.psp: pod security policies are removed in Kubernetes 1.25+"));
        }
    }
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
