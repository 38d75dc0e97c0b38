//! Plan types for the deployer.
//!
//! This module defines the structs that map to the plans file and the run
//! configuration. A [`Plan`] fully describes one cluster lifecycle run; it is
//! handed by value to a driver factory and never mutated by the caller
//! afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// The root of a plans file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlansFile {
    /// All known plans.
    #[serde(default)]
    pub plans: Vec<Plan>,
}

impl PlansFile {
    /// Looks up a plan by id.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<&Plan> {
        self.plans.iter().find(|p| p.id == id)
    }
}

/// One cluster lifecycle run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    /// Plan identifier.
    pub id: String,
    /// Target provider.
    pub provider: Provider,
    /// Requested operation.
    pub operation: Operation,
    /// Name of the managed cluster.
    pub cluster_name: String,
    /// Node machine type.
    pub machine_type: String,
    /// Kubernetes version to provision.
    pub kubernetes_version: String,
    /// Authenticate non-interactively with credentials from the secret store.
    #[serde(default)]
    pub service_account: bool,
    /// Secret store connection details.
    #[serde(default)]
    pub vault_info: Option<VaultInfo>,
    /// AKS-specific settings.
    #[serde(default)]
    pub aks: AksSettings,
    /// GKE-specific settings.
    #[serde(default)]
    pub gke: GkeSettings,
}

/// Supported managed-Kubernetes providers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Provider {
    /// Azure Kubernetes Service.
    Aks,
    /// Google Kubernetes Engine.
    Gke,
}

impl Provider {
    /// Returns the provider identifier used in plans files.
    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::Aks => "aks",
            Self::Gke => "gke",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Provider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aks" => Ok(Self::Aks),
            "gke" => Ok(Self::Gke),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

impl TryFrom<String> for Provider {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Lifecycle operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Operation {
    /// Provision the cluster if it does not exist.
    Create,
    /// Tear the cluster down if it exists.
    Delete,
}

impl Operation {
    /// Returns the operation name used in plans files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "delete" => Ok(Self::Delete),
            other => Err(ConfigError::UnknownOperation(other.to_string())),
        }
    }
}

impl TryFrom<String> for Operation {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// AKS-specific settings.
///
/// `resource_group` and `acr_name` may be left empty; they are then read
/// from the secret store when the driver is constructed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AksSettings {
    /// Azure resource group hosting the cluster and registry.
    pub resource_group: String,
    /// Azure container registry name.
    pub acr_name: String,
    /// Number of nodes.
    pub node_count: u32,
}

/// GKE-specific settings.
///
/// `gcloud_project` may be left empty; it is then read from the secret
/// store when the driver is constructed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct GkeSettings {
    /// GCP project id.
    pub gcloud_project: String,
    /// GCP region.
    pub region: String,
    /// Cluster admin username.
    pub admin_username: String,
    /// Local SSDs attached to each node.
    pub local_ssd_count: u32,
    /// OAuth scopes granted to nodes.
    pub gcp_scopes: String,
    /// Nodes per zone.
    pub node_count_per_zone: u32,
    /// Enable the pod security policy admission controller.
    pub psp: bool,
    /// Raise `vm.max_map_count` on every node after provisioning.
    #[serde(rename = "vmMapMax")]
    pub vm_max_map_count: bool,
    /// Remote user for per-node ssh sessions.
    pub ssh_user: String,
}

impl Default for GkeSettings {
    fn default() -> Self {
        Self {
            gcloud_project: String::new(),
            region: String::new(),
            admin_username: String::new(),
            local_ssd_count: 0,
            gcp_scopes: String::new(),
            node_count_per_zone: 0,
            psp: false,
            vm_max_map_count: false,
            ssh_user: String::from("jenkins"),
        }
    }
}

/// Connection details for the secret store.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct VaultInfo {
    /// Vault address, e.g. `https://vault.example.com:8200`.
    pub address: String,
    /// Client token used as-is when present.
    pub token: Option<String>,
    /// AppRole role id.
    pub role_id: Option<String>,
    /// AppRole secret id.
    pub secret_id: Option<String>,
    /// GitHub personal token for the GitHub auth method.
    pub github_token: Option<String>,
}

impl fmt::Debug for VaultInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("VaultInfo")
            .field("address", &self.address)
            .field("token", &redact(&self.token))
            .field("role_id", &self.role_id)
            .field("secret_id", &redact(&self.secret_id))
            .field("github_token", &redact(&self.github_token))
            .finish()
    }
}

/// The run configuration: which plan to run, and how to adjust it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RunConfig {
    /// Plan id to run.
    pub id: Option<String>,
    /// Field overrides applied on top of the selected plan.
    pub overrides: PlanOverrides,
    /// Secret store connection details, replacing the plan's.
    pub vault_info: Option<VaultInfo>,
}

/// Field overrides for a plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct PlanOverrides {
    /// Override for [`Plan::operation`].
    pub operation: Option<Operation>,
    /// Override for [`Plan::cluster_name`].
    pub cluster_name: Option<String>,
    /// Override for [`Plan::kubernetes_version`].
    pub kubernetes_version: Option<String>,
    /// Override for [`Plan::machine_type`].
    pub machine_type: Option<String>,
    /// Override for [`Plan::service_account`].
    pub service_account: Option<bool>,
    /// Override for [`AksSettings::resource_group`].
    pub resource_group: Option<String>,
    /// Override for [`AksSettings::acr_name`].
    pub acr_name: Option<String>,
    /// Override for [`GkeSettings::gcloud_project`].
    pub gcloud_project: Option<String>,
    /// Override for [`GkeSettings::region`].
    pub region: Option<String>,
}

impl PlanOverrides {
    /// Applies every set override to `plan`.
    pub fn apply(&self, plan: &mut Plan) {
        if let Some(operation) = self.operation {
            plan.operation = operation;
        }
        if let Some(name) = &self.cluster_name {
            plan.cluster_name.clone_from(name);
        }
        if let Some(version) = &self.kubernetes_version {
            plan.kubernetes_version.clone_from(version);
        }
        if let Some(machine_type) = &self.machine_type {
            plan.machine_type.clone_from(machine_type);
        }
        if let Some(service_account) = self.service_account {
            plan.service_account = service_account;
        }
        if let Some(group) = &self.resource_group {
            plan.aks.resource_group.clone_from(group);
        }
        if let Some(acr) = &self.acr_name {
            plan.aks.acr_name.clone_from(acr);
        }
        if let Some(project) = &self.gcloud_project {
            plan.gke.gcloud_project.clone_from(project);
        }
        if let Some(region) = &self.region {
            plan.gke.region.clone_from(region);
        }
    }
}
