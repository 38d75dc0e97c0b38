//! Cluster drivers.
//!
//! A [`ClusterDriver`] is built by the provider's [`DriverFactory`] from a
//! [`Plan`]. Construction resolves empty provider fields from the secret
//! store and checks every command template, so [`ClusterDriver::execute`]
//! only ever fails on the provider side.

mod aks;
mod gke;
mod lifecycle;
mod records;
pub mod registry;
mod storage_class;

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::config::{Operation, Plan, Provider};
use crate::error::{ConfigError, DeployerError, Result, SecretError};
use crate::exec::CommandRunner;
use crate::vault::{SecretResolver, SecretResolverFactory};

pub use aks::{AksDriver, AksFactory, AksParams};
pub use gke::{GkeDriver, GkeFactory, GkeParams};
pub use lifecycle::NotFoundPolicy;
pub use records::NameZone;
pub use registry::{DriverRegistry, RegistryBuilder, registry};

/// External services a driver talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Runs provider CLI commands.
    pub runner: Arc<dyn CommandRunner>,
    /// Connects to the secret store.
    pub secrets: Arc<dyn SecretResolverFactory>,
}

impl Collaborators {
    /// Bundles a runner and a secret store connector.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, secrets: Arc<dyn SecretResolverFactory>) -> Self {
        Self { runner, secrets }
    }

    /// Connects to the secret store named by the plan.
    ///
    /// # Errors
    ///
    /// Returns an error if the plan has no vault information or the
    /// connection fails.
    pub async fn connect_secrets(&self, plan: &Plan) -> Result<Arc<dyn SecretResolver>> {
        let info = plan
            .vault_info
            .as_ref()
            .ok_or(ConfigError::MissingVaultInfo)?;
        self.secrets.connect(info).await
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Builds drivers for one provider.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    /// The provider this factory builds drivers for.
    fn provider(&self) -> Provider;

    /// Resolves `plan` and builds a ready-to-run driver.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret store cannot be reached, a required
    /// field stays empty, or a command template references an unknown
    /// variable.
    async fn create(&self, plan: Plan, collaborators: &Collaborators) -> Result<ClusterDriver>;
}

/// A provider-specific cluster driver.
#[derive(Debug)]
pub enum ClusterDriver {
    /// Azure Kubernetes Service.
    Aks(AksDriver),
    /// Google Kubernetes Engine.
    Gke(GkeDriver),
}

impl ClusterDriver {
    /// The resolved plan the driver runs.
    #[must_use]
    pub fn plan(&self) -> &Plan {
        match self {
            Self::Aks(d) => d.plan(),
            Self::Gke(d) => d.plan(),
        }
    }

    /// Runs the plan's operation to completion.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error.
    pub async fn execute(&self) -> Result<Outcome> {
        match self {
            Self::Aks(d) => lifecycle::execute(d).await,
            Self::Gke(d) => lifecycle::execute(d).await,
        }
    }

    /// Runs [`ClusterDriver::execute`] and times it.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error.
    pub async fn run(&self) -> Result<ExecutionReport> {
        let started_at = Utc::now();
        let start = Instant::now();
        let outcome = self.execute().await?;
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let plan = self.plan();
        Ok(ExecutionReport {
            plan_id: plan.id.clone(),
            provider: plan.provider,
            operation: plan.operation,
            cluster_name: plan.cluster_name.clone(),
            outcome,
            started_at,
            duration_ms,
        })
    }
}

/// What a run did to the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The cluster was provisioned.
    Created,
    /// The cluster was already there; only credentials were fetched.
    AlreadyExists,
    /// The cluster was torn down.
    Deleted,
    /// There was nothing to delete.
    AlreadyAbsent,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::AlreadyExists => "already exists",
            Self::Deleted => "deleted",
            Self::AlreadyAbsent => "already absent",
        })
    }
}

/// Summary of one run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    /// Plan id.
    pub plan_id: String,
    /// Provider the plan targeted.
    pub provider: Provider,
    /// Operation that ran.
    pub operation: Operation,
    /// Cluster name.
    pub cluster_name: String,
    /// Result of the run.
    pub outcome: Outcome,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// Reads a plan field from the secret store.
///
/// A missing secret, a missing field, or an empty value all mean the field
/// stays unresolved.
pub(crate) async fn resolve_field(
    secrets: &dyn SecretResolver,
    path: &str,
    field: &str,
    target: &str,
) -> Result<String> {
    match secrets.get(path, field).await {
        Ok(value) if !value.is_empty() => {
            debug!("Resolved {} from the secret store", target);
            Ok(value)
        }
        Ok(_)
        | Err(DeployerError::Secret(
            SecretError::MissingField { .. } | SecretError::NotFound { .. },
        )) => Err(ConfigError::unresolved(target).into()),
        Err(e) => Err(e),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::fake::StaticSecrets;

    #[tokio::test]
    async fn test_resolve_field() {
        let secrets = StaticSecrets::new()
            .with("secret/ci", "acr-name", "acrci")
            .with("secret/ci", "resource-group", "");

        let value = resolve_field(&secrets, "secret/ci", "acr-name", "aks.acrName")
            .await
            .unwrap();
        assert_eq!(value, "acrci");

        for field in ["resource-group", "missing"] {
            let err = resolve_field(&secrets, "secret/ci", field, "aks.resourceGroup")
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                DeployerError::Config(ConfigError::UnresolvedField { ref field }) if field == "aks.resourceGroup"
            ));
        }
    }

    #[test]
    fn test_outcome_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Outcome::AlreadyAbsent).unwrap(),
            "\"already_absent\""
        );
    }
}
