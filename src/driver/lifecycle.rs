//! Shared cluster lifecycle.
//!
//! Every provider runs the same sequence: authenticate, check whether the
//! cluster exists, then create, delete or do nothing. Providers fill in the
//! steps through the [`Lifecycle`] hooks; [`execute`] owns the ordering.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::{Operation, Plan};
use crate::error::Result;
use crate::exec::{Command, CommandOutput, CommandRunner};

use super::Outcome;

/// Provider hooks driven by [`execute`].
#[async_trait]
pub(crate) trait Lifecycle: Send + Sync {
    /// The resolved plan.
    fn plan(&self) -> &Plan;

    /// Logs in to the provider.
    async fn authenticate(&self) -> Result<()>;

    /// Reports whether the cluster exists.
    async fn exists(&self) -> Result<bool>;

    /// Runs before the cluster is created.
    async fn pre_create(&self) -> Result<()> {
        Ok(())
    }

    /// Creates the cluster.
    async fn create(&self) -> Result<()>;

    /// Runs once after a fresh cluster is created.
    async fn post_create(&self) -> Result<()> {
        Ok(())
    }

    /// Writes cluster credentials to the local kubeconfig.
    async fn get_credentials(&self) -> Result<()>;

    /// Runs once after credentials for a fresh cluster are fetched.
    async fn post_credentials(&self) -> Result<()> {
        Ok(())
    }

    /// Deletes the cluster.
    async fn delete(&self) -> Result<()>;
}

/// Runs the lifecycle for the plan's operation.
///
/// # Errors
///
/// Returns the first step error; later steps are not run.
pub(crate) async fn execute<L: Lifecycle + ?Sized>(driver: &L) -> Result<Outcome> {
    let plan = driver.plan();
    let name = &plan.cluster_name;

    info!("Authenticating to {}", plan.provider);
    driver.authenticate().await?;

    let exists = driver.exists().await?;

    let outcome = match (plan.operation, exists) {
        (Operation::Delete, true) => {
            info!("Deleting cluster {}", name);
            driver.delete().await?;
            Outcome::Deleted
        }
        (Operation::Delete, false) => {
            info!("Cluster {} does not exist, nothing to delete", name);
            Outcome::AlreadyAbsent
        }
        (Operation::Create, true) => {
            info!("Cluster {} already exists", name);
            driver.get_credentials().await?;
            Outcome::AlreadyExists
        }
        (Operation::Create, false) => {
            info!("Creating cluster {}", name);
            driver.pre_create().await?;
            driver.create().await?;
            driver.post_create().await?;
            driver.get_credentials().await?;
            driver.post_credentials().await?;
            Outcome::Created
        }
    };

    info!("Cluster {}: {}", name, outcome);
    Ok(outcome)
}

/// Output substrings that mean "the cluster does not exist".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotFoundPolicy {
    markers: &'static [&'static str],
}

impl NotFoundPolicy {
    /// Creates a policy from a marker table.
    #[must_use]
    pub const fn new(markers: &'static [&'static str]) -> Self {
        Self { markers }
    }

    /// The marker table.
    #[must_use]
    pub const fn markers(&self) -> &'static [&'static str] {
        self.markers
    }

    /// Returns true if the output carries a not-found marker.
    #[must_use]
    pub fn is_not_found(&self, output: &CommandOutput) -> bool {
        output.contains_any(self.markers)
    }

    /// Classifies the output of a describe command.
    ///
    /// A marker means absent and a clean exit means present.
    ///
    /// # Errors
    ///
    /// Returns the command failure for any other non-zero exit.
    pub fn classify_existence(&self, command: &Command, output: &CommandOutput) -> Result<bool> {
        if self.is_not_found(output) {
            Ok(false)
        } else if output.is_success() {
            Ok(true)
        } else {
            Err(command.failure(output).into())
        }
    }

    /// Classifies the output of a delete command.
    ///
    /// Returns false when the cluster was already gone.
    ///
    /// # Errors
    ///
    /// Returns the command failure for a non-zero exit without a marker.
    pub fn check_deleted(&self, command: &Command, output: &CommandOutput) -> Result<bool> {
        if output.is_success() {
            Ok(true)
        } else if self.is_not_found(output) {
            Ok(false)
        } else {
            Err(command.failure(output).into())
        }
    }

    /// Runs a describe command and classifies it.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be run or fails unexpectedly.
    pub async fn probe(&self, command: &Command, runner: &dyn CommandRunner) -> Result<bool> {
        let output = command.execute(runner).await?;
        self.classify_existence(command, &output)
    }

    /// Runs a delete command, tolerating a cluster that vanished meanwhile.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be run or fails unexpectedly.
    pub async fn delete(&self, command: &Command, runner: &dyn CommandRunner) -> Result<()> {
        let output = command.execute(runner).await?;
        if !self.check_deleted(command, &output)? {
            warn!("Cluster disappeared before it could be deleted");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AksSettings, GkeSettings, Provider};
    use crate::error::{CommandError, DeployerError};
    use std::sync::Mutex;

    const POLICY: NotFoundPolicy = NotFoundPolicy::new(&["not be found", "was not found"]);

    /// Records hook calls; `exists` and one failing step are configurable.
    struct Recorder {
        plan: Plan,
        exists: bool,
        fail_on: Option<&'static str>,
        calls: Mutex<Vec<&'static str>>,
    }

    impl Recorder {
        fn new(operation: Operation, exists: bool) -> Self {
            Self {
                plan: Plan {
                    id: String::from("p"),
                    provider: Provider::Aks,
                    operation,
                    cluster_name: String::from("ci"),
                    machine_type: String::from("m"),
                    kubernetes_version: String::from("1.30"),
                    service_account: false,
                    vault_info: None,
                    aks: AksSettings::default(),
                    gke: GkeSettings::default(),
                },
                exists,
                fail_on: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn step(&self, name: &'static str) -> Result<()> {
            self.calls.lock().unwrap().push(name);
            if self.fail_on == Some(name) {
                return Err(CommandError::EmptyOutput {
                    command: name.to_string(),
                }
                .into());
            }
            Ok(())
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Lifecycle for Recorder {
        fn plan(&self) -> &Plan {
            &self.plan
        }
        async fn authenticate(&self) -> Result<()> {
            self.step("authenticate")
        }
        async fn exists(&self) -> Result<bool> {
            self.step("exists").map(|()| self.exists)
        }
        async fn pre_create(&self) -> Result<()> {
            self.step("pre_create")
        }
        async fn create(&self) -> Result<()> {
            self.step("create")
        }
        async fn post_create(&self) -> Result<()> {
            self.step("post_create")
        }
        async fn get_credentials(&self) -> Result<()> {
            self.step("get_credentials")
        }
        async fn post_credentials(&self) -> Result<()> {
            self.step("post_credentials")
        }
        async fn delete(&self) -> Result<()> {
            self.step("delete")
        }
    }

    #[tokio::test]
    async fn test_create_absent_runs_full_sequence() {
        let driver = Recorder::new(Operation::Create, false);
        assert_eq!(execute(&driver).await.unwrap(), Outcome::Created);
        assert_eq!(
            driver.calls(),
            vec![
                "authenticate",
                "exists",
                "pre_create",
                "create",
                "post_create",
                "get_credentials",
                "post_credentials"
            ]
        );
    }

    #[tokio::test]
    async fn test_create_existing_only_fetches_credentials() {
        let driver = Recorder::new(Operation::Create, true);
        assert_eq!(execute(&driver).await.unwrap(), Outcome::AlreadyExists);
        assert_eq!(driver.calls(), vec!["authenticate", "exists", "get_credentials"]);
    }

    #[tokio::test]
    async fn test_delete_branches() {
        let present = Recorder::new(Operation::Delete, true);
        assert_eq!(execute(&present).await.unwrap(), Outcome::Deleted);
        assert_eq!(present.calls(), vec!["authenticate", "exists", "delete"]);

        let absent = Recorder::new(Operation::Delete, false);
        assert_eq!(execute(&absent).await.unwrap(), Outcome::AlreadyAbsent);
        assert_eq!(absent.calls(), vec!["authenticate", "exists"]);
    }

    #[tokio::test]
    async fn test_step_error_aborts() {
        let mut driver = Recorder::new(Operation::Create, false);
        driver.fail_on = Some("create");
        let err = execute(&driver).await.unwrap_err();
        assert!(matches!(err, DeployerError::Command(CommandError::EmptyOutput { .. })));
        assert_eq!(driver.calls(), vec!["authenticate", "exists", "pre_create", "create"]);
    }

    #[tokio::test]
    async fn test_auth_failure_stops_before_existence_check() {
        let mut driver = Recorder::new(Operation::Delete, true);
        driver.fail_on = Some("authenticate");
        assert!(execute(&driver).await.is_err());
        assert_eq!(driver.calls(), vec!["authenticate"]);
    }

    #[test]
    fn test_classify_existence() {
        let show = Command::new("az aks show");
        assert!(POLICY.classify_existence(&show, &CommandOutput::success("{}")).unwrap());
        assert!(
            !POLICY
                .classify_existence(&show, &CommandOutput::failure(3, "ResourceNotFound: was not found"))
                .unwrap()
        );
        assert!(
            POLICY
                .classify_existence(&show, &CommandOutput::failure(1, "AuthorizationFailed"))
                .is_err()
        );
    }

    #[test]
    fn test_marker_on_stdout_counts() {
        let output = CommandOutput {
            code: Some(0),
            stdout: String::from("could not be found"),
            stderr: String::new(),
        };
        assert!(!POLICY.classify_existence(&Command::new("x"), &output).unwrap());
    }

    #[test]
    fn test_check_deleted() {
        let delete = Command::new("az aks delete --yes");
        assert!(POLICY.check_deleted(&delete, &CommandOutput::success("")).unwrap());
        assert!(
            !POLICY
                .check_deleted(&delete, &CommandOutput::failure(3, "could not be found"))
                .unwrap()
        );
        assert!(
            POLICY
                .check_deleted(&delete, &CommandOutput::failure(1, "conflict"))
                .is_err()
        );
    }
}
