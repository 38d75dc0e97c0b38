//! Azure Kubernetes Service driver.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::info;

use crate::config::{Plan, Provider};
use crate::error::{ConfigError, DeployerError, Result};
use crate::exec::{Command, CommandRunner, RenderContext, check_all};
use crate::vault::SecretResolver;

use super::lifecycle::{Lifecycle, NotFoundPolicy};
use super::{ClusterDriver, Collaborators, DriverFactory, resolve_field};

/// Secret holding the CI service principal and AKS defaults.
const SECRET_PATH: &str = "secret/devops-ci/cloud-on-k8s/ci-azr-k8s-operator";
const RESOURCE_GROUP_FIELD: &str = "resource-group";
const ACR_NAME_FIELD: &str = "acr-name";
const APP_ID_FIELD: &str = "appId";
const PASSWORD_FIELD: &str = "password";
const TENANT_FIELD: &str = "tenant";

/// `az aks show` output for a missing cluster.
pub const NOT_FOUND: NotFoundPolicy = NotFoundPolicy::new(&["not be found", "was not found"]);

const LOGIN_SERVICE_PRINCIPAL: &str =
    "az login --service-principal -u {{ AppId }} -p {{ TenantSecret }} --tenant {{ TenantId }}";
const LOGIN_INTERACTIVE: &str = "az login";
const SHOW: &str = "az aks show --name {{ ClusterName }} --resource-group {{ ResourceGroup }}";
const CREATE: &str = "az aks create --resource-group {{ ResourceGroup }} --name {{ ClusterName }} \
    --node-count {{ NodeCount }} --node-vm-size {{ MachineType }} \
    --kubernetes-version {{ KubernetesVersion }} --node-osdisk-size 30 \
    --enable-addons http_application_routing,monitoring --generate-ssh-keys";
const CREATE_SERVICE_PRINCIPAL: &str = " --service-principal {{ AppId }} --client-secret {{ TenantSecret }}";
const ACR_LOGIN: &str = "az acr login --name {{ AcrName }}";
const CLIENT_ID_QUERY: &str = "az aks show --resource-group {{ ResourceGroup }} --name {{ ClusterName }} \
    --query \"servicePrincipalProfile.clientId\" --output tsv";
const ACR_ID_QUERY: &str = "az acr show --resource-group {{ ResourceGroup }} --name {{ AcrName }} \
    --query \"id\" --output tsv";
const ROLE_ASSIGNMENT: &str = "az role assignment create --assignee {{ ClientId }} --role acrpull --scope {{ AcrId }}";
const GET_CREDENTIALS: &str = "az aks get-credentials --resource-group {{ ResourceGroup }} --name {{ ClusterName }}";
const DELETE: &str = "az aks delete --yes --name {{ ClusterName }} --resource-group {{ ResourceGroup }}";

const TEMPLATES: &[&str] = &[
    LOGIN_SERVICE_PRINCIPAL,
    LOGIN_INTERACTIVE,
    SHOW,
    CREATE,
    CREATE_SERVICE_PRINCIPAL,
    ACR_LOGIN,
    CLIENT_ID_QUERY,
    ACR_ID_QUERY,
    ROLE_ASSIGNMENT,
    GET_CREDENTIALS,
    DELETE,
];

/// Variables bound per step rather than at construction.
const STEP_VARIABLES: &[&str] = &["AppId", "TenantSecret", "TenantId", "ClientId", "AcrId"];

/// Resolved AKS parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AksParams {
    /// Cluster name.
    pub cluster_name: String,
    /// Resource group.
    pub resource_group: String,
    /// Container registry name.
    pub acr_name: String,
    /// Node count.
    pub node_count: u32,
    /// Node VM size.
    pub machine_type: String,
    /// Kubernetes version.
    pub kubernetes_version: String,
}

impl AksParams {
    /// Takes the parameters from a resolved plan.
    #[must_use]
    pub fn from_plan(plan: &Plan) -> Self {
        Self {
            cluster_name: plan.cluster_name.clone(),
            resource_group: plan.aks.resource_group.clone(),
            acr_name: plan.aks.acr_name.clone(),
            node_count: plan.aks.node_count,
            machine_type: plan.machine_type.clone(),
            kubernetes_version: plan.kubernetes_version.clone(),
        }
    }

    /// Renders the parameters into a template context.
    #[must_use]
    pub fn context(&self) -> RenderContext {
        RenderContext::new()
            .with("ClusterName", self.cluster_name.as_str())
            .with("ResourceGroup", self.resource_group.as_str())
            .with("AcrName", self.acr_name.as_str())
            .with("NodeCount", self.node_count.to_string())
            .with("MachineType", self.machine_type.as_str())
            .with("KubernetesVersion", self.kubernetes_version.as_str())
    }
}

/// Service principal credentials, read once per run.
#[derive(Clone)]
struct ServicePrincipal {
    app_id: String,
    password: String,
    tenant: String,
}

impl ServicePrincipal {
    fn context(&self, base: &RenderContext) -> RenderContext {
        base.clone()
            .with("AppId", self.app_id.as_str())
            .with("TenantSecret", self.password.as_str())
            .with("TenantId", self.tenant.as_str())
    }
}

/// Builds [`AksDriver`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct AksFactory;

#[async_trait]
impl DriverFactory for AksFactory {
    fn provider(&self) -> Provider {
        Provider::Aks
    }

    async fn create(&self, mut plan: Plan, collaborators: &Collaborators) -> Result<ClusterDriver> {
        let needs_secrets =
            plan.service_account || plan.aks.resource_group.is_empty() || plan.aks.acr_name.is_empty();

        let secrets = if needs_secrets {
            Some(collaborators.connect_secrets(&plan).await?)
        } else {
            None
        };

        if let Some(store) = secrets.as_deref() {
            if plan.aks.resource_group.is_empty() {
                plan.aks.resource_group =
                    resolve_field(store, SECRET_PATH, RESOURCE_GROUP_FIELD, "aks.resourceGroup").await?;
            }
            if plan.aks.acr_name.is_empty() {
                plan.aks.acr_name = resolve_field(store, SECRET_PATH, ACR_NAME_FIELD, "aks.acrName").await?;
            }
        }

        let driver = AksDriver::new(plan, Arc::clone(&collaborators.runner), secrets)?;
        Ok(ClusterDriver::Aks(driver))
    }
}

/// Drives one AKS cluster through its lifecycle.
pub struct AksDriver {
    plan: Plan,
    params: AksParams,
    ctx: RenderContext,
    runner: Arc<dyn CommandRunner>,
    secrets: Option<Arc<dyn SecretResolver>>,
    principal: OnceCell<ServicePrincipal>,
}

impl AksDriver {
    /// Builds a driver for an already resolved plan.
    ///
    /// # Errors
    ///
    /// Returns a template error if a command references an unknown variable.
    pub fn new(
        plan: Plan,
        runner: Arc<dyn CommandRunner>,
        secrets: Option<Arc<dyn SecretResolver>>,
    ) -> Result<Self> {
        let params = AksParams::from_plan(&plan);
        let ctx = params.context();
        check_all(TEMPLATES, &ctx.with_placeholders(STEP_VARIABLES))?;

        Ok(Self {
            plan,
            params,
            ctx,
            runner,
            secrets,
            principal: OnceCell::new(),
        })
    }

    /// The resolved parameters.
    #[must_use]
    pub const fn params(&self) -> &AksParams {
        &self.params
    }

    pub(crate) fn plan(&self) -> &Plan {
        &self.plan
    }

    fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    fn command(&self, template: &str) -> Command {
        Command::new(template).as_template(&self.ctx)
    }

    async fn service_principal(&self) -> Result<&ServicePrincipal> {
        self.principal
            .get_or_try_init(|| async {
                let store = self.secrets.as_deref().ok_or(ConfigError::MissingVaultInfo)?;
                let mut values = store
                    .get_many(SECRET_PATH, &[APP_ID_FIELD, PASSWORD_FIELD, TENANT_FIELD])
                    .await?
                    .into_iter();
                let mut next = || values.next().unwrap_or_default();
                Ok::<_, DeployerError>(ServicePrincipal {
                    app_id: next(),
                    password: next(),
                    tenant: next(),
                })
            })
            .await
    }
}

impl fmt::Debug for AksDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AksDriver")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Lifecycle for AksDriver {
    fn plan(&self) -> &Plan {
        &self.plan
    }

    async fn authenticate(&self) -> Result<()> {
        if self.plan.service_account {
            info!("Logging in as service principal");
            let principal = self.service_principal().await?;
            Command::new(LOGIN_SERVICE_PRINCIPAL)
                .as_template(&principal.context(&self.ctx))
                .without_streaming()
                .sensitive()
                .run(self.runner())
                .await
        } else {
            Command::new(LOGIN_INTERACTIVE).run(self.runner()).await
        }
    }

    async fn exists(&self) -> Result<bool> {
        info!("Checking if cluster {} exists", self.params.cluster_name);
        let show = self.command(SHOW).without_streaming();
        NOT_FOUND.probe(&show, self.runner()).await
    }

    async fn create(&self) -> Result<()> {
        if self.plan.service_account {
            let principal = self.service_principal().await?;
            Command::new(format!("{CREATE}{CREATE_SERVICE_PRINCIPAL}"))
                .as_template(&principal.context(&self.ctx))
                .sensitive()
                .run(self.runner())
                .await
        } else {
            self.command(CREATE).run(self.runner()).await
        }
    }

    async fn post_create(&self) -> Result<()> {
        info!("Logging in to registry {}", self.params.acr_name);
        self.command(ACR_LOGIN).run(self.runner()).await?;

        // A service principal cluster already pulls with the CI principal.
        if self.plan.service_account {
            return Ok(());
        }

        let client_id = self
            .command(CLIENT_ID_QUERY)
            .without_streaming()
            .stdout_only()
            .first_line(self.runner())
            .await?;
        let acr_id = self
            .command(ACR_ID_QUERY)
            .without_streaming()
            .stdout_only()
            .first_line(self.runner())
            .await?;

        info!("Granting acrpull on {} to the cluster", self.params.acr_name);
        let grant = self.ctx.clone().with("ClientId", client_id).with("AcrId", acr_id);
        Command::new(ROLE_ASSIGNMENT)
            .as_template(&grant)
            .run(self.runner())
            .await
    }

    async fn get_credentials(&self) -> Result<()> {
        info!("Fetching credentials for {}", self.params.cluster_name);
        self.command(GET_CREDENTIALS).run(self.runner()).await
    }

    async fn delete(&self) -> Result<()> {
        NOT_FOUND
            .delete(&self.command(DELETE), self.runner())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Operation;
    use crate::driver::Outcome;
    use crate::driver::testing::{collaborators, plan};
    use crate::error::CommandError;
    use crate::exec::CommandOutput;
    use crate::exec::fake::ScriptedRunner;
    use crate::vault::fake::StaticSecrets;

    const MISSING: &str = "ERROR: (ResourceNotFound) The Resource 'Microsoft.ContainerService/managedClusters/t2' \
        under resource group 'rg-ci' was not found.";

    fn principal_secrets() -> StaticSecrets {
        StaticSecrets::new()
            .with(SECRET_PATH, APP_ID_FIELD, "app-123")
            .with(SECRET_PATH, PASSWORD_FIELD, "hunter2")
            .with(SECRET_PATH, TENANT_FIELD, "tenant-1")
    }

    fn absent() -> ScriptedRunner {
        ScriptedRunner::new().on(
            "az aks show --name",
            CommandOutput::failure(3, MISSING),
        )
    }

    async fn build(plan: Plan, runner: ScriptedRunner, secrets: StaticSecrets) -> (Arc<ScriptedRunner>, ClusterDriver) {
        let (runner, _, collaborators) = collaborators(runner, secrets);
        let driver = AksFactory.create(plan, &collaborators).await.unwrap();
        (runner, driver)
    }

    #[tokio::test]
    async fn test_delete_absent_is_noop() {
        let plan = plan(Provider::Aks, Operation::Delete, "t2");
        let (runner, driver) = build(plan, absent(), StaticSecrets::new()).await;

        assert_eq!(driver.execute().await.unwrap(), Outcome::AlreadyAbsent);
        assert_eq!(
            runner.lines(),
            vec![
                "az login",
                "az aks show --name t2 --resource-group rg-ci",
            ]
        );
        assert_eq!(runner.count_matching("az aks delete"), 0);
    }

    #[tokio::test]
    async fn test_delete_existing() {
        let plan = plan(Provider::Aks, Operation::Delete, "t2");
        let (runner, driver) = build(plan, ScriptedRunner::new(), StaticSecrets::new()).await;

        driver.execute().await.unwrap();
        assert_eq!(
            runner.lines().last().map(String::as_str),
            Some("az aks delete --yes --name t2 --resource-group rg-ci")
        );
    }

    #[tokio::test]
    async fn test_create_absent_grants_acr_pull() {
        let runner = absent()
            .on("--query \"servicePrincipalProfile.clientId\"", CommandOutput::success("client-9\n"))
            .on("az acr show", CommandOutput::success("/subscriptions/s/registries/acrci\n"));
        let plan = plan(Provider::Aks, Operation::Create, "t1");
        let (runner, driver) = build(plan, runner, StaticSecrets::new()).await;

        driver.execute().await.unwrap();

        let lines = runner.lines();
        assert!(lines[2].starts_with("az aks create --resource-group rg-ci --name t1 --node-count 3"));
        assert!(!lines[2].contains("--service-principal"));
        assert_eq!(lines[3], "az acr login --name acrci");
        assert!(lines.contains(&String::from(
            "az role assignment create --assignee client-9 --role acrpull --scope /subscriptions/s/registries/acrci"
        )));
        assert_eq!(
            lines.last().map(String::as_str),
            Some("az aks get-credentials --resource-group rg-ci --name t1")
        );
    }

    #[tokio::test]
    async fn test_service_account_skips_role_grant() {
        let mut plan = plan(Provider::Aks, Operation::Create, "t1");
        plan.service_account = true;
        let (runner, driver) = build(plan, absent(), principal_secrets()).await;

        driver.execute().await.unwrap();

        let calls = runner.invocations();
        let login = &calls[0];
        assert_eq!(login.line, "az login --service-principal -u app-123 -p hunter2 --tenant tenant-1");
        assert!(login.sensitive);
        assert!(!login.stream);

        let create = calls.iter().find(|c| c.line.starts_with("az aks create")).unwrap();
        assert!(create.line.ends_with("--service-principal app-123 --client-secret hunter2"));
        assert!(create.sensitive);

        assert_eq!(runner.count_matching("az role assignment"), 0);
        assert_eq!(runner.count_matching("servicePrincipalProfile"), 0);
    }

    #[tokio::test]
    async fn test_create_existing_fetches_credentials_only() {
        let plan = plan(Provider::Aks, Operation::Create, "t1");
        let (runner, driver) = build(plan, ScriptedRunner::new(), StaticSecrets::new()).await;

        driver.execute().await.unwrap();
        assert_eq!(runner.count_matching("az aks create"), 0);
        assert_eq!(runner.count_matching("az acr login"), 0);
        assert_eq!(runner.count_matching("az aks get-credentials"), 1);
    }

    #[tokio::test]
    async fn test_existence_check_failure_is_fatal() {
        let runner = ScriptedRunner::new().on(
            "az aks show --name",
            CommandOutput::failure(1, "AuthorizationFailed"),
        );
        let plan = plan(Provider::Aks, Operation::Delete, "t2");
        let (runner, driver) = build(plan, runner, StaticSecrets::new()).await;

        let err = driver.execute().await.unwrap_err();
        assert!(matches!(err, DeployerError::Command(CommandError::Failed { code: Some(1), .. })));
        assert_eq!(runner.count_matching("az aks delete"), 0);
    }

    #[tokio::test]
    async fn test_empty_client_id_is_an_error() {
        let plan = plan(Provider::Aks, Operation::Create, "t1");
        let (runner, driver) = build(plan, absent(), StaticSecrets::new()).await;

        let err = driver.execute().await.unwrap_err();
        assert!(matches!(err, DeployerError::Command(CommandError::EmptyOutput { .. })));
        assert_eq!(runner.count_matching("az role assignment"), 0);
        assert_eq!(runner.count_matching("get-credentials"), 0);
    }

    #[tokio::test]
    async fn test_factory_resolves_empty_fields() {
        let mut plan = plan(Provider::Aks, Operation::Create, "t1");
        plan.aks.resource_group.clear();
        plan.aks.acr_name.clear();
        let secrets = StaticSecrets::new()
            .with(SECRET_PATH, RESOURCE_GROUP_FIELD, "rg-vault")
            .with(SECRET_PATH, ACR_NAME_FIELD, "acrvault");

        let (_, connector, collaborators) = collaborators(ScriptedRunner::new(), secrets);
        let ClusterDriver::Aks(driver) = AksFactory.create(plan, &collaborators).await.unwrap() else {
            panic!("expected an AKS driver");
        };
        assert_eq!(driver.params().resource_group, "rg-vault");
        assert_eq!(driver.params().acr_name, "acrvault");
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn test_factory_fails_on_unresolvable_field() {
        let mut plan = plan(Provider::Aks, Operation::Create, "t1");
        plan.aks.acr_name.clear();

        let (_, _, collaborators) = collaborators(ScriptedRunner::new(), StaticSecrets::new());
        let err = AksFactory.create(plan, &collaborators).await.unwrap_err();
        assert!(matches!(
            err,
            DeployerError::Config(ConfigError::UnresolvedField { ref field }) if field == "aks.acrName"
        ));
    }

    #[tokio::test]
    async fn test_factory_skips_secret_store_when_not_needed() {
        let plan = plan(Provider::Aks, Operation::Create, "t1");
        let (_, connector, collaborators) = collaborators(ScriptedRunner::new(), StaticSecrets::new());
        AksFactory.create(plan, &collaborators).await.unwrap();
        assert_eq!(connector.connects(), 0);
    }

    #[test]
    fn test_templates_cover_context() {
        let params = AksParams::from_plan(&plan(Provider::Aks, Operation::Create, "t1"));
        let ctx = params.context().with_placeholders(STEP_VARIABLES);
        assert!(check_all(TEMPLATES, &ctx).is_ok());

        let bare = RenderContext::new().with("ClusterName", "t1");
        assert!(check_all(&[SHOW], &bare).is_err());
    }
}
