//! Google Kubernetes Engine driver.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::{Plan, Provider};
use crate::error::{ConfigError, DriverError, Result};
use crate::exec::{Command, CommandRunner, RenderContext, check_all};
use crate::vault::SecretResolver;

use super::lifecycle::{Lifecycle, NotFoundPolicy};
use super::records::parse_all;
use super::storage_class::{
    CUSTOMIZED_CLASS, DEFAULT_CLASS_ANNOTATIONS, customize, demote_patch, jsonpath_key,
};
use super::{ClusterDriver, Collaborators, DriverFactory, resolve_field};

/// Secret holding the CI service account key and GKE defaults.
const SECRET_PATH: &str = "secret/devops-ci/cloud-on-k8s/ci-gcp-k8s-operator";
const SERVICE_ACCOUNT_FIELD: &str = "service-account";
const PROJECT_FIELD: &str = "gcloud-project";

/// `gcloud ... describe` output for a missing cluster.
pub const NOT_FOUND: NotFoundPolicy = NotFoundPolicy::new(&["Not found"]);

const ACTIVATE_SERVICE_ACCOUNT: &str = "gcloud auth activate-service-account --key-file={{ KeyFile }}";
const LIST_ACCOUNTS: &str = "gcloud auth list \"--format=value(account)\"";
const LOGIN_INTERACTIVE: &str = "gcloud auth login";
const DESCRIBE: &str = "gcloud beta container clusters --project {{ GCloudProject }} describe {{ ClusterName }} \
    --region {{ Region }}";
const CONFIG_SSH: &str = "gcloud --quiet --project {{ GCloudProject }} compute config-ssh";
const CREATE: &str = "gcloud beta container --project {{ GCloudProject }} clusters create {{ ClusterName }} \
    --region {{ Region }} --username {{ AdminUsername }} --cluster-version {{ KubernetesVersion }} \
    --machine-type {{ MachineType }} --image-type COS --disk-type pd-ssd --disk-size 30 \
    --local-ssd-count {{ LocalSsdCount }} --scopes {{ GcpScopes }} --num-nodes {{ NodeCountPerZone }} \
    --enable-cloud-logging --enable-cloud-monitoring --addons HorizontalPodAutoscaling,HttpLoadBalancing \
    --no-enable-autoupgrade --no-enable-autorepair \
    --network projects/{{ GCloudProject }}/global/networks/default \
    --subnetwork projects/{{ GCloudProject }}/regions/{{ Region }}/subnetworks/default";
const PSP_FLAG: &str = " --enable-pod-security-policy";
const ACTIVE_ACCOUNT: &str = "gcloud auth list --filter=status:ACTIVE --format=\"value(account)\"";
const BIND_CLUSTER_ADMIN: &str =
    "kubectl create clusterrolebinding cluster-admin-binding --clusterrole=cluster-admin --user={{ User }}";
const GET_CREDENTIALS: &str = "gcloud container clusters --project {{ GCloudProject }} get-credentials {{ ClusterName }} \
    --region {{ Region }}";
const LIST_INSTANCES: &str = "gcloud compute instances list --project={{ GCloudProject }} \
    --filter=\"metadata.items.key['cluster-name']['value']='{{ ClusterName }}' AND metadata.items.key['cluster-name']['value']!='' \" \
    --format=\"value[separator=','](name,zone)\"";
const SET_MAX_MAP_COUNT: &str = "gcloud -q compute ssh {{ SshUser }}@{{ Name }} --project={{ GCloudProject }} \
    --zone={{ Zone }} --command=\"sudo sysctl -w vm.max_map_count=262144\"";
const CONFIGURE_DOCKER: &str = "gcloud auth configure-docker --quiet";
const LIST_STORAGE_CLASSES: &str = "kubectl get sc";
const DEFAULT_STORAGE_CLASS: &str =
    "kubectl get sc -o=jsonpath=\"{$.items[?(@.metadata.annotations.{{ Annotation }}=='true')].metadata.name}\"";
const GET_STORAGE_CLASS: &str = "kubectl get sc {{ StorageClass }} -o yaml";
const APPLY_STDIN: &str = "kubectl apply -f -";
const PATCH_STORAGE_CLASS: &str = "kubectl patch storageclass {{ StorageClass }} -p '{{ Patch }}'";
const DELETE: &str = "gcloud beta --quiet --project {{ GCloudProject }} container clusters delete {{ ClusterName }} \
    --region {{ Region }}";
const LIST_UNATTACHED_DISKS: &str = "gcloud compute disks list --filter=\"-users:*\" \
    --format=\"value[separator=','](name,zone)\" --project {{ GCloudProject }}";
const DELETE_DISK: &str = "gcloud compute disks delete {{ Name }} --project {{ GCloudProject }} --zone {{ Zone }} --quiet";

const TEMPLATES: &[&str] = &[
    ACTIVATE_SERVICE_ACCOUNT,
    LIST_ACCOUNTS,
    LOGIN_INTERACTIVE,
    DESCRIBE,
    CONFIG_SSH,
    CREATE,
    PSP_FLAG,
    ACTIVE_ACCOUNT,
    BIND_CLUSTER_ADMIN,
    GET_CREDENTIALS,
    LIST_INSTANCES,
    SET_MAX_MAP_COUNT,
    CONFIGURE_DOCKER,
    LIST_STORAGE_CLASSES,
    DEFAULT_STORAGE_CLASS,
    GET_STORAGE_CLASS,
    APPLY_STDIN,
    PATCH_STORAGE_CLASS,
    DELETE,
    LIST_UNATTACHED_DISKS,
    DELETE_DISK,
];

/// Variables bound per step rather than at construction.
const STEP_VARIABLES: &[&str] = &[
    "KeyFile",
    "User",
    "Name",
    "Zone",
    "Annotation",
    "StorageClass",
    "Patch",
];

/// Resolved GKE parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GkeParams {
    /// Cluster name.
    pub cluster_name: String,
    /// GCP project id.
    pub gcloud_project: String,
    /// GCP region.
    pub region: String,
    /// Cluster admin username.
    pub admin_username: String,
    /// Kubernetes version.
    pub kubernetes_version: String,
    /// Node machine type.
    pub machine_type: String,
    /// Local SSDs per node.
    pub local_ssd_count: u32,
    /// Node OAuth scopes.
    pub gcp_scopes: String,
    /// Nodes per zone.
    pub node_count_per_zone: u32,
    /// Remote user for node ssh sessions.
    pub ssh_user: String,
}

impl GkeParams {
    /// Takes the parameters from a resolved plan.
    #[must_use]
    pub fn from_plan(plan: &Plan) -> Self {
        Self {
            cluster_name: plan.cluster_name.clone(),
            gcloud_project: plan.gke.gcloud_project.clone(),
            region: plan.gke.region.clone(),
            admin_username: plan.gke.admin_username.clone(),
            kubernetes_version: plan.kubernetes_version.clone(),
            machine_type: plan.machine_type.clone(),
            local_ssd_count: plan.gke.local_ssd_count,
            gcp_scopes: plan.gke.gcp_scopes.clone(),
            node_count_per_zone: plan.gke.node_count_per_zone,
            ssh_user: plan.gke.ssh_user.clone(),
        }
    }

    /// Renders the parameters into a template context.
    #[must_use]
    pub fn context(&self) -> RenderContext {
        RenderContext::new()
            .with("ClusterName", self.cluster_name.as_str())
            .with("GCloudProject", self.gcloud_project.as_str())
            .with("Region", self.region.as_str())
            .with("AdminUsername", self.admin_username.as_str())
            .with("KubernetesVersion", self.kubernetes_version.as_str())
            .with("MachineType", self.machine_type.as_str())
            .with("LocalSsdCount", self.local_ssd_count.to_string())
            .with("GcpScopes", self.gcp_scopes.as_str())
            .with("NodeCountPerZone", self.node_count_per_zone.to_string())
            .with("SshUser", self.ssh_user.as_str())
    }
}

/// Builds [`GkeDriver`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct GkeFactory;

#[async_trait]
impl DriverFactory for GkeFactory {
    fn provider(&self) -> Provider {
        Provider::Gke
    }

    async fn create(&self, mut plan: Plan, collaborators: &Collaborators) -> Result<ClusterDriver> {
        let secrets = if plan.service_account || plan.gke.gcloud_project.is_empty() {
            Some(collaborators.connect_secrets(&plan).await?)
        } else {
            None
        };

        if let Some(store) = secrets.as_deref() {
            if plan.gke.gcloud_project.is_empty() {
                plan.gke.gcloud_project =
                    resolve_field(store, SECRET_PATH, PROJECT_FIELD, "gke.gcloudProject").await?;
            }
        }

        let driver = GkeDriver::new(plan, Arc::clone(&collaborators.runner), secrets)?;
        Ok(ClusterDriver::Gke(driver))
    }
}

/// Drives one GKE cluster through its lifecycle.
pub struct GkeDriver {
    plan: Plan,
    params: GkeParams,
    ctx: RenderContext,
    runner: Arc<dyn CommandRunner>,
    secrets: Option<Arc<dyn SecretResolver>>,
}

impl GkeDriver {
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
        let params = GkeParams::from_plan(&plan);
        let ctx = params.context();
        check_all(TEMPLATES, &ctx.with_placeholders(STEP_VARIABLES))?;

        Ok(Self {
            plan,
            params,
            ctx,
            runner,
            secrets,
        })
    }

    /// The resolved parameters.
    #[must_use]
    pub const fn params(&self) -> &GkeParams {
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

    async fn activate_service_account(&self) -> Result<()> {
        let store = self.secrets.as_deref().ok_or(ConfigError::MissingVaultInfo)?;

        // Removed when dropped at the end of this call.
        let key_file = tempfile::Builder::new()
            .prefix("gke-service-account-")
            .suffix(".json")
            .tempfile()?;
        store
            .read_into_file(SECRET_PATH, SERVICE_ACCOUNT_FIELD, key_file.path())
            .await?;

        info!("Activating service account");
        let ctx = self
            .ctx
            .clone()
            .with("KeyFile", key_file.path().display().to_string());
        Command::new(ACTIVATE_SERVICE_ACCOUNT)
            .as_template(&ctx)
            .without_streaming()
            .run(self.runner())
            .await
    }

    async fn set_max_map_count(&self) -> Result<()> {
        info!("Setting vm.max_map_count on cluster nodes");
        let lines = self
            .command(LIST_INSTANCES)
            .without_streaming()
            .stdout_only()
            .output_lines(self.runner())
            .await?;
        let nodes = parse_all("instance", &lines)?;

        for node in &nodes {
            Command::new(SET_MAX_MAP_COUNT)
                .as_template(&node.context(&self.ctx))
                .run(self.runner())
                .await?;
        }
        Ok(())
    }

    async fn patch_storage_class(&self) -> Result<()> {
        info!("Patching storage class");
        let already_patched = Command::new(LIST_STORAGE_CLASSES)
            .without_streaming()
            .output_contains_any(self.runner(), &[CUSTOMIZED_CLASS])
            .await?;
        if already_patched {
            info!("Storage class {} already exists", CUSTOMIZED_CLASS);
            return Ok(());
        }

        let mut default_class = None;
        for annotation in DEFAULT_CLASS_ANNOTATIONS {
            let query = RenderContext::new().with("Annotation", jsonpath_key(annotation));
            let names = Command::new(DEFAULT_STORAGE_CLASS)
                .as_template(&query)
                .without_streaming()
                .stdout_only()
                .output(self.runner())
                .await?;
            if let Some(name) = names.split_whitespace().next() {
                default_class = Some(name.to_string());
                break;
            }
        }
        let name = default_class.ok_or(DriverError::DefaultStorageClassNotFound)?;

        let class = RenderContext::new().with("StorageClass", name.as_str());
        let manifest = Command::new(GET_STORAGE_CLASS)
            .as_template(&class)
            .without_streaming()
            .stdout_only()
            .output(self.runner())
            .await?;

        Command::new(APPLY_STDIN)
            .with_stdin(customize(&manifest, CUSTOMIZED_CLASS)?)
            .run(self.runner())
            .await?;

        info!("Demoting storage class {}", name);
        Command::new(PATCH_STORAGE_CLASS)
            .as_template(&class.with("Patch", demote_patch()))
            .run(self.runner())
            .await
    }

    async fn delete_unattached_disks(&self) -> Result<()> {
        let lines = self
            .command(LIST_UNATTACHED_DISKS)
            .without_streaming()
            .stdout_only()
            .output_lines(self.runner())
            .await?;
        let disks = parse_all("disk", &lines)?;

        info!("Deleting {} unattached disks", disks.len());
        for disk in &disks {
            Command::new(DELETE_DISK)
                .as_template(&disk.context(&self.ctx))
                .run(self.runner())
                .await?;
        }
        Ok(())
    }
}

impl fmt::Debug for GkeDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GkeDriver")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Lifecycle for GkeDriver {
    fn plan(&self) -> &Plan {
        &self.plan
    }

    async fn authenticate(&self) -> Result<()> {
        if self.plan.service_account {
            return self.activate_service_account().await;
        }

        let accounts = Command::new(LIST_ACCOUNTS)
            .without_streaming()
            .stdout_only()
            .output(self.runner())
            .await?;
        if accounts.is_empty() {
            Command::new(LOGIN_INTERACTIVE).run(self.runner()).await
        } else {
            info!("Already logged in to gcloud");
            Ok(())
        }
    }

    async fn exists(&self) -> Result<bool> {
        info!("Checking if cluster {} exists", self.params.cluster_name);
        let describe = self.command(DESCRIBE).without_streaming();
        NOT_FOUND.probe(&describe, self.runner()).await
    }

    async fn pre_create(&self) -> Result<()> {
        self.command(CONFIG_SSH).run(self.runner()).await
    }

    async fn create(&self) -> Result<()> {
        let template = if self.plan.gke.psp {
            format!("{CREATE}{PSP_FLAG}")
        } else {
            CREATE.to_string()
        };
        self.command(&template).run(self.runner()).await
    }

    async fn post_create(&self) -> Result<()> {
        let user = Command::new(ACTIVE_ACCOUNT)
            .without_streaming()
            .stdout_only()
            .first_line(self.runner())
            .await?;

        info!("Binding cluster-admin to {}", user);
        Command::new(BIND_CLUSTER_ADMIN)
            .as_template(&self.ctx.clone().with("User", user))
            .run(self.runner())
            .await
    }

    async fn get_credentials(&self) -> Result<()> {
        info!("Fetching credentials for {}", self.params.cluster_name);
        self.command(GET_CREDENTIALS).run(self.runner()).await
    }

    async fn post_credentials(&self) -> Result<()> {
        if self.plan.gke.vm_max_map_count {
            self.set_max_map_count().await?;
        }
        self.command(CONFIGURE_DOCKER).run(self.runner()).await?;
        self.patch_storage_class().await
    }

    async fn delete(&self) -> Result<()> {
        NOT_FOUND
            .delete(&self.command(DELETE), self.runner())
            .await?;
        self.delete_unattached_disks().await
    }
}
