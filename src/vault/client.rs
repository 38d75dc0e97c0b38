//! HashiCorp Vault client.
//!
//! Reads KV secrets over the HTTP API. Both KV v1 (`data`) and KV v2
//! (`data.data`) response shapes are accepted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::config::VaultInfo;
use crate::error::{ConfigError, Result, SecretError};

use super::{SecretResolver, SecretResolverFactory};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Header carrying the client token.
const TOKEN_HEADER: &str = "X-Vault-Token";

/// Vault KV client.
#[derive(Clone)]
pub struct VaultClient {
    /// HTTP client.
    client: Client,
    /// Base address without trailing slash.
    address: String,
    /// Client token.
    token: String,
}

/// AppRole login body.
#[derive(Debug, Serialize)]
struct AppRoleLogin<'a> {
    role_id: &'a str,
    secret_id: &'a str,
}

/// GitHub login body.
#[derive(Debug, Serialize)]
struct GithubLogin<'a> {
    token: &'a str,
}

/// Login response.
#[derive(Debug, Deserialize)]
struct LoginResponse {
    auth: LoginAuth,
}

#[derive(Debug, Deserialize)]
struct LoginAuth {
    client_token: String,
}

/// Secret read response.
#[derive(Debug, Deserialize)]
struct SecretResponse {
    data: Option<Map<String, Value>>,
}

impl std::fmt::Debug for VaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultClient")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl VaultClient {
    /// Creates a client that authenticates with an existing token.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(address: &str, token: &str) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            address: address.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Logs in with the credentials in `info`.
    ///
    /// An explicit token wins, then AppRole, then GitHub.
    ///
    /// # Errors
    ///
    /// Returns an error if no credentials are configured or login fails.
    pub async fn login(info: &VaultInfo) -> Result<Self> {
        if let Some(token) = &info.token {
            return Self::new(&info.address, token);
        }

        let client = http_client()?;
        let address = info.address.trim_end_matches('/');

        let token = match (&info.role_id, &info.secret_id, &info.github_token) {
            (Some(role_id), Some(secret_id), _) => {
                let body = AppRoleLogin { role_id, secret_id };
                login_with(&client, address, "approle", &body).await?
            }
            (_, _, Some(github_token)) => {
                let body = GithubLogin {
                    token: github_token,
                };
                login_with(&client, address, "github", &body).await?
            }
            _ => {
                return Err(ConfigError::MissingVaultCredentials {
                    address: info.address.clone(),
                }
                .into());
            }
        };

        Ok(Self {
            client,
            address: address.to_string(),
            token,
        })
    }

    /// Reads the secret at `path` and returns its fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret does not exist or the request fails.
    pub async fn read(&self, path: &str) -> Result<Map<String, Value>> {
        let url = format!("{}/v1/{}", self.address, path.trim_start_matches('/'));
        trace!("Reading secret {}", path);

        let response = self
            .client
            .get(&url)
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await
            .map_err(|e| SecretError::network(format!("Request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(not_found(path));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SecretError::RequestFailed {
                status: status.as_u16(),
                message: body,
            }
            .into());
        }

        let secret: SecretResponse = response
            .json()
            .await
            .map_err(|e| SecretError::network(format!("Failed to parse response: {e}")))?;

        let mut data = secret.data.ok_or_else(|| not_found(path))?;

        // KV v2 nests the fields under data.data next to data.metadata.
        if data.contains_key("metadata") {
            if let Some(Value::Object(inner)) = data.remove("data") {
                data = inner;
            }
        }

        debug!("Read secret {} ({} fields)", path, data.len());
        Ok(data)
    }
}

#[async_trait]
impl SecretResolver for VaultClient {
    async fn get(&self, path: &str, field: &str) -> Result<String> {
        let data = self.read(path).await?;
        extract(&data, path, field)
    }

    async fn get_many(&self, path: &str, fields: &[&str]) -> Result<Vec<String>> {
        let data = self.read(path).await?;
        fields
            .iter()
            .map(|field| extract(&data, path, field))
            .collect()
    }
}

/// Connects to Vault with the credentials of a plan.
#[derive(Debug, Clone, Default)]
pub struct VaultConnector;

impl VaultConnector {
    /// Creates a new connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SecretResolverFactory for VaultConnector {
    async fn connect(&self, info: &VaultInfo) -> Result<Arc<dyn SecretResolver>> {
        let client = VaultClient::login(info).await?;
        debug!("Connected to Vault at {}", client.address);
        Ok(Arc::new(client))
    }
}

fn http_client() -> Result<Client> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
        .build()
        .map_err(|e| SecretError::network(format!("Failed to create HTTP client: {e}")))?)
}

async fn login_with<B: Serialize + Sync>(
    client: &Client,
    address: &str,
    method: &'static str,
    body: &B,
) -> Result<String> {
    let url = format!("{address}/v1/auth/{method}/login");
    debug!("Logging in to Vault via {}", method);

    let response = client
        .post(&url)
        .json(body)
        .send()
        .await
        .map_err(|e| SecretError::network(format!("Request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SecretError::LoginFailed {
            method,
            message: format!("{status}: {body}"),
        }
        .into());
    }

    let login: LoginResponse = response.json().await.map_err(|e| SecretError::LoginFailed {
        method,
        message: format!("Failed to parse response: {e}"),
    })?;

    Ok(login.auth.client_token)
}

fn extract(data: &Map<String, Value>, path: &str, field: &str) -> Result<String> {
    match data.get(field) {
        Some(Value::String(value)) => Ok(value.clone()),
        Some(_) => Err(SecretError::NotAString {
            path: path.to_string(),
            field: field.to_string(),
        }
        .into()),
        None => Err(SecretError::MissingField {
            path: path.to_string(),
            field: field.to_string(),
        }
        .into()),
    }
}

fn not_found(path: &str) -> crate::error::DeployerError {
    SecretError::NotFound {
        path: path.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeployerError;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const AZR_PATH: &str = "secret/devops-ci/cloud-on-k8s/ci-azr-k8s-operator";

    fn token_info(server: &MockServer) -> VaultInfo {
        VaultInfo {
            address: server.uri(),
            token: Some(String::from("s.root")),
            ..VaultInfo::default()
        }
    }

    async fn mount_azr_secret(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path(format!("/v1/{AZR_PATH}")))
            .and(header(TOKEN_HEADER, "s.root"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "appId": "app-123",
                    "password": "pw",
                    "tenant": "tenant-1",
                    "node-count": 3
                }
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_get_with_token() {
        let server = MockServer::start().await;
        mount_azr_secret(&server).await;

        let client = VaultClient::login(&token_info(&server)).await.unwrap();
        assert_eq!(client.get(AZR_PATH, "appId").await.unwrap(), "app-123");
    }

    #[tokio::test]
    async fn test_get_many_reads_once_in_order() {
        let server = MockServer::start().await;
        mount_azr_secret(&server).await;

        let client = VaultClient::login(&token_info(&server)).await.unwrap();
        let values = client
            .get_many(AZR_PATH, &["tenant", "appId", "password"])
            .await
            .unwrap();
        assert_eq!(values, vec!["tenant-1", "app-123", "pw"]);
    }

    #[tokio::test]
    async fn test_missing_and_non_string_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/v1/{AZR_PATH}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "node-count": 3 }
            })))
            .mount(&server)
            .await;

        let client = VaultClient::new(&server.uri(), "s.root").unwrap();
        let missing = client.get(AZR_PATH, "acr-name").await.unwrap_err();
        assert!(matches!(
            missing,
            DeployerError::Secret(SecretError::MissingField { ref field, .. }) if field == "acr-name"
        ));

        let wrong_type = client.get(AZR_PATH, "node-count").await.unwrap_err();
        assert!(matches!(wrong_type, DeployerError::Secret(SecretError::NotAString { .. })));
    }

    #[tokio::test]
    async fn test_not_found_secret() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "errors": [] })))
            .mount(&server)
            .await;

        let client = VaultClient::new(&server.uri(), "s.root").unwrap();
        let err = client.get("secret/missing", "x").await.unwrap_err();
        assert!(matches!(err, DeployerError::Secret(SecretError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_kv_v2_shape() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/kv/data/ci"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "data": { "gcloud-project": "elastic-ci" },
                    "metadata": { "version": 2 }
                }
            })))
            .mount(&server)
            .await;

        let client = VaultClient::new(&server.uri(), "s.root").unwrap();
        assert_eq!(client.get("kv/data/ci", "gcloud-project").await.unwrap(), "elastic-ci");
    }

    #[tokio::test]
    async fn test_approle_login() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/approle/login"))
            .and(body_json(json!({ "role_id": "role", "secret_id": "secret" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "auth": { "client_token": "s.approle" }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/ci"))
            .and(header(TOKEN_HEADER, "s.approle"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "tenant": "t" }
            })))
            .mount(&server)
            .await;

        let info = VaultInfo {
            address: format!("{}/", server.uri()),
            role_id: Some(String::from("role")),
            secret_id: Some(String::from("secret")),
            ..VaultInfo::default()
        };
        let resolver = VaultConnector::new().connect(&info).await.unwrap();
        assert_eq!(resolver.get("secret/ci", "tenant").await.unwrap(), "t");
    }

    #[tokio::test]
    async fn test_github_login_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/github/login"))
            .respond_with(ResponseTemplate::new(403).set_body_string("permission denied"))
            .mount(&server)
            .await;

        let info = VaultInfo {
            address: server.uri(),
            github_token: Some(String::from("ghp_x")),
            ..VaultInfo::default()
        };
        let err = VaultClient::login(&info).await.unwrap_err();
        assert!(matches!(
            err,
            DeployerError::Secret(SecretError::LoginFailed { method: "github", .. })
        ));
    }

    #[tokio::test]
    async fn test_no_credentials() {
        let info = VaultInfo {
            address: String::from("http://127.0.0.1:1"),
            ..VaultInfo::default()
        };
        let err = VaultClient::login(&info).await.unwrap_err();
        assert!(matches!(
            err,
            DeployerError::Config(ConfigError::MissingVaultCredentials { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_into_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/gcp"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "service-account": "{\"type\":\"service_account\"}" }
            })))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let dest = dir.path().join("key.json");
        let client = VaultClient::new(&server.uri(), "s.root").unwrap();
        client
            .read_into_file("secret/gcp", "service-account", &dest)
            .await
            .unwrap();

        let written = std::fs::read_to_string(&dest).unwrap();
        assert_eq!(written, "{\"type\":\"service_account\"}");
    }
}
