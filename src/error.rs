//! Error types for the cluster deployer.
//!
//! This module provides the error hierarchy for every stage of a cluster
//! lifecycle: configuration, secret resolution, command execution,
//! template rendering and provider-specific driver steps.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the cluster deployer.
#[derive(Debug, Error)]
pub enum DeployerError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Secret store errors.
    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    /// External command errors.
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// Command template errors.
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    /// Provider driver errors.
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// The operation is neither `create` nor `delete`.
    #[error("unknown operation {0}")]
    UnknownOperation(String),

    /// The provider identifier is not known.
    #[error("unknown provider {0}")]
    UnknownProvider(String),

    /// No factory is registered for the provider.
    #[error("no driver registered for provider {0}")]
    ProviderNotRegistered(String),

    /// The requested plan id does not exist in the plans file.
    #[error("plan {id} not found")]
    PlanNotFound {
        /// Requested plan id.
        id: String,
    },

    /// No plan id was given on the command line or in the run config.
    #[error("no plan selected: pass --plan-id or set `id` in the run config")]
    NoPlanSelected,

    /// A required field is empty and could not be resolved from the secret store.
    #[error("required field {field} is empty and could not be resolved")]
    UnresolvedField {
        /// Name of the unresolved field.
        field: String,
    },

    /// The plan needs the secret store but carries no vault information.
    #[error("plan requires a secret store but no vault information is configured")]
    MissingVaultInfo,

    /// Vault information carries no usable credentials.
    #[error("vault at {address} has no token, AppRole or GitHub credentials configured")]
    MissingVaultCredentials {
        /// Vault address.
        address: String,
    },
}

/// Secret store errors.
#[derive(Debug, Error)]
pub enum SecretError {
    /// Network error talking to the secret store.
    #[error("Network error communicating with Vault: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// The secret store rejected the request.
    #[error("Vault request failed: {status} - {message}")]
    RequestFailed {
        /// HTTP status code.
        status: u16,
        /// Response body or error list.
        message: String,
    },

    /// Login against the secret store failed.
    #[error("Vault login via {method} failed: {message}")]
    LoginFailed {
        /// Auth method (approle, github).
        method: &'static str,
        /// Description of the failure.
        message: String,
    },

    /// The secret path holds no data.
    #[error("secret {path} not found")]
    NotFound {
        /// Secret path.
        path: String,
    },

    /// The secret exists but lacks the requested field.
    #[error("secret {path} has no field {field}")]
    MissingField {
        /// Secret path.
        path: String,
        /// Requested field.
        field: String,
    },

    /// The field is not a string.
    #[error("field {field} of secret {path} is not a string")]
    NotAString {
        /// Secret path.
        path: String,
        /// Requested field.
        field: String,
    },
}

/// External command errors.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The command could not be started.
    #[error("failed to spawn `{command}`: {message}")]
    SpawnFailed {
        /// Command template.
        command: String,
        /// Description of the failure.
        message: String,
    },

    /// The command exited with a non-zero status.
    #[error("`{command}` exited with {}: {output}", .code.map_or_else(|| String::from("signal"), |c| format!("status {c}")))]
    Failed {
        /// Command template.
        command: String,
        /// Exit code, if the process was not killed by a signal.
        code: Option<i32>,
        /// Tail of the captured output.
        output: String,
    },

    /// The command succeeded but produced no output where a value was required.
    #[error("`{command}` produced no output")]
    EmptyOutput {
        /// Command template.
        command: String,
    },
}

/// Command template errors.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The template does not parse.
    #[error("invalid template `{template}`: {message}")]
    Invalid {
        /// Template text.
        template: String,
        /// Parser message.
        message: String,
    },

    /// Rendering failed, typically on a variable missing from the context.
    #[error("failed to render `{template}`: {message}")]
    Render {
        /// Template text.
        template: String,
        /// Renderer message.
        message: String,
    },
}

/// Provider driver errors.
#[derive(Debug, Error)]
pub enum DriverError {
    /// A `name,zone` record did not have exactly two fields.
    #[error("{kind} record {raw:?} could not be parsed as name,zone")]
    MalformedRecord {
        /// Record kind (instance, disk).
        kind: &'static str,
        /// Offending raw line.
        raw: String,
    },

    /// No storage class carries a default annotation.
    #[error("default storageclass not found")]
    DefaultStorageClassNotFound,

    /// The default storage class manifest could not be rewritten.
    #[error("storage class manifest is invalid: {message}")]
    InvalidManifest {
        /// Description of the problem.
        message: String,
    },
}

/// Result type alias for deployer operations.
pub type Result<T> = std::result::Result<T, DeployerError>;

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates an unresolved-field error.
    #[must_use]
    pub fn unresolved(field: impl Into<String>) -> Self {
        Self::UnresolvedField {
            field: field.into(),
        }
    }
}

impl SecretError {
    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }
}

impl DriverError {
    /// Creates a malformed record error.
    #[must_use]
    pub fn malformed(kind: &'static str, raw: impl Into<String>) -> Self {
        Self::MalformedRecord {
            kind,
            raw: raw.into(),
        }
    }
}
