// ============================================================================
// Linting
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // Public items should be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(nonstandard_style)]           // Non-standard code style is forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Cluster Deployer
//!
//! Idempotent creation and teardown of ephemeral Kubernetes clusters on
//! Azure (AKS) and Google Cloud (GKE) for integration test runs.
//!
//! ## Overview
//!
//! A run selects one [`config::Plan`] from a plans file. The plan names a
//! provider and an operation, and the provider's driver walks the same
//! lifecycle every time:
//!
//! 1. **Authenticate** against the provider CLI (`az` or `gcloud`)
//! 2. **Probe** whether the cluster already exists
//! 3. **Create**, **delete**, or do nothing when the cluster is already in the
//!    requested state
//! 4. **Post-configure** and fetch credentials for `kubectl`
//!
//! Every provider interaction is a templated shell command, so drivers are
//! tested against a scripted [`exec::CommandRunner`] instead of a cloud.
//! Credentials come from Vault through a [`vault::SecretResolver`].
//!
//! ## Modules
//!
//! - [`config`]: Plans file, run config and plan resolution
//! - [`driver`]: Driver registry and the AKS and GKE lifecycles
//! - [`exec`]: Command templates and the shell runner
//! - [`vault`]: Vault login and secret lookup
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! plans:
//!   - id: gke-ci
//!     provider: gke
//!     operation: create
//!     clusterName: ci-e2e
//!     kubernetesVersion: "1.30"
//!     machineType: n1-standard-8
//!     serviceAccount: true
//!     vaultInfo:
//!       address: https://vault.example.com
//!     gke:
//!       region: europe-west1
//!       nodeCountPerZone: 1
//!       vmMapMax: true
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod driver;
pub mod error;
pub mod exec;
pub mod vault;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, Plan, PlansFile, RunConfig};
pub use driver::{ClusterDriver, Collaborators, DriverFactory, ExecutionReport, Outcome, registry};
pub use error::{DeployerError, Result};
pub use exec::{Command, CommandRunner, ShellRunner};
pub use vault::{SecretResolver, VaultClient, VaultConnector};
