//! Secret resolution.
//!
//! Drivers read credentials and provider defaults from a key/value secret
//! store through [`SecretResolver`]. A [`SecretResolverFactory`] turns the
//! plan's [`VaultInfo`] into a connected resolver; [`VaultConnector`] is the
//! production implementation backed by HashiCorp Vault.

mod client;

#[cfg(test)]
pub(crate) mod fake;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::VaultInfo;
use crate::error::Result;

pub use client::{VaultClient, VaultConnector};

/// Read access to a key/value secret store.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    /// Returns `field` of the secret stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret or the field does not exist.
    async fn get(&self, path: &str, field: &str) -> Result<String>;

    /// Returns several fields of one secret, in the order requested.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret or any field does not exist.
    async fn get_many(&self, path: &str, fields: &[&str]) -> Result<Vec<String>> {
        let mut values = Vec::with_capacity(fields.len());
        for field in fields {
            values.push(self.get(path, field).await?);
        }
        Ok(values)
    }

    /// Writes `field` of the secret at `path` into `dest`.
    ///
    /// # Errors
    ///
    /// Returns an error if the field cannot be read or the file written.
    async fn read_into_file(&self, path: &str, field: &str, dest: &Path) -> Result<()> {
        let value = self.get(path, field).await?;
        tokio::fs::write(dest, value).await?;
        debug!("Wrote secret field {} to {}", field, dest.display());
        Ok(())
    }
}

/// Builds connected resolvers.
#[async_trait]
pub trait SecretResolverFactory: Send + Sync {
    /// Connects to the store described by `info`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable or login fails.
    async fn connect(&self, info: &VaultInfo) -> Result<Arc<dyn SecretResolver>>;
}
