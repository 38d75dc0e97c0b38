//! In-memory secret store for tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::config::VaultInfo;
use crate::error::{Result, SecretError};

use super::{SecretResolver, SecretResolverFactory};

/// Fixed secrets keyed by path and field.
#[derive(Debug, Default)]
pub struct StaticSecrets {
    values: HashMap<(String, String), String>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: &str, field: &str, value: &str) -> Self {
        self.values
            .insert((path.to_string(), field.to_string()), value.to_string());
        self
    }
}

#[async_trait]
impl SecretResolver for StaticSecrets {
    async fn get(&self, path: &str, field: &str) -> Result<String> {
        self.values
            .get(&(path.to_string(), field.to_string()))
            .cloned()
            .ok_or_else(|| {
                SecretError::MissingField {
                    path: path.to_string(),
                    field: field.to_string(),
                }
                .into()
            })
    }
}

/// Hands out a shared [`StaticSecrets`] and counts connections.
#[derive(Debug)]
pub struct StaticConnector {
    secrets: Option<Arc<StaticSecrets>>,
    connects: AtomicUsize,
}

impl StaticConnector {
    pub fn new(secrets: StaticSecrets) -> Self {
        Self {
            secrets: Some(Arc::new(secrets)),
            connects: AtomicUsize::new(0),
        }
    }

    /// A connector whose store can never be reached.
    pub fn unreachable() -> Self {
        Self {
            secrets: None,
            connects: AtomicUsize::new(0),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretResolverFactory for StaticConnector {
    async fn connect(&self, info: &VaultInfo) -> Result<Arc<dyn SecretResolver>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match &self.secrets {
            Some(secrets) => Ok(Arc::clone(secrets) as Arc<dyn SecretResolver>),
            None => Err(SecretError::network(format!("connection refused: {}", info.address)).into()),
        }
    }
}
