//! Provider to factory registry.
//!
//! The process-wide registry is built on first use from every built-in
//! factory and is read-only afterwards.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::config::{Plan, Provider};
use crate::error::{ConfigError, Result};

use super::{AksFactory, ClusterDriver, Collaborators, DriverFactory, GkeFactory};

static REGISTRY: LazyLock<DriverRegistry> = LazyLock::new(|| {
    DriverRegistry::builder()
        .register(Box::new(AksFactory))
        .register(Box::new(GkeFactory))
        .build()
});

/// Returns the process-wide registry.
#[must_use]
pub fn registry() -> &'static DriverRegistry {
    &REGISTRY
}

/// Maps providers to their driver factories.
pub struct DriverRegistry {
    factories: BTreeMap<Provider, Box<dyn DriverFactory>>,
}

/// Collects factories before the registry is frozen.
#[derive(Default)]
pub struct RegistryBuilder {
    factories: BTreeMap<Provider, Box<dyn DriverFactory>>,
}

impl RegistryBuilder {
    /// Adds a factory.
    ///
    /// # Panics
    ///
    /// Panics if a factory for the same provider is already registered.
    #[must_use]
    pub fn register(mut self, factory: Box<dyn DriverFactory>) -> Self {
        let provider = factory.provider();
        let previous = self.factories.insert(provider, factory);
        assert!(previous.is_none(), "driver for {provider} registered twice");
        self
    }

    /// Freezes the registry.
    #[must_use]
    pub fn build(self) -> DriverRegistry {
        DriverRegistry {
            factories: self.factories,
        }
    }
}

impl DriverRegistry {
    /// Starts an empty registry.
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Returns the factory for `provider`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ProviderNotRegistered`] if none is registered.
    pub fn factory_for(&self, provider: Provider) -> Result<&dyn DriverFactory> {
        self.factories
            .get(&provider)
            .map(|factory| &**factory)
            .ok_or_else(|| ConfigError::ProviderNotRegistered(provider.to_string()).into())
    }

    /// Returns the factory for a provider identifier such as `"gke"`.
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier is unknown or not registered.
    pub fn factory_for_id(&self, id: &str) -> Result<&dyn DriverFactory> {
        self.factory_for(id.parse()?)
    }

    /// Registered providers, in order.
    pub fn providers(&self) -> impl Iterator<Item = Provider> + '_ {
        self.factories.keys().copied()
    }

    /// Builds the driver for `plan`.
    ///
    /// # Errors
    ///
    /// Returns an error if no factory is registered or construction fails.
    pub async fn create_driver(
        &self,
        plan: Plan,
        collaborators: &Collaborators,
    ) -> Result<ClusterDriver> {
        self.factory_for(plan.provider)?
            .create(plan, collaborators)
            .await
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}
