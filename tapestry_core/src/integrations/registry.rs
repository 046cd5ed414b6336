use crate::integrations::traits::Integration;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Immutable map from provider key to its `Integration`, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct IntegrationRegistry {
    integrations: BTreeMap<String, Arc<Integration>>,
}

impl IntegrationRegistry {
    pub fn builder() -> IntegrationRegistryBuilder {
        IntegrationRegistryBuilder::default()
    }

    /// Unknown keys are a normal state (a dataset not yet bound), never an error.
    pub fn get(&self, key: &str) -> Option<Arc<Integration>> {
        self.integrations.get(key).cloned()
    }

    /// Resolve a dataset's optional binding.
    pub fn resolve(&self, key: Option<&str>) -> Option<Arc<Integration>> {
        key.and_then(|k| self.get(k))
    }

    /// Integrations sorted by key.
    pub fn list(&self) -> impl Iterator<Item = &Arc<Integration>> {
        self.integrations.values()
    }

    pub fn len(&self) -> usize {
        self.integrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.integrations.is_empty()
    }
}

#[derive(Default)]
pub struct IntegrationRegistryBuilder {
    integrations: BTreeMap<String, Arc<Integration>>,
}

impl IntegrationRegistryBuilder {
    pub fn register(mut self, integration: Integration) -> Result<Self> {
        if self.integrations.contains_key(&integration.key) {
            return Err(Error::Conflict(format!(
                "integration '{}' registered twice",
                integration.key
            )));
        }
        tracing::debug!(integration = %integration.key, "registered integration");
        self.integrations
            .insert(integration.key.clone(), Arc::new(integration));
        Ok(self)
    }

    pub fn build(self) -> IntegrationRegistry {
        IntegrationRegistry {
            integrations: self.integrations,
        }
    }
}
