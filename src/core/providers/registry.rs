//! Provider adapter factory registry (C3, spec.md §4.3, §9 "Provider
//! registry"). A process-wide map from vendor tag to factory, populated
//! during initialization and frozen thereafter — no hidden global mutation
//! at request time. Grounded in the teacher's
//! `core/providers/provider_registry.rs`, generalized from an instance
//! registry to a factory registry per spec.md §4.3.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{ProviderConfig, ServerConfig};
use crate::error::GatewayError;

use super::traits::ProviderAdapter;

pub type AdapterFactory =
    Arc<dyn Fn(&ProviderConfig, &ServerConfig) -> Result<Arc<dyn ProviderAdapter>, GatewayError> + Send + Sync>;

#[derive(Default)]
pub struct AdapterRegistry {
    factories: HashMap<&'static str, AdapterFactory>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registers a factory for `vendor_tag`. Fails fatally (returns an
    /// error the caller should treat as a boot-time panic) on a duplicate
    /// tag, per spec.md §4.3.
    pub fn register(&mut self, vendor_tag: &'static str, factory: AdapterFactory) -> Result<(), GatewayError> {
        if self.factories.contains_key(vendor_tag) {
            return Err(GatewayError::Internal(format!(
                "duplicate provider adapter registration for vendor tag '{vendor_tag}'"
            )));
        }
        self.factories.insert(vendor_tag, factory);
        Ok(())
    }

    /// Builds a concrete adapter instance from a provider configuration
    /// record, looking up the factory by `config.vendor_type`. `server`
    /// supplies the ambient timeout defaults (spec.md §3 "Ambient
    /// configuration") a provider's own `timeout` override takes precedence
    /// over.
    pub fn build(&self, config: &ProviderConfig, server: &ServerConfig) -> Result<Arc<dyn ProviderAdapter>, GatewayError> {
        let factory = self.factories.get(config.vendor_type.as_str()).ok_or_else(|| {
            GatewayError::Internal(format!("no adapter registered for vendor type '{}'", config.vendor_type))
        })?;
        factory(config, server)
    }
}
