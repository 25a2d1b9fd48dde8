//! Config validation, grounded in the teacher's
//! `src/config/validation/config_validators.rs` pattern of a single
//! top-level `validate` entry point.

use std::collections::HashSet;

use super::{ConfigError, GatewayConfig};

pub fn validate(config: &GatewayConfig) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for provider in &config.providers {
        if !seen.insert(provider.id.clone()) {
            return Err(ConfigError::DuplicateProviderId(provider.id.clone()));
        }
        if provider.vendor_type.is_empty() {
            return Err(ConfigError::MissingField(format!("providers.{}.type", provider.id)));
        }
    }
    Ok(())
}
