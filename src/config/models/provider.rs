//! Provider configuration record (spec.md §6 "Provider configuration").

use std::collections::HashMap;

use serde::Deserialize;

use super::model_seed::ModelSeed;

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub vendor_type: String,
    #[serde(default)]
    pub name: Option<String>,
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub config: HashMap<String, String>,
    #[serde(default)]
    pub timeout: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub requires_auth: bool,
    /// Catalog seed for adapters with no live discovery endpoint
    /// (spec.md §3 data-model lifecycle).
    #[serde(default)]
    pub models: Vec<ModelSeed>,
}

fn default_true() -> bool {
    true
}

impl ProviderConfig {
    /// Resolves `api_key`, following the `ENV:VARNAME` indirection
    /// (spec.md §6).
    pub fn resolved_credential(&self) -> Result<String, crate::config::ConfigError> {
        let raw = self
            .api_key
            .clone()
            .ok_or_else(|| crate::config::ConfigError::MissingField(format!("providers.{}.api_key", self.id)))?;
        resolve_env_indirection(&raw)
    }
}

/// Resolves a `ENV:VARNAME` indirected value, or returns the literal value
/// unchanged (teacher's `src/config/loader.rs` convention).
pub fn resolve_env_indirection(raw: &str) -> Result<String, crate::config::ConfigError> {
    match raw.strip_prefix("ENV:") {
        Some(var_name) => std::env::var(var_name)
            .map_err(|_| crate::config::ConfigError::MissingEnvVar(var_name.to_string())),
        None => Ok(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_credential_passes_through() {
        assert_eq!(resolve_env_indirection("sk-abc").unwrap(), "sk-abc");
    }

    #[test]
    fn env_indirection_reads_variable() {
        unsafe {
            std::env::set_var("GATEWAY_TEST_KEY", "sk-from-env");
        }
        assert_eq!(resolve_env_indirection("ENV:GATEWAY_TEST_KEY").unwrap(), "sk-from-env");
        unsafe {
            std::env::remove_var("GATEWAY_TEST_KEY");
        }
    }

    #[test]
    fn missing_env_var_is_an_error() {
        assert!(resolve_env_indirection("ENV:GATEWAY_DOES_NOT_EXIST").is_err());
    }
}
