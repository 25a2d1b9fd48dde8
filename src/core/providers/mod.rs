//! Provider adapters (C4, spec.md §4.4) and the factory registry that binds
//! a vendor tag to a concrete adapter constructor (C3, spec.md §4.3).

pub mod anthropic;
pub mod bfl;
pub mod google;
pub mod ollama;
pub mod openai;
pub mod registry;
pub mod shared;
pub mod thinking;
pub mod traits;

pub use registry::AdapterRegistry;
pub use traits::{ChatStream, ProviderAdapter};

/// Builds the frozen, process-wide adapter registry (spec.md §4.3 "The
/// registry is populated during process initialization; lookups are
/// read-only thereafter"). Each vendor tag is registered exactly once;
/// a duplicate tag is a boot-time programming error.
pub fn default_registry() -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    registry
        .register("openai", openai::factory())
        .expect("duplicate adapter registration for 'openai'");
    registry
        .register("anthropic", anthropic::factory())
        .expect("duplicate adapter registration for 'anthropic'");
    registry
        .register("google", google::factory())
        .expect("duplicate adapter registration for 'google'");
    registry
        .register("ollama", ollama::factory())
        .expect("duplicate adapter registration for 'ollama'");
    registry
        .register("bfl", bfl::factory())
        .expect("duplicate adapter registration for 'bfl'");
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_covers_every_spec_vendor_tag() {
        let registry = default_registry();
        let server = crate::config::ServerConfig::default();
        for tag in ["openai", "anthropic", "google", "ollama", "bfl"] {
            let config = crate::config::ProviderConfig {
                id: format!("{tag}-probe"),
                vendor_type: tag.to_string(),
                name: None,
                api_key: Some("test".to_string()),
                base_url: Some("http://localhost:0".to_string()),
                config: Default::default(),
                timeout: None,
                enabled: true,
                requires_auth: false,
                models: vec![],
            };
            assert!(registry.build(&config, &server).is_ok(), "factory for '{tag}' should build");
        }
    }
}
