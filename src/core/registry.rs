//! Model registry (C5, spec.md §4.5): the in-memory mapping from public
//! model id to provider id + upstream id. Grounded in the teacher's
//! `core/providers/provider_registry.rs` shape, translated from an instance
//! map to a model-catalog map with the explicit reader/writer locking
//! spec.md §4.5 calls for ("no fuzzy matching, no prefix rules ... the
//! registry is the single source of truth").

use std::collections::HashMap;
use std::sync::RwLock;

use crate::core::types::ModelDefinition;
use crate::error::GatewayError;

/// Thread-safe map from public model id to model definition. Readers take
/// a shared lock; writers (seed, per-provider catalog addition, `reload`)
/// take an exclusive lock (spec.md §4.5, §5 "Shared resources").
#[derive(Default)]
pub struct ModelRegistry {
    models: RwLock<HashMap<String, ModelDefinition>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            models: RwLock::new(HashMap::new()),
        }
    }

    /// Resolves a public model id to `(provider_id, upstream_id)`. When
    /// `upstream_id` is empty on the stored definition, the public id is
    /// used verbatim (spec.md §4.5).
    pub fn resolve(&self, public_id: &str) -> Result<(String, String), GatewayError> {
        let models = self.models.read().expect("model registry lock poisoned");
        let def = models
            .get(public_id)
            .ok_or_else(|| GatewayError::ModelNotFound(public_id.to_string()))?;
        Ok((def.provider_id.clone(), def.resolved_upstream_id().to_string()))
    }

    pub fn get(&self, public_id: &str) -> Option<ModelDefinition> {
        self.models.read().expect("model registry lock poisoned").get(public_id).cloned()
    }

    /// Inserts or overwrites a single model definition, keyed by its
    /// public id (spec.md §4.5 "per-provider catalog addition").
    pub fn insert(&self, model: ModelDefinition) {
        self.models
            .write()
            .expect("model registry lock poisoned")
            .insert(model.public_id.clone(), model);
    }

    pub fn insert_many(&self, models: impl IntoIterator<Item = ModelDefinition>) {
        let mut guard = self.models.write().expect("model registry lock poisoned");
        for model in models {
            guard.insert(model.public_id.clone(), model);
        }
    }

    /// Atomically swaps the entire index for `models` (spec.md §4.5
    /// "`Reload` swaps the entire index atomically").
    pub fn reload(&self, models: Vec<ModelDefinition>) {
        let mut guard = self.models.write().expect("model registry lock poisoned");
        *guard = models.into_iter().map(|m| (m.public_id.clone(), m)).collect();
    }

    /// All model definitions, for catalog listing (spec.md §4.6
    /// `ListAllModels`).
    pub fn all(&self) -> Vec<ModelDefinition> {
        self.models.read().expect("model registry lock poisoned").values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Modality, ModelSource, Pricing};
    use chrono::Utc;

    fn sample(public_id: &str, provider_id: &str, upstream_id: &str) -> ModelDefinition {
        ModelDefinition {
            public_id: public_id.to_string(),
            display_name: public_id.to_string(),
            provider_id: provider_id.to_string(),
            upstream_id: upstream_id.to_string(),
            context_window: 4096,
            max_output: 4096,
            modalities: vec![Modality::Text],
            pricing: Pricing::default(),
            enabled: true,
            source: ModelSource::Manual,
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn resolve_uses_public_id_when_upstream_id_empty() {
        let registry = ModelRegistry::new();
        registry.insert(sample("openai/gpt-4o", "openai-main", ""));
        let (provider_id, upstream_id) = registry.resolve("openai/gpt-4o").unwrap();
        assert_eq!(provider_id, "openai-main");
        assert_eq!(upstream_id, "openai/gpt-4o");
    }

    #[test]
    fn resolve_unknown_model_fails_not_found() {
        let registry = ModelRegistry::new();
        let err = registry.resolve("nope").unwrap_err();
        assert!(matches!(err, GatewayError::ModelNotFound(_)));
    }

    #[test]
    fn reload_swaps_entire_index() {
        let registry = ModelRegistry::new();
        registry.insert(sample("a/x", "a", "x"));
        registry.reload(vec![sample("b/y", "b", "y")]);
        assert!(registry.get("a/x").is_none());
        assert!(registry.get("b/y").is_some());
    }

    #[test]
    fn empty_filter_returns_all_enabled_models() {
        let registry = ModelRegistry::new();
        registry.insert(sample("a/x", "a", "x"));
        registry.insert(sample("b/y", "b", "y"));
        assert_eq!(registry.all().len(), 2);
    }
}
