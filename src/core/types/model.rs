//! Provider instance and model definition records (spec.md §3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::common::Modality;

/// How a model definition entered the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSource {
    Manual,
    Auto,
}

/// Per-unit pricing, expressed as currency units (not micro-currency) per
/// token/request/image; `None` means the rate is unknown or not applicable.
/// The gateway converts to micro-currency only when computing a usage
/// record's cost (spec.md §3 "Request log").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pricing {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_per_token: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_per_token: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_per_unit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_flat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_per_token: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write_per_token: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_per_token: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_search_flat: Option<f64>,
}

/// The canonical, rich model definition (spec.md §9, Open Question: "the
/// richer form as canonical"). Mapped down to a thinner shape only at the
/// HTTP edge (`server::handlers::list_models`, via [`ModelView`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub public_id: String,
    pub display_name: String,
    pub provider_id: String,
    /// What is sent to the vendor. Empty means "use the public id verbatim"
    /// (spec.md §4.5).
    pub upstream_id: String,
    pub context_window: u32,
    pub max_output: u32,
    pub modalities: Vec<Modality>,
    pub pricing: Pricing,
    pub enabled: bool,
    pub source: ModelSource,
    pub last_updated: DateTime<Utc>,
}

impl ModelDefinition {
    pub fn resolved_upstream_id(&self) -> &str {
        if self.upstream_id.is_empty() {
            &self.public_id
        } else {
            &self.upstream_id
        }
    }
}

/// The thin, OpenAI-style shape `GET /api/v1/models` actually renders
/// (spec.md §9 Open Question: "maps it down to the simpler ... shape at
/// the HTTP edge only"). Grounded in the teacher's
/// `core::models::openai::Model` (`id`, `object`, `created`, `owned_by`),
/// extended with `context_window`/`max_output`/`modalities` since those
/// are exactly the fields `ListAllModels`'s filter (spec.md §4.6) can
/// select on and callers otherwise have no way to see.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelView {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub owned_by: String,
    pub context_window: u32,
    pub max_output: u32,
    pub modalities: Vec<Modality>,
}

impl From<&ModelDefinition> for ModelView {
    fn from(def: &ModelDefinition) -> Self {
        ModelView {
            id: def.public_id.clone(),
            object: "model",
            created: def.last_updated.timestamp(),
            owned_by: def.provider_id.clone(),
            context_window: def.context_window,
            max_output: def.max_output,
            modalities: def.modalities.clone(),
        }
    }
}

/// The operator-configured shape of an upstream vendor connection
/// (spec.md §3 "Provider instance", §6 "Provider configuration").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInstance {
    pub id: String,
    pub vendor_type: String,
    pub base_url: String,
    pub credential: String,
    #[serde(default)]
    pub options: HashMap<String, String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}
