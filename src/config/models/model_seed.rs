//! Static model catalog seeds (spec.md §3 "Model definitions: seeded from
//! config, optionally extended at registration from `Provider.Models()`").
//!
//! Not among spec.md §6's enumerated provider-config keys, because that
//! list covers the *connection* to a vendor; the catalog seed is a sibling
//! config section supplying the data the "Data Model" lifecycle rule
//! requires adapters without a live discovery endpoint (OpenAI-compatible,
//! Anthropic, Google, BFL) to return from `Models()`.

use serde::Deserialize;

use crate::core::types::{Modality, Pricing};

#[derive(Debug, Clone, Deserialize)]
pub struct ModelSeed {
    /// Suffix after the provider's vendor tag, e.g. `gpt-4o` becomes the
    /// public id `openai/gpt-4o`.
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// What is actually sent to the vendor; defaults to `name` when empty.
    #[serde(default)]
    pub upstream_id: String,
    #[serde(default = "default_context_window")]
    pub context_window: u32,
    #[serde(default = "default_max_output")]
    pub max_output: u32,
    #[serde(default = "default_modalities")]
    pub modalities: Vec<Modality>,
    #[serde(default)]
    pub pricing: Pricing,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_context_window() -> u32 {
    4096
}
fn default_max_output() -> u32 {
    4096
}
fn default_modalities() -> Vec<Modality> {
    vec![Modality::Text]
}
fn default_true() -> bool {
    true
}
