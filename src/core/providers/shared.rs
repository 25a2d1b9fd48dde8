//! Helpers shared by every adapter (spec.md §4.4 "Common adapter rules").

use chrono::Utc;

use crate::config::ProviderConfig;
use crate::core::http::UpstreamError;
use crate::core::types::{ModelDefinition, ModelSource};
use crate::error::GatewayError;

/// Maps an `UpstreamError` to the gateway's error kind (spec.md §4.4
/// "Adapter error mapping"): 4xx carries the vendor message through; network
/// and decode errors become `upstream-failure` with status 502.
pub fn map_upstream_error(err: UpstreamError) -> GatewayError {
    let (vendor_type, vendor_code, vendor_param, message) = extract_vendor_error_fields(&err.body);
    let status = if (400..500).contains(&err.status) {
        err.status
    } else {
        502
    };
    GatewayError::UpstreamFailure {
        status,
        message: message.unwrap_or(err.body),
        vendor_type,
        vendor_code,
        vendor_param,
    }
}

/// OpenAI-shaped vendor error bodies look like
/// `{"error":{"message","type","param","code"}}` (spec.md §4.4). Other
/// vendors' bodies fall back to the raw text as the message.
fn extract_vendor_error_fields(raw_body: &str) -> (Option<String>, Option<String>, Option<String>, Option<String>) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(raw_body) else {
        return (None, None, None, None);
    };
    let Some(error) = value.get("error") else {
        return (None, None, None, None);
    };
    let message = error.get("message").and_then(|v| v.as_str()).map(str::to_string);
    let vendor_type = error.get("type").and_then(|v| v.as_str()).map(str::to_string);
    let vendor_code = error.get("code").and_then(|v| v.as_str()).map(str::to_string);
    let vendor_param = error.get("param").and_then(|v| v.as_str()).map(str::to_string);
    (vendor_type, vendor_code, vendor_param, message)
}

/// Expands a provider's config-seeded model list into registry-ready
/// `ModelDefinition`s, namespacing the public id as `<provider-id>/<name>`.
pub fn seeded_model_definitions(provider: &ProviderConfig) -> Vec<ModelDefinition> {
    provider
        .models
        .iter()
        .map(|seed| ModelDefinition {
            public_id: format!("{}/{}", provider.id, seed.name),
            display_name: seed.display_name.clone().unwrap_or_else(|| seed.name.clone()),
            provider_id: provider.id.clone(),
            upstream_id: if seed.upstream_id.is_empty() {
                seed.name.clone()
            } else {
                seed.upstream_id.clone()
            },
            context_window: seed.context_window,
            max_output: seed.max_output,
            modalities: seed.modalities.clone(),
            pricing: seed.pricing.clone(),
            enabled: seed.enabled,
            source: ModelSource::Manual,
            last_updated: Utc::now(),
        })
        .collect()
}

/// Resolves the timeout duration from a provider config's `timeout` string
/// (e.g. `"60s"`), falling back to `default_secs`.
pub fn resolve_timeout(provider: &ProviderConfig, default_secs: u64) -> std::time::Duration {
    let secs = provider
        .timeout
        .as_deref()
        .and_then(|raw| raw.strip_suffix('s'))
        .and_then(|digits| digits.parse::<u64>().ok())
        .unwrap_or(default_secs);
    std::time::Duration::from_secs(secs)
}
