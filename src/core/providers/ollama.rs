//! Ollama adapter (C4, spec.md §4.4 "Ollama" / §9 "Adapter composition").
//!
//! A wrapping struct around an `OpenAiAdapter` pointed at `<base>/v1`:
//! `chat`/`stream` delegate unchanged, `models`/`health` are overridden to
//! use Ollama's own discovery endpoints (`/api/tags` + `/api/show`,
//! `/api/version`). Grounded in the teacher's composition pattern for
//! OpenAI-compatible vendors, generalized per spec.md §9 ("Implement as a
//! wrapping struct that holds a reference to the inner adapter and forwards
//! capability-set methods; not inheritance").

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{ProviderConfig, ServerConfig};
use crate::core::providers::shared::resolve_timeout;
use crate::core::types::{ChatRequest, ChatResponse, Modality, ModelDefinition, ModelSource, Pricing, StreamItem};
use crate::error::GatewayError;

use super::openai::OpenAiAdapter;
use super::traits::{ChatStream, ProviderAdapter};

pub struct OllamaAdapter {
    instance_name: String,
    base_url: String,
    client: reqwest::Client,
    inner: OpenAiAdapter,
    health_timeout: Duration,
}

impl OllamaAdapter {
    pub fn new(provider: &ProviderConfig, server: &ServerConfig) -> Result<Self, GatewayError> {
        let base_url = provider
            .base_url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let health_timeout = Duration::from_secs(server.health_timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(resolve_timeout(provider, server.unary_timeout_secs))
            .build()
            .map_err(|e| GatewayError::Internal(format!("failed to build http client: {e}")))?;

        let inner = OpenAiAdapter::with_base_url(
            provider.id.clone(),
            format!("{base_url}/v1"),
            client.clone(),
            health_timeout,
        );

        Ok(Self {
            instance_name: provider.id.clone(),
            base_url,
            client,
            inner,
            health_timeout,
        })
    }
}

#[derive(Debug, serde::Deserialize)]
struct TagsResponse {
    models: Vec<TagEntry>,
}

#[derive(Debug, serde::Deserialize)]
struct TagEntry {
    name: String,
}

#[derive(Debug, serde::Deserialize)]
struct ShowResponse {
    #[serde(default)]
    model_info: std::collections::HashMap<String, serde_json::Value>,
    #[serde(default)]
    details: Option<ShowDetails>,
}

#[derive(Debug, serde::Deserialize)]
struct ShowDetails {
    #[serde(default)]
    families: Vec<String>,
}

/// Default context/max-output when `/api/show` reports neither (spec.md
/// §4.4 "Ollama ... Defaults: context 4096, max output 4096").
const DEFAULT_CONTEXT: u32 = 4096;

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
    fn instance_name(&self) -> &str {
        &self.instance_name
    }

    fn vendor_type(&self) -> &'static str {
        "ollama"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        self.inner.chat(request).await
    }

    async fn stream(&self, request: ChatRequest) -> Result<ChatStream, GatewayError> {
        self.inner.stream(request).await
    }

    /// Live discovery: `/api/tags` lists installed model names, `/api/show`
    /// per name yields context length when the server reports one (spec.md
    /// §4.4 "Ollama ... Models: discovered, not config-seeded").
    async fn models(&self) -> Result<Vec<ModelDefinition>, GatewayError> {
        let tags: TagsResponse = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(|e| upstream_failure(e.to_string()))?
            .json()
            .await
            .map_err(|e| upstream_failure(e.to_string()))?;

        let mut definitions = Vec::with_capacity(tags.models.len());
        for entry in tags.models {
            let show = self.probe_show(&entry.name).await;
            let context_window = show
                .as_ref()
                .and_then(|s| s.model_info.iter().find(|(key, _)| key.ends_with("context_length")))
                .and_then(|(_, value)| value.as_u64())
                .map(|v| v as u32)
                .unwrap_or(DEFAULT_CONTEXT);
            let is_multimodal = show
                .as_ref()
                .and_then(|s| s.details.as_ref())
                .map(|d| d.families.iter().any(|f| f == "clip" || f == "mllama"))
                .unwrap_or(false);
            let mut modalities = vec![Modality::Text];
            if is_multimodal {
                modalities.push(Modality::Image);
            }
            definitions.push(ModelDefinition {
                public_id: format!("{}/{}", self.instance_name, entry.name),
                display_name: entry.name.clone(),
                provider_id: self.instance_name.clone(),
                upstream_id: entry.name,
                context_window,
                max_output: DEFAULT_CONTEXT,
                modalities,
                pricing: Pricing::default(),
                enabled: true,
                source: ModelSource::Auto,
                last_updated: chrono::Utc::now(),
            });
        }
        Ok(definitions)
    }

    async fn health(&self) -> Result<(), GatewayError> {
        self.client
            .get(format!("{}/api/version", self.base_url))
            .timeout(self.health_timeout)
            .send()
            .await
            .map_err(|e| upstream_failure(e.to_string()))?;
        Ok(())
    }
}

impl OllamaAdapter {
    async fn probe_show(&self, model_name: &str) -> Option<ShowResponse> {
        self.client
            .post(format!("{}/api/show", self.base_url))
            .json(&serde_json::json!({"name": model_name}))
            .send()
            .await
            .ok()?
            .json()
            .await
            .ok()
    }
}

fn upstream_failure(message: String) -> GatewayError {
    GatewayError::UpstreamFailure {
        status: 502,
        message,
        vendor_type: None,
        vendor_code: None,
        vendor_param: None,
    }
}

pub fn factory() -> super::registry::AdapterFactory {
    Arc::new(|provider: &ProviderConfig, server: &ServerConfig| {
        OllamaAdapter::new(provider, server).map(|a| Arc::new(a) as Arc<dyn ProviderAdapter>)
    })
}
