//! Gateway service (C6, spec.md §4.6): the orchestrator that ties the
//! model registry (C5), the registered provider instances (C3/C4), and the
//! usage ingestor (C9) into the public operations spec.md §4.6 names.
//! Grounded in the teacher's split between `core/providers/provider_registry.rs`
//! (instances) and the router's `execute_impl.rs` dispatch shape, narrowed
//! to the five operations the spec actually calls for (no fallback, no
//! load balancing, no cross-provider retry — spec.md §1 "Non-goals").

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Instant;

use chrono::Utc;

use crate::core::ingestor::UsageIngestorHandle;
use crate::core::providers::ProviderAdapter;
use crate::core::providers::ChatStream;
use crate::core::providers::thinking::split_whole_text;
use crate::core::registry::ModelRegistry;
use crate::core::types::{ChatRequest, ChatResponse, MessageContent, ModelDefinition, RequestLog};
use crate::error::GatewayError;

/// Case-insensitive/substring filter for `ListAllModels` (spec.md §4.6,
/// §8 "Model filter `{}` returns all enabled models; any filter is a
/// subset of the unfiltered set").
#[derive(Debug, Clone, Default)]
pub struct ModelFilter {
    pub provider: Option<String>,
    pub id_substring: Option<String>,
    pub modality: Option<String>,
    pub owned_by: Option<String>,
}

impl ModelFilter {
    fn matches(&self, model: &ModelDefinition) -> bool {
        if let Some(provider) = &self.provider {
            if !model.provider_id.eq_ignore_ascii_case(provider) {
                return false;
            }
        }
        if let Some(owned_by) = &self.owned_by {
            if !model.provider_id.eq_ignore_ascii_case(owned_by) {
                return false;
            }
        }
        if let Some(id_substring) = &self.id_substring {
            if !model.public_id.to_lowercase().contains(&id_substring.to_lowercase()) {
                return false;
            }
        }
        if let Some(modality) = &self.modality {
            let matches_modality = model
                .modalities
                .iter()
                .any(|m| format!("{m:?}").eq_ignore_ascii_case(modality));
            if !matches_modality {
                return false;
            }
        }
        true
    }
}

/// Context carried alongside a gateway call for the usage log (spec.md §3
/// "Request log"): everything the HTTP layer knows that the core itself
/// cannot derive (auth principal, client metadata).
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub user_id: Option<String>,
    pub api_key_id: Option<String>,
    pub app_label: Option<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

pub struct GatewayService {
    registry: Arc<ModelRegistry>,
    providers: RwLock<HashMap<String, Arc<dyn ProviderAdapter>>>,
    ingestor: UsageIngestorHandle,
}

impl GatewayService {
    pub fn new(registry: Arc<ModelRegistry>, ingestor: UsageIngestorHandle) -> Self {
        Self {
            registry,
            providers: RwLock::new(HashMap::new()),
            ingestor,
        }
    }

    /// Fetches the provider's catalog, fails if empty or erroring, inserts
    /// the provider into the service map, and adds each catalog entry to
    /// the model registry (spec.md §4.6 `RegisterProvider`). Concurrent
    /// registrations serialize on the service's write lock.
    pub async fn register_provider(&self, adapter: Arc<dyn ProviderAdapter>) -> Result<usize, GatewayError> {
        let models = adapter.models().await?;
        if models.is_empty() {
            return Err(GatewayError::Internal(format!(
                "provider '{}' returned an empty catalog",
                adapter.instance_name()
            )));
        }

        let instance_name = adapter.instance_name().to_string();
        {
            let mut providers = self.providers.write().expect("provider map lock poisoned");
            providers.insert(instance_name, adapter);
        }
        let count = models.len();
        self.registry.insert_many(models);
        Ok(count)
    }

    /// Resolves a public model id to its provider instance and upstream id
    /// (spec.md §4.6 `GetProviderForModel`). Fails `provider-unavailable`
    /// when the registry names a provider id that was never registered —
    /// distinct from `not-found`, which the registry resolve itself raises
    /// for an unknown model id.
    pub fn get_provider_for_model(&self, model_id: &str) -> Result<(Arc<dyn ProviderAdapter>, String), GatewayError> {
        let (provider_id, upstream_id) = self.registry.resolve(model_id)?;
        let providers = self.providers.read().expect("provider map lock poisoned");
        let provider = providers
            .get(&provider_id)
            .cloned()
            .ok_or_else(|| GatewayError::ProviderUnavailable(provider_id.clone()))?;
        Ok((provider, upstream_id))
    }

    /// Unary chat completion (spec.md §4.6 `Chat`): resolve, clone the
    /// request with `model=upstream_id`, dispatch, measure latency,
    /// enqueue a usage record without blocking the response.
    pub async fn chat(&self, request: &ChatRequest, ctx: &RequestContext) -> Result<ChatResponse, GatewayError> {
        let (provider, upstream_id) = self.get_provider_for_model(&request.model)?;
        let upstream_request = request.with_model(&upstream_id);

        let started = Instant::now();
        let result = provider.chat(&upstream_request).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(mut response) => {
                extract_reasoning_in_place(&mut response);
                self.enqueue_log(request, &upstream_id, provider.instance_name(), &response, latency_ms, 200, false, ctx);
                Ok(response)
            }
            Err(e) => {
                self.enqueue_error_log(request, &upstream_id, provider.instance_name(), &e, latency_ms, false, ctx);
                Err(e)
            }
        }
    }

    /// Streaming chat completion (spec.md §4.6 `StreamChat`): resolve,
    /// clone with `model=upstream_id`, return the adapter's stream channel
    /// directly to the caller. The caller (the HTTP stream pipeline, C7)
    /// is responsible for the completion log, since only it observes
    /// when/how the stream actually ends (spec.md §4.7).
    pub async fn stream_chat(&self, request: &ChatRequest) -> Result<(ChatStream, Arc<dyn ProviderAdapter>, String), GatewayError> {
        let (provider, upstream_id) = self.get_provider_for_model(&request.model)?;
        let upstream_request = request.with_model(&upstream_id);
        let stream = provider.stream(upstream_request).await?;
        Ok((stream, provider, upstream_id))
    }

    /// Materializes unified model views from the registry, applying the
    /// filter conjunctively (spec.md §4.6 `ListAllModels`).
    pub fn list_all_models(&self, filter: &ModelFilter) -> Vec<ModelDefinition> {
        self.registry
            .all()
            .into_iter()
            .filter(|m| m.enabled)
            .filter(|m| filter.matches(m))
            .collect()
    }

    pub fn ingestor(&self) -> &UsageIngestorHandle {
        &self.ingestor
    }

    fn enqueue_log(
        &self,
        original_request: &ChatRequest,
        upstream_id: &str,
        provider_id: &str,
        response: &ChatResponse,
        latency_ms: u64,
        http_status: u16,
        streamed: bool,
        ctx: &RequestContext,
    ) {
        let finish_reason = response
            .choices
            .first()
            .and_then(|c| c.finish_reason.as_ref())
            .map(|r| r.as_str().to_string())
            .unwrap_or_default();
        let usage = response.usage.clone().unwrap_or_default();

        self.ingestor.enqueue(RequestLog {
            id: response.id.clone(),
            user_id: ctx.user_id.clone(),
            api_key_id: ctx.api_key_id.clone(),
            app_label: ctx.app_label.clone(),
            provider_id: provider_id.to_string(),
            public_model_id: original_request.model.clone(),
            upstream_model_id: upstream_id.to_string(),
            finish_reason,
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            cached_tokens: usage.prompt_tokens_details.and_then(|d| d.cached_tokens).unwrap_or(0),
            latency_ms,
            ttft_ms: None,
            http_status,
            cost_micros: usage.cost_micros.unwrap_or(0),
            streamed,
            client_ip: ctx.client_ip.clone(),
            user_agent: ctx.user_agent.clone(),
            metadata: None,
            created_at: Utc::now(),
        });
    }

    fn enqueue_error_log(
        &self,
        original_request: &ChatRequest,
        upstream_id: &str,
        provider_id: &str,
        error: &GatewayError,
        latency_ms: u64,
        streamed: bool,
        ctx: &RequestContext,
    ) {
        self.ingestor.enqueue(RequestLog {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: ctx.user_id.clone(),
            api_key_id: ctx.api_key_id.clone(),
            app_label: ctx.app_label.clone(),
            provider_id: provider_id.to_string(),
            public_model_id: original_request.model.clone(),
            upstream_model_id: upstream_id.to_string(),
            finish_reason: "error".to_string(),
            input_tokens: 0,
            output_tokens: 0,
            cached_tokens: 0,
            latency_ms,
            ttft_ms: None,
            http_status: error.status_code_u16(),
            cost_micros: 0,
            streamed,
            client_ip: ctx.client_ip.clone(),
            user_agent: ctx.user_agent.clone(),
            metadata: None,
            created_at: Utc::now(),
        });
    }
}

/// Runs a unary response's text content through the whole-text thinking
/// extractor (C8, spec.md §4.8 "Whole-text"), splitting `<think>` segments
/// into `message.reasoning` and leaving `message.content` as the remainder.
/// A no-op for non-text content (image parts, tool calls).
fn extract_reasoning_in_place(response: &mut ChatResponse) {
    for choice in &mut response.choices {
        if let Some(MessageContent::Text(text)) = &choice.message.content {
            let (content, reasoning) = split_whole_text(text);
            choice.message.content = Some(MessageContent::Text(content));
            if !reasoning.is_empty() {
                choice.message.reasoning = Some(reasoning);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestorConfig;
    use crate::core::repository::InProcessRequestRepository;
    use crate::core::types::{ChatMessage, Choice, ChatResponseMessage, FinishReason, MessageContent, Modality, ModelSource, Pricing, Role};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubAdapter {
        name: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProviderAdapter for StubAdapter {
        fn instance_name(&self) -> &str {
            &self.name
        }

        fn vendor_type(&self) -> &'static str {
            "stub"
        }

        async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(request.model, "upstream-model", "gateway must send the upstream id, not the public id");
            Ok(ChatResponse::new_unary(
                "resp-1".to_string(),
                request.model.clone(),
                vec![Choice {
                    index: 0,
                    message: ChatResponseMessage {
                        role: Role::Assistant,
                        content: Some(MessageContent::Text("hi".to_string())),
                        reasoning: None,
                    },
                    finish_reason: Some(FinishReason::Stop),
                }],
                None,
            ))
        }

        async fn stream(&self, _request: ChatRequest) -> Result<ChatStream, GatewayError> {
            unimplemented!()
        }

        async fn models(&self) -> Result<Vec<ModelDefinition>, GatewayError> {
            Ok(vec![ModelDefinition {
                public_id: "stub/model-a".to_string(),
                display_name: "Model A".to_string(),
                provider_id: self.name.clone(),
                upstream_id: "upstream-model".to_string(),
                context_window: 4096,
                max_output: 4096,
                modalities: vec![Modality::Text],
                pricing: Pricing::default(),
                enabled: true,
                source: ModelSource::Manual,
                last_updated: Utc::now(),
            }])
        }

        async fn health(&self) -> Result<(), GatewayError> {
            Ok(())
        }
    }

    fn sample_request() -> ChatRequest {
        ChatRequest {
            model: "stub/model-a".to_string(),
            messages: vec![ChatMessage {
                role: Role::User,
                content: Some(MessageContent::Text("hello".to_string())),
                name: None,
                tool_call_id: None,
            }],
            temperature: None,
            top_p: None,
            top_k: None,
            min_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            seed: None,
            max_tokens: None,
            stop: None,
            tools: None,
            tool_choice: None,
            response_format: None,
            stream: false,
            stream_options: None,
            modalities: None,
            user: None,
            provider: None,
        }
    }

    async fn make_service() -> (GatewayService, Arc<InProcessRequestRepository>) {
        let repo = Arc::new(InProcessRequestRepository::new());
        let (handle, _join) = crate::core::ingestor::spawn(IngestorConfig::default(), repo.clone());
        let registry = Arc::new(ModelRegistry::new());
        (GatewayService::new(registry, handle), repo)
    }

    #[tokio::test]
    async fn register_provider_seeds_the_model_registry() {
        let (service, _repo) = make_service().await;
        let adapter = Arc::new(StubAdapter {
            name: "stub-main".to_string(),
            calls: AtomicUsize::new(0),
        });
        let count = service.register_provider(adapter).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(service.list_all_models(&ModelFilter::default()).len(), 1);
    }

    #[tokio::test]
    async fn chat_sends_upstream_id_not_public_id() {
        let (service, _repo) = make_service().await;
        let adapter = Arc::new(StubAdapter {
            name: "stub-main".to_string(),
            calls: AtomicUsize::new(0),
        });
        service.register_provider(adapter).await.unwrap();

        let original = sample_request();
        let response = service.chat(&original, &RequestContext::default()).await.unwrap();
        assert_eq!(original.model, "stub/model-a", "gateway must not mutate the caller's request");
        assert_eq!(response.choices[0].finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn extract_reasoning_splits_think_tags_out_of_unary_content() {
        let mut response = ChatResponse::new_unary(
            "resp-1".to_string(),
            "model".to_string(),
            vec![Choice {
                index: 0,
                message: ChatResponseMessage {
                    role: Role::Assistant,
                    content: Some(MessageContent::Text("<think>reason</think>answer".to_string())),
                    reasoning: None,
                },
                finish_reason: Some(FinishReason::Stop),
            }],
            None,
        );
        extract_reasoning_in_place(&mut response);
        match &response.choices[0].message.content {
            Some(MessageContent::Text(t)) => assert_eq!(t, "answer"),
            other => panic!("unexpected content: {other:?}"),
        }
        assert_eq!(response.choices[0].message.reasoning.as_deref(), Some("reason"));
    }

    #[tokio::test]
    async fn unregistered_provider_is_unavailable() {
        let (service, _repo) = make_service().await;
        service.registry.insert(ModelDefinition {
            public_id: "ghost/model".to_string(),
            display_name: "Ghost".to_string(),
            provider_id: "ghost-provider".to_string(),
            upstream_id: "model".to_string(),
            context_window: 4096,
            max_output: 4096,
            modalities: vec![Modality::Text],
            pricing: Pricing::default(),
            enabled: true,
            source: ModelSource::Manual,
            last_updated: Utc::now(),
        });

        let err = service.get_provider_for_model("ghost/model").unwrap_err();
        assert!(matches!(err, GatewayError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn empty_filter_returns_all_enabled_models() {
        let (service, _repo) = make_service().await;
        let adapter = Arc::new(StubAdapter {
            name: "stub-main".to_string(),
            calls: AtomicUsize::new(0),
        });
        service.register_provider(adapter).await.unwrap();

        let all = service.list_all_models(&ModelFilter::default());
        let filtered = service.list_all_models(&ModelFilter {
            provider: Some("stub-main".to_string()),
            ..Default::default()
        });
        assert_eq!(all.len(), filtered.len());
    }
}
