//! OpenAI-compatible adapter (C4, spec.md §4.4). Also serves as the
//! delegate inner adapter for Ollama (spec.md §9 "Adapter composition").
//!
//! Grounded in the teacher's `core/providers/openai/{provider,streaming}.rs`
//! shape: a thin facade over a `reqwest::Client`, with a background task
//! driving the SSE channel for streaming calls.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use tokio::sync::mpsc;

use crate::config::{ProviderConfig, ServerConfig};
use crate::core::http::{SseLineReader, send_unary};
use crate::core::types::{ChatChunk, ChatRequest, ChatResponse, ModelDefinition, StreamItem, StreamOptions};
use crate::error::GatewayError;

use super::shared::{map_upstream_error, resolve_timeout, seeded_model_definitions};
use super::traits::{ChatStream, ProviderAdapter};

#[derive(Clone)]
pub struct OpenAiAdapter {
    instance_name: String,
    base_url: String,
    credential: String,
    organization: Option<String>,
    models: Vec<ModelDefinition>,
    client: reqwest::Client,
    health_timeout: Duration,
}

impl OpenAiAdapter {
    pub fn new(provider: &ProviderConfig, server: &ServerConfig) -> Result<Self, GatewayError> {
        let credential = provider.resolved_credential()?;
        let base_url = provider
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let timeout = resolve_timeout(provider, server.unary_timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Internal(format!("failed to build http client: {e}")))?;

        Ok(Self {
            instance_name: provider.id.clone(),
            base_url,
            credential,
            organization: provider.config.get("organization").cloned(),
            models: seeded_model_definitions(provider),
            client,
            health_timeout: Duration::from_secs(server.health_timeout_secs),
        })
    }

    /// Constructs an adapter pointed at a custom base URL with an existing
    /// client, used by the Ollama adapter to delegate to `<base>/v1`
    /// (spec.md §4.4 "Ollama ... Chat/Stream delegate to the
    /// OpenAI-compatible adapter").
    pub fn with_base_url(instance_name: String, base_url: String, client: reqwest::Client, health_timeout: Duration) -> Self {
        Self {
            instance_name,
            base_url,
            credential: String::new(),
            organization: None,
            models: Vec::new(),
            client,
            health_timeout,
        }
    }

    fn auth_headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::new();
        if !self.credential.is_empty() {
            headers.push(("Authorization".to_string(), format!("Bearer {}", self.credential)));
        }
        if let Some(org) = &self.organization {
            headers.push(("OpenAI-Organization".to_string(), org.clone()));
        }
        headers
    }

    fn headers_as_ref(headers: &[(String, String)]) -> Vec<(&str, &str)> {
        headers.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn instance_name(&self) -> &str {
        &self.instance_name
    }

    fn vendor_type(&self) -> &'static str {
        "openai"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        let mut body = request.clone();
        body.stream = false;
        let url = format!("{}/chat/completions", self.base_url);
        let headers = self.auth_headers();

        send_unary(&self.client, Method::POST, &url, Some(&body), &Self::headers_as_ref(&headers))
            .await
            .map_err(map_upstream_error)
    }

    async fn stream(&self, request: ChatRequest) -> Result<ChatStream, GatewayError> {
        let mut body = request;
        body.stream = true;
        body.stream_options = Some(StreamOptions { include_usage: true });

        let url = format!("{}/chat/completions", self.base_url);
        let headers = self.auth_headers();
        let client = self.client.clone();

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            run_openai_stream(client, url, body, headers, tx).await;
        });
        Ok(rx)
    }

    async fn models(&self) -> Result<Vec<ModelDefinition>, GatewayError> {
        Ok(self.models.clone())
    }

    async fn health(&self) -> Result<(), GatewayError> {
        let url = format!("{}/models", self.base_url);
        let headers = self.auth_headers();
        let mut request = self.client.get(&url);
        for (name, value) in &headers {
            request = request.header(name, value);
        }
        request
            .timeout(self.health_timeout)
            .send()
            .await
            .map_err(|e| GatewayError::UpstreamFailure {
                status: 502,
                message: e.to_string(),
                vendor_type: None,
                vendor_code: None,
                vendor_param: None,
            })?;
        Ok(())
    }
}

/// Background producer task: reads SSE lines and forwards `StreamItem`s
/// until `[DONE]`, channel close, or an upstream error (spec.md §4.7
/// "Producer side"). Sending fails as soon as the consumer drops its
/// receiver (client disconnect), at which point this task returns
/// immediately and drops the `SseLineReader`, closing the upstream
/// connection (spec.md §4.7 "Cancellation").
async fn run_openai_stream(
    client: reqwest::Client,
    url: String,
    body: ChatRequest,
    headers: Vec<(String, String)>,
    tx: mpsc::Sender<StreamItem>,
) {
    let headers_ref: Vec<(&str, &str)> = headers.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    let mut reader = match SseLineReader::connect(&client, Method::POST, &url, Some(&body), &headers_ref).await {
        Ok(reader) => reader,
        Err(e) => {
            let _ = tx.send(StreamItem::UpstreamError(e.body)).await;
            return;
        }
    };

    loop {
        match reader.next_line().await {
            Ok(Some(line)) => {
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data.trim() == "[DONE]" {
                    return;
                }
                match serde_json::from_str::<ChatChunk>(data) {
                    Ok(chunk) => {
                        if tx.send(StreamItem::Delta(chunk)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to parse OpenAI streaming chunk, skipping");
                    }
                }
            }
            Ok(None) => return,
            Err(e) => {
                let _ = tx.send(StreamItem::UpstreamError(e.body)).await;
                return;
            }
        }
    }
}

/// Registers the OpenAI-compatible factory under the vendor tag `"openai"`.
pub fn factory() -> super::registry::AdapterFactory {
    Arc::new(|provider: &ProviderConfig, server: &ServerConfig| {
        OpenAiAdapter::new(provider, server).map(|a| Arc::new(a) as Arc<dyn ProviderAdapter>)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ChatMessage, Role};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_provider(base_url: String) -> ProviderConfig {
        ProviderConfig {
            id: "openai-main".to_string(),
            vendor_type: "openai".to_string(),
            name: None,
            api_key: Some("sk-test".to_string()),
            base_url: Some(base_url),
            config: Default::default(),
            timeout: None,
            enabled: true,
            requires_auth: false,
            models: vec![],
        }
    }

    fn sample_request() -> ChatRequest {
        ChatRequest {
            model: "gpt-3.5-turbo".to_string(),
            messages: vec![ChatMessage {
                role: Role::User,
                content: Some(crate::core::types::MessageContent::Text("Hello".to_string())),
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

    #[tokio::test]
    async fn unary_happy_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "x",
                "object": "chat.completion",
                "created": 1,
                "model": "gpt-3.5-turbo",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "Hi"},
                    "finish_reason": "stop"
                }]
            })))
            .mount(&server)
            .await;

        let adapter = OpenAiAdapter::new(&sample_provider(server.uri()), &ServerConfig::default()).unwrap();
        let response = adapter.chat(&sample_request()).await.unwrap();
        assert_eq!(response.object, "chat.completion");
        match &response.choices[0].message.content {
            Some(crate::core::types::MessageContent::Text(t)) => assert_eq!(t, "Hi"),
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[tokio::test]
    async fn upstream_4xx_maps_to_upstream_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": {"message": "bad key", "type": "auth"}
            })))
            .mount(&server)
            .await;

        let adapter = OpenAiAdapter::new(&sample_provider(server.uri()), &ServerConfig::default()).unwrap();
        let err = adapter.chat(&sample_request()).await.unwrap_err();
        match err {
            GatewayError::UpstreamFailure { status, message, vendor_type, .. } => {
                assert_eq!(status, 401);
                assert_eq!(message, "bad key");
                assert_eq!(vendor_type.as_deref(), Some("auth"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn streaming_happy_path_emits_deltas_then_closes() {
        let server = MockServer::start().await;
        let body = "data: {\"id\":\"1\",\"model\":\"gpt-3.5-turbo\",\"created\":1,\"object\":\"chat.completion.chunk\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"He\"}}]}\n\n\
                     data: {\"id\":\"1\",\"model\":\"gpt-3.5-turbo\",\"created\":1,\"object\":\"chat.completion.chunk\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"llo\"}}]}\n\n\
                     data: [DONE]\n\n";
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let adapter = OpenAiAdapter::new(&sample_provider(server.uri()), &ServerConfig::default()).unwrap();
        let mut request = sample_request();
        request.stream = true;
        let mut rx = adapter.stream(request).await.unwrap();

        let mut deltas = Vec::new();
        while let Some(item) = rx.recv().await {
            match item {
                StreamItem::Delta(chunk) => deltas.push(chunk.choices[0].delta.content.clone()),
                StreamItem::UpstreamError(e) => panic!("unexpected error item: {e}"),
            }
        }
        assert_eq!(deltas, vec![Some("He".to_string()), Some("llo".to_string())]);
    }
}
