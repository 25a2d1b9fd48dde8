//! Image-generation polling adapter, exemplified by "BFL" (C4, spec.md
//! §4.4 "Image generation"). Unlike the chat vendors, this adapter submits
//! a job and polls a status URL until the image is ready. Grounded in the
//! teacher's long-running-job shape for batch-style work
//! (`core/batch/processor.rs`'s poll-and-transition pattern), adapted to a
//! single-job, single-client poll loop per spec.md §4.4.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::config::{ProviderConfig, ServerConfig};
use crate::core::types::{
    ChatChunk, ChatDelta, ChatResponse, ChatResponseMessage, ChatStreamChoice, Choice, ContentPart, FinishReason,
    MessageContent, ModelDefinition, Role, StreamItem,
};
use crate::core::types::{ChatRequest, ModelSource, Pricing};
use crate::error::GatewayError;

use super::shared::seeded_model_definitions;
use super::traits::{ChatStream, ProviderAdapter};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct BflAdapter {
    instance_name: String,
    base_url: String,
    credential: String,
    models: Vec<ModelDefinition>,
    client: reqwest::Client,
    timeout: Duration,
    health_timeout: Duration,
}

impl BflAdapter {
    pub fn new(provider: &ProviderConfig, server: &ServerConfig) -> Result<Self, GatewayError> {
        let credential = provider.resolved_credential()?;
        let base_url = provider
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.bfl.ml/v1".to_string());
        let timeout = provider
            .timeout
            .as_deref()
            .and_then(|raw| raw.strip_suffix('s'))
            .and_then(|digits| digits.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(server.image_timeout_secs));
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| GatewayError::Internal(format!("failed to build http client: {e}")))?;

        let mut models = seeded_model_definitions(provider);
        if models.is_empty() {
            models.push(ModelDefinition {
                public_id: format!("{}/flux-pro", provider.id),
                display_name: "FLUX.1 [pro]".to_string(),
                provider_id: provider.id.clone(),
                upstream_id: "flux-pro".to_string(),
                context_window: 0,
                max_output: 0,
                modalities: vec![crate::core::types::Modality::Image],
                pricing: Pricing::default(),
                enabled: true,
                source: ModelSource::Manual,
                last_updated: chrono::Utc::now(),
            });
        }

        Ok(Self {
            instance_name: provider.id.clone(),
            base_url,
            credential,
            models,
            client,
            timeout,
            health_timeout: Duration::from_secs(server.health_timeout_secs),
        })
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        vec![("x-key", self.credential.clone())]
    }

    /// Submits the generation job and returns the upstream's polling URL
    /// (spec.md §4.4 "response includes a polling URL").
    async fn submit(&self, model: &str, prompt: &str) -> Result<String, GatewayError> {
        let url = format!("{}/{model}", self.base_url);
        let mut request = self.client.post(&url).json(&serde_json::json!({
            "prompt": prompt,
            "width": 1024,
            "height": 1024,
        }));
        for (name, value) in self.headers() {
            request = request.header(name, value);
        }
        let response = request.send().await.map_err(|e| network_failure(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::UpstreamFailure {
                status,
                message: body,
                vendor_type: None,
                vendor_code: None,
                vendor_param: None,
            });
        }
        let submitted: SubmitResponse = response.json().await.map_err(|e| network_failure(e.to_string()))?;
        Ok(submitted.polling_url)
    }

    /// Polls the status URL every 500ms until `Ready`, `Error`/`Failed`, or
    /// the request is cancelled (spec.md §4.4 "Poll at 500 ms intervals").
    async fn poll(&self, polling_url: &str, cancel: &tokio_util_cancel::CancelToken) -> Result<String, GatewayError> {
        loop {
            if cancel.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }
            let response = self
                .client
                .get(polling_url)
                .send()
                .await
                .map_err(|e| network_failure(e.to_string()))?;
            let status: PollResponse = response.json().await.map_err(|e| network_failure(e.to_string()))?;
            match status.status.as_str() {
                "Ready" => {
                    let sample = status
                        .result
                        .and_then(|r| r.sample)
                        .ok_or_else(|| GatewayError::Internal("image ready with no sample url".to_string()))?;
                    return Ok(sample);
                }
                "Error" | "Failed" => {
                    return Err(GatewayError::UpstreamFailure {
                        status: 502,
                        message: format!("image generation {}", status.status),
                        vendor_type: None,
                        vendor_code: None,
                        vendor_param: None,
                    });
                }
                _ => {
                    tokio::select! {
                        _ = tokio::time::sleep(POLL_INTERVAL) => {}
                        _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                    }
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(alias = "polling_url")]
    polling_url: String,
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    status: String,
    #[serde(default)]
    result: Option<PollResult>,
}

#[derive(Debug, Deserialize)]
struct PollResult {
    sample: Option<String>,
}

fn network_failure(message: String) -> GatewayError {
    GatewayError::UpstreamFailure {
        status: 502,
        message,
        vendor_type: None,
        vendor_code: None,
        vendor_param: None,
    }
}

fn image_response(model: &str, image_url: &str) -> ChatResponse {
    ChatResponse::new_unary(
        uuid::Uuid::new_v4().to_string(),
        model.to_string(),
        vec![Choice {
            index: 0,
            message: ChatResponseMessage {
                role: Role::Assistant,
                content: Some(MessageContent::Parts(vec![ContentPart::ImageUrl {
                    image_url: crate::core::types::ImageUrl {
                        url: image_url.to_string(),
                        detail: None,
                    },
                }])),
                reasoning: None,
            },
            finish_reason: Some(FinishReason::Stop),
        }],
        None,
    )
}

#[async_trait]
impl ProviderAdapter for BflAdapter {
    fn instance_name(&self) -> &str {
        &self.instance_name
    }

    fn vendor_type(&self) -> &'static str {
        "bfl"
    }

    /// Treats the last user message's text as the prompt, per spec.md
    /// §4.4; a request with no user text fails `invalid-request`.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        let prompt = request
            .last_user_text()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GatewayError::invalid("image generation requires a non-empty user message"))?;

        let polling_url = self.submit(&request.model, &prompt).await?;
        let cancel = tokio_util_cancel::CancelToken::new();
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);
        tokio::select! {
            result = self.poll(&polling_url, &cancel) => {
                let image_url = result?;
                Ok(image_response(&request.model, &image_url))
            }
            _ = &mut deadline => Err(GatewayError::UpstreamFailure {
                status: 504,
                message: "image generation timed out".to_string(),
                vendor_type: None,
                vendor_code: None,
                vendor_param: None,
            }),
        }
    }

    /// Emits the completed image as a single stream item after the poll
    /// loop finishes (spec.md §4.4 "the `Stream` implementation emits this
    /// as a single item after completion").
    async fn stream(&self, request: ChatRequest) -> Result<ChatStream, GatewayError> {
        let (tx, rx) = mpsc::channel(1);
        let adapter = self.clone();
        tokio::spawn(async move {
            match adapter.chat(&request).await {
                Ok(response) => {
                    let Some(choice) = response.choices.into_iter().next() else {
                        return;
                    };
                    let image_urls = match choice.message.content {
                        Some(MessageContent::Parts(parts)) => parts
                            .into_iter()
                            .filter_map(|p| match p {
                                ContentPart::ImageUrl { image_url } => Some(image_url.url),
                                ContentPart::Text { .. } => None,
                            })
                            .collect(),
                        _ => Vec::new(),
                    };
                    let chunk = ChatChunk {
                        id: response.id,
                        model: response.model,
                        created: response.created,
                        object: ChatChunk::object_tag().to_string(),
                        choices: vec![ChatStreamChoice {
                            index: 0,
                            delta: ChatDelta {
                                role: None,
                                content: None,
                                reasoning: None,
                                image_urls,
                            },
                            finish_reason: Some(FinishReason::Stop),
                            error: None,
                        }],
                        usage: None,
                    };
                    let _ = tx.send(StreamItem::Delta(chunk)).await;
                }
                Err(e) => {
                    let _ = tx.send(StreamItem::UpstreamError(e.to_string())).await;
                }
            }
        });
        Ok(rx)
    }

    async fn models(&self) -> Result<Vec<ModelDefinition>, GatewayError> {
        Ok(self.models.clone())
    }

    async fn health(&self) -> Result<(), GatewayError> {
        let url = format!("{}/get_result?id=health-probe", self.base_url);
        let mut request = self.client.get(&url);
        for (name, value) in self.headers() {
            request = request.header(name, value);
        }
        request
            .timeout(self.health_timeout)
            .send()
            .await
            .map_err(|e| network_failure(e.to_string()))?;
        Ok(())
    }
}

pub fn factory() -> super::registry::AdapterFactory {
    Arc::new(|provider: &ProviderConfig, server: &ServerConfig| {
        BflAdapter::new(provider, server).map(|a| Arc::new(a) as Arc<dyn ProviderAdapter>)
    })
}

/// Minimal cooperative cancellation token (the teacher's providers carry
/// cancellation via the request's context object; this crate has no
/// framework-provided equivalent for a bare poll loop, so a tiny
/// `tokio::sync::Notify`-backed token fills the same role).
///
/// A client disconnect while `chat()` is polling is already handled for
/// free: actix drops the handler future, which drops this `poll()` call at
/// its current `.await` point, which drops the token along with it — no
/// explicit signal needed. `CancelToken::cancel()` exists for the case a
/// future caller *can* observe (a request-scoped deadline or an explicit
/// abort signal threaded in from outside this module) without having to
/// restructure `poll()`'s loop.
mod tokio_util_cancel {
    use std::sync::Arc;
    use tokio::sync::Notify;

    #[derive(Clone, Default)]
    pub struct CancelToken {
        notify: Arc<Notify>,
        cancelled: Arc<std::sync::atomic::AtomicBool>,
    }

    impl CancelToken {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn is_cancelled(&self) -> bool {
            self.cancelled.load(std::sync::atomic::Ordering::SeqCst)
        }

        pub fn cancel(&self) {
            self.cancelled.store(true, std::sync::atomic::Ordering::SeqCst);
            self.notify.notify_waiters();
        }

        pub async fn cancelled(&self) {
            if self.is_cancelled() {
                return;
            }
            self.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ChatMessage, Role as MsgRole};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_provider(base_url: String) -> ProviderConfig {
        ProviderConfig {
            id: "bfl-main".to_string(),
            vendor_type: "bfl".to_string(),
            name: None,
            api_key: Some("bfl-test-key".to_string()),
            base_url: Some(base_url),
            config: Default::default(),
            timeout: Some("5s".to_string()),
            enabled: true,
            requires_auth: false,
            models: vec![],
        }
    }

    fn request_with_prompt(prompt: &str) -> ChatRequest {
        ChatRequest {
            model: "flux-pro".to_string(),
            messages: vec![ChatMessage {
                role: MsgRole::User,
                content: Some(MessageContent::Text(prompt.to_string())),
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
    async fn missing_user_text_is_invalid_request() {
        let adapter = BflAdapter::new(&sample_provider("http://localhost:0".to_string()), &ServerConfig::default()).unwrap();
        let mut request = request_with_prompt("");
        request.messages.clear();
        let err = adapter.chat(&request).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn polls_until_ready_then_returns_image_part() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/flux-pro"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "polling_url": format!("{}/get_result", server.uri())
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/get_result"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "Ready",
                "result": {"sample": "https://cdn.example/out.png"}
            })))
            .mount(&server)
            .await;

        let adapter = BflAdapter::new(&sample_provider(server.uri()), &ServerConfig::default()).unwrap();
        let response = adapter.chat(&request_with_prompt("a cat")).await.unwrap();
        match &response.choices[0].message.content {
            Some(MessageContent::Parts(parts)) => match &parts[0] {
                ContentPart::ImageUrl { image_url } => assert_eq!(image_url.url, "https://cdn.example/out.png"),
                other => panic!("unexpected part: {other:?}"),
            },
            other => panic!("unexpected content: {other:?}"),
        }
    }

    /// Exercises spec.md §8's "context cancel during poll returns
    /// `cancelled` within ≤600 ms" property directly against `poll()`,
    /// since nothing outside this module currently triggers
    /// `CancelToken::cancel()` (client-disconnect cancellation is instead
    /// covered by ordinary future-drop semantics, see the note above).
    #[tokio::test]
    async fn cancelling_during_poll_returns_cancelled_quickly() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/get_result"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "Pending"})))
            .mount(&server)
            .await;

        let adapter = BflAdapter::new(&sample_provider(server.uri()), &ServerConfig::default()).unwrap();
        let cancel = tokio_util_cancel::CancelToken::new();
        let polling_url = format!("{}/get_result", server.uri());

        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_clone.cancel();
        });

        let started = std::time::Instant::now();
        let result = adapter.poll(&polling_url, &cancel).await;
        assert!(matches!(result, Err(GatewayError::Cancelled)));
        assert!(started.elapsed() < Duration::from_millis(600));
    }

    #[tokio::test]
    async fn error_status_maps_to_upstream_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/flux-pro"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "polling_url": format!("{}/get_result", server.uri())
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/get_result"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "Error"})))
            .mount(&server)
            .await;

        let adapter = BflAdapter::new(&sample_provider(server.uri()), &ServerConfig::default()).unwrap();
        let err = adapter.chat(&request_with_prompt("a cat")).await.unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamFailure { .. }));
    }
}
