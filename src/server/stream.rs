//! Stream pipeline consumer side (C7, spec.md §4.7): turns the adapter's
//! stream-item channel into an SSE HTTP response, applying the thinking
//! extractor (C8) per choice and enqueueing exactly one completion log
//! record however the stream ends.
//!
//! Grounded in the teacher's `core/streaming.rs` `Event`/SSE-framing shape,
//! rebuilt around `async-stream` (the teacher's streaming-handler
//! dependency) instead of a hand-rolled `Stream` impl, and around the
//! bounded channel `core::providers::ChatStream` already produced by C4.

use std::collections::HashMap;

use actix_web::{HttpResponse, web};
use bytes::Bytes;
use chrono::Utc;
use tracing::warn;

use crate::core::gateway::RequestContext;
use crate::core::providers::thinking::ThinkingSplitter;
use crate::core::types::{
    ChatChunk, ChatDelta, ChatRequest, ChatStreamChoice, FinishReason, RequestLog, StreamErrorDetail, StreamItem,
};

use super::state::AppState;

/// Accumulates the fields a completion log needs, regardless of how the
/// stream ends (spec.md §3 "Request log", §4.7 "Client disconnect").
struct StreamLogAccumulator {
    request_id: Option<String>,
    provider_id: String,
    public_model_id: String,
    upstream_model_id: String,
    ctx: RequestContext,
    started: std::time::Instant,
    finish_reason: Option<String>,
    prompt_tokens: u32,
    completion_tokens: u32,
    cached_tokens: u32,
    cost_micros: i64,
}

/// Emits the accumulated record when dropped, unless [`StreamLogAccumulator::complete`]
/// already fired — so a client disconnect (which drops this generator's
/// future without reaching the end of the loop) still produces exactly one
/// `finish_reason="cancelled"` record carrying whatever tokens were counted
/// so far (spec.md §4.7 "Client disconnect").
struct CompletionGuard {
    acc: Option<StreamLogAccumulator>,
    ingestor: crate::core::ingestor::UsageIngestorHandle,
}

impl CompletionGuard {
    fn complete(&mut self, finish_reason: impl Into<String>) {
        if let Some(mut acc) = self.acc.take() {
            acc.finish_reason = Some(finish_reason.into());
            self.ingestor.enqueue(build_log(acc, 200));
        }
    }

    fn acc_mut(&mut self) -> Option<&mut StreamLogAccumulator> {
        self.acc.as_mut()
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if let Some(acc) = self.acc.take() {
            self.ingestor.enqueue(build_log(
                StreamLogAccumulator {
                    finish_reason: Some("cancelled".to_string()),
                    ..acc
                },
                499,
            ));
        }
    }
}

fn build_log(acc: StreamLogAccumulator, http_status: u16) -> RequestLog {
    RequestLog {
        id: acc.request_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        user_id: acc.ctx.user_id,
        api_key_id: acc.ctx.api_key_id,
        app_label: acc.ctx.app_label,
        provider_id: acc.provider_id,
        public_model_id: acc.public_model_id,
        upstream_model_id: acc.upstream_model_id,
        finish_reason: acc.finish_reason.unwrap_or_else(|| "cancelled".to_string()),
        input_tokens: acc.prompt_tokens,
        output_tokens: acc.completion_tokens,
        cached_tokens: acc.cached_tokens,
        latency_ms: acc.started.elapsed().as_millis() as u64,
        ttft_ms: None,
        http_status,
        cost_micros: acc.cost_micros,
        streamed: true,
        client_ip: acc.ctx.client_ip,
        user_agent: acc.ctx.user_agent,
        metadata: None,
        created_at: Utc::now(),
    }
}

/// `stream=true` branch of `POST /api/v1/chat/completions` (spec.md §4.7
/// "Consumer side").
pub async fn stream_chat_completions(
    state: web::Data<AppState>,
    request: ChatRequest,
    ctx: RequestContext,
) -> actix_web::Result<HttpResponse> {
    let (mut rx, provider, upstream_id) = match state.gateway.stream_chat(&request).await {
        Ok(parts) => parts,
        Err(e) => return Ok(actix_web::ResponseError::error_response(&e)),
    };

    let mut guard = CompletionGuard {
        acc: Some(StreamLogAccumulator {
            request_id: None,
            provider_id: provider.instance_name().to_string(),
            public_model_id: request.model.clone(),
            upstream_model_id: upstream_id,
            ctx,
            started: std::time::Instant::now(),
            finish_reason: None,
            prompt_tokens: 0,
            completion_tokens: 0,
            cached_tokens: 0,
            cost_micros: 0,
        }),
        ingestor: state.gateway.ingestor().clone(),
    };

    let body = async_stream::stream! {
        let mut splitters: HashMap<u32, ThinkingSplitter> = HashMap::new();

        loop {
            match rx.recv().await {
                Some(StreamItem::Delta(mut chunk)) => {
                    apply_thinking_extraction(&mut chunk, &mut splitters);
                    record_progress(guard.acc_mut(), &chunk);

                    let final_reason = chunk
                        .choices
                        .iter()
                        .find_map(|c| c.finish_reason.as_ref())
                        .map(|r| r.as_str().to_string());

                    match serde_json::to_string(&chunk) {
                        Ok(json) => yield Ok::<Bytes, actix_web::Error>(Bytes::from(format!("data: {json}\n\n"))),
                        Err(e) => warn!(error = %e, "failed to encode SSE chunk, skipping"),
                    }

                    if let Some(reason) = final_reason {
                        guard.complete(reason);
                    }
                }
                Some(StreamItem::UpstreamError(message)) => {
                    let error_chunk = error_frame(&message);
                    if let Ok(json) = serde_json::to_string(&error_chunk) {
                        yield Ok(Bytes::from(format!("data: {json}\n\n")));
                    }
                    guard.complete("error");
                    return;
                }
                None => {
                    for (_, splitter) in splitters.iter_mut() {
                        let (content, reasoning) = splitter.finish();
                        if !content.is_empty() || !reasoning.is_empty() {
                            let flush_chunk = flush_frame(content, reasoning);
                            if let Ok(json) = serde_json::to_string(&flush_chunk) {
                                yield Ok(Bytes::from(format!("data: {json}\n\n")));
                            }
                        }
                    }
                    guard.complete("stop");
                    yield Ok(Bytes::from_static(b"data: [DONE]\n\n"));
                    return;
                }
            }
        }
    };

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .insert_header(("Connection", "keep-alive"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(body))
}

/// Splits each choice's `delta.content` through its own stateful
/// `ThinkingSplitter`, keyed by choice index (spec.md §4.8 "Streaming").
fn apply_thinking_extraction(chunk: &mut ChatChunk, splitters: &mut HashMap<u32, ThinkingSplitter>) {
    for choice in &mut chunk.choices {
        let Some(raw) = choice.delta.content.take() else {
            continue;
        };
        let splitter = splitters.entry(choice.index).or_default();
        let (content, reasoning) = splitter.push(&raw);
        if !content.is_empty() {
            choice.delta.content = Some(content);
        }
        if !reasoning.is_empty() {
            choice.delta.reasoning = Some(reasoning);
        }
    }
}

fn record_progress(acc: Option<&mut StreamLogAccumulator>, chunk: &ChatChunk) {
    let Some(acc) = acc else { return };
    if acc.request_id.is_none() {
        acc.request_id = Some(chunk.id.clone());
    }
    // Usage arrives as one cumulative snapshot per chunk for some vendors
    // (OpenAI-compatible) but split across a prelude and a final chunk for
    // others (Anthropic: input_tokens on `message_start`, output_tokens on
    // `message_delta`), so a zero here means "this event didn't carry that
    // field" rather than "reset to zero".
    if let Some(usage) = &chunk.usage {
        if usage.prompt_tokens > 0 {
            acc.prompt_tokens = usage.prompt_tokens;
        }
        if usage.completion_tokens > 0 {
            acc.completion_tokens = usage.completion_tokens;
        }
        acc.cached_tokens = usage
            .prompt_tokens_details
            .as_ref()
            .and_then(|d| d.cached_tokens)
            .unwrap_or(acc.cached_tokens);
        acc.cost_micros = usage.cost_micros.unwrap_or(acc.cost_micros);
    }
}

/// Builds the synthetic error frame spec.md §4.7 step 3 requires: a single
/// chunk whose choice carries `finish_reason="error"` and `error.message`.
fn error_frame(message: &str) -> ChatChunk {
    ChatChunk {
        id: uuid::Uuid::new_v4().to_string(),
        model: String::new(),
        created: Utc::now().timestamp(),
        object: ChatChunk::object_tag().to_string(),
        choices: vec![ChatStreamChoice {
            index: 0,
            delta: ChatDelta::default(),
            finish_reason: Some(FinishReason::Error),
            error: Some(StreamErrorDetail {
                message: message.to_string(),
            }),
        }],
        usage: None,
    }
}

/// Builds the trailing chunk carrying a flushed thinking-splitter carry
/// (spec.md §4.8 "When the upstream stream ends and the carry is
/// non-empty, the carry is flushed").
fn flush_frame(content: String, reasoning: String) -> ChatChunk {
    ChatChunk {
        id: uuid::Uuid::new_v4().to_string(),
        model: String::new(),
        created: Utc::now().timestamp(),
        object: ChatChunk::object_tag().to_string(),
        choices: vec![ChatStreamChoice {
            index: 0,
            delta: ChatDelta {
                role: None,
                content: if content.is_empty() { None } else { Some(content) },
                reasoning: if reasoning.is_empty() { None } else { Some(reasoning) },
                image_urls: Vec::new(),
            },
            finish_reason: None,
            error: None,
        }],
        usage: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestorConfig;
    use crate::core::gateway::GatewayService;
    use crate::core::providers::traits::{ChatStream, ProviderAdapter};
    use crate::core::registry::ModelRegistry;
    use crate::core::repository::InProcessRequestRepository;
    use crate::core::types::{ChatMessage, ChatRequest, Modality, ModelSource, Pricing, Role as MsgRole, StreamItem};
    use crate::error::GatewayError;
    use actix_web::{App, test, web};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    /// Feeds a fixed sequence of [`StreamItem`]s over the adapter's
    /// channel, exercising the consumer side exactly as a real vendor
    /// adapter would.
    struct ScriptedAdapter {
        name: String,
        script: Vec<StreamItem>,
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedAdapter {
        fn instance_name(&self) -> &str {
            &self.name
        }

        fn vendor_type(&self) -> &'static str {
            "scripted"
        }

        async fn chat(&self, _request: &ChatRequest) -> Result<crate::core::types::ChatResponse, GatewayError> {
            unimplemented!("unary path not exercised by these tests")
        }

        async fn stream(&self, _request: ChatRequest) -> Result<ChatStream, GatewayError> {
            let (tx, rx) = mpsc::channel(8);
            let script = self.script.clone();
            tokio::spawn(async move {
                for item in script {
                    if tx.send(item).await.is_err() {
                        return;
                    }
                }
            });
            Ok(rx)
        }

        async fn models(&self) -> Result<Vec<crate::core::types::ModelDefinition>, GatewayError> {
            Ok(vec![crate::core::types::ModelDefinition {
                public_id: "scripted/model-a".to_string(),
                display_name: "Scripted Model".to_string(),
                provider_id: self.name.clone(),
                upstream_id: "model-a".to_string(),
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

    fn delta_chunk(content: &str, finish_reason: Option<FinishReason>) -> StreamItem {
        StreamItem::Delta(ChatChunk {
            id: "chunk-1".to_string(),
            model: "model-a".to_string(),
            created: Utc::now().timestamp(),
            object: ChatChunk::object_tag().to_string(),
            choices: vec![ChatStreamChoice {
                index: 0,
                delta: ChatDelta {
                    role: None,
                    content: Some(content.to_string()),
                    reasoning: None,
                    image_urls: Vec::new(),
                },
                finish_reason,
                error: None,
            }],
            usage: None,
        })
    }

    async fn state_with_adapter(script: Vec<StreamItem>) -> (AppState, std::sync::Arc<InProcessRequestRepository>) {
        let repo = std::sync::Arc::new(InProcessRequestRepository::new());
        let (handle, _join) = crate::core::ingestor::spawn(IngestorConfig::default(), repo.clone());
        let registry = std::sync::Arc::new(ModelRegistry::new());
        let gateway = std::sync::Arc::new(GatewayService::new(registry, handle));
        gateway
            .register_provider(std::sync::Arc::new(ScriptedAdapter {
                name: "scripted-main".to_string(),
                script,
            }))
            .await
            .unwrap();
        (AppState::new(gateway), repo)
    }

    fn chat_request() -> ChatRequest {
        ChatRequest {
            model: "scripted/model-a".to_string(),
            messages: vec![ChatMessage {
                role: MsgRole::User,
                content: Some(crate::core::types::MessageContent::Text("hi".to_string())),
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
            stream: true,
            stream_options: None,
            modalities: None,
            user: None,
            provider: None,
        }
    }

    async fn drive_stream(state: web::Data<AppState>) -> actix_web::Result<HttpResponse> {
        stream_chat_completions(state, chat_request(), RequestContext::default()).await
    }

    #[actix_web::test]
    async fn happy_path_splits_thinking_and_terminates_with_done() {
        let (state, repo) = state_with_adapter(vec![
            delta_chunk("<think>reason</think>answer", None),
            delta_chunk("", Some(FinishReason::Stop)),
        ])
        .await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/stream", web::post().to(drive_stream)),
        )
        .await;
        let req = test::TestRequest::post().uri("/stream").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        let body = test::read_body(resp).await;
        let text = String::from_utf8(body.to_vec()).unwrap();

        assert!(text.contains(r#""content":"answer""#), "got: {text}");
        assert!(text.contains(r#""reasoning":"reason""#), "got: {text}");
        assert!(text.trim_end().ends_with("data: [DONE]"), "got: {text}");

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let logs = repo.get_recent(10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].finish_reason, "stop");
    }

    #[actix_web::test]
    async fn upstream_error_emits_single_error_frame_and_stops() {
        let (state, repo) = state_with_adapter(vec![
            delta_chunk("partial", None),
            StreamItem::UpstreamError("upstream exploded".to_string()),
        ])
        .await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/stream", web::post().to(drive_stream)),
        )
        .await;
        let req = test::TestRequest::post().uri("/stream").to_request();
        let resp = test::call_service(&app, req).await;
        let body = test::read_body(resp).await;
        let text = String::from_utf8(body.to_vec()).unwrap();

        assert_eq!(text.matches("\"finish_reason\":\"error\"").count(), 1);
        assert!(!text.contains("[DONE]"), "error frame must not be followed by [DONE]: {text}");

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let logs = repo.get_recent(10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].finish_reason, "error");
        assert_eq!(logs[0].http_status, 200);
    }

    #[tokio::test]
    async fn dropping_an_unfinished_guard_logs_a_cancelled_record() {
        let repo = std::sync::Arc::new(InProcessRequestRepository::new());
        let (handle, _join) = crate::core::ingestor::spawn(IngestorConfig::default(), repo.clone());

        {
            let _guard = CompletionGuard {
                acc: Some(StreamLogAccumulator {
                    request_id: Some("req-cancelled".to_string()),
                    provider_id: "scripted-main".to_string(),
                    public_model_id: "scripted/model-a".to_string(),
                    upstream_model_id: "model-a".to_string(),
                    ctx: RequestContext::default(),
                    started: std::time::Instant::now(),
                    finish_reason: None,
                    prompt_tokens: 3,
                    completion_tokens: 1,
                    cached_tokens: 0,
                    cost_micros: 7,
                }),
                ingestor: handle,
            };
            // guard drops here without calling `complete`, as a client
            // disconnect would leave it.
        }

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let logs = repo.get_recent(10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].id, "req-cancelled");
        assert_eq!(logs[0].finish_reason, "cancelled");
        assert_eq!(logs[0].http_status, 499);
        assert_eq!(logs[0].input_tokens, 3);
    }
}
