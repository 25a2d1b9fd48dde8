//! Anthropic Messages API adapter (C4, spec.md §4.4 "Anthropic").
//!
//! Grounded in the teacher's `core/providers/anthropic/{provider,streaming}.rs`
//! shape: system messages concatenate into a top-level `system` string,
//! image parts become base64 `source` blocks, and `max_tokens` defaults to
//! 4096 when the caller didn't specify one (Anthropic requires the field).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::{ProviderConfig, ServerConfig};
use crate::core::http::{SseLineReader, send_unary};
use crate::core::types::{
    ChatChunk, ChatDelta, ChatRequest, ChatResponse, ChatResponseMessage, ChatStreamChoice, Choice, ContentPart,
    FinishReason, MessageContent, ModelDefinition, Role, StreamItem, Usage,
};
use crate::error::GatewayError;

use super::shared::{map_upstream_error, resolve_timeout, seeded_model_definitions};
use super::traits::{ChatStream, ProviderAdapter};

const DEFAULT_MAX_TOKENS: u32 = 4096;
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Clone)]
pub struct AnthropicAdapter {
    instance_name: String,
    base_url: String,
    credential: String,
    version: String,
    models: Vec<ModelDefinition>,
    client: reqwest::Client,
    health_timeout: Duration,
}

impl AnthropicAdapter {
    pub fn new(provider: &ProviderConfig, server: &ServerConfig) -> Result<Self, GatewayError> {
        let credential = provider.resolved_credential()?;
        let base_url = provider
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.anthropic.com/v1".to_string());
        let timeout = resolve_timeout(provider, server.unary_timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Internal(format!("failed to build http client: {e}")))?;

        Ok(Self {
            instance_name: provider.id.clone(),
            base_url,
            credential,
            version: provider
                .config
                .get("version")
                .cloned()
                .unwrap_or_else(|| ANTHROPIC_VERSION.to_string()),
            models: seeded_model_definitions(provider),
            client,
            health_timeout: Duration::from_secs(server.health_timeout_secs),
        })
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![
            ("x-api-key".to_string(), self.credential.clone()),
            ("anthropic-version".to_string(), self.version.clone()),
        ]
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    model: String,
    content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

/// Builds the vendor request body: system messages concatenate (joined by
/// blank lines) into the top-level `system` field; remaining messages keep
/// their relative order, each text/image part converted to Anthropic's
/// content-block shape (spec.md §4.4).
fn build_request(request: &ChatRequest, stream: bool) -> AnthropicRequest {
    let mut system_parts = Vec::new();
    let mut messages = Vec::new();

    for msg in &request.messages {
        let Some(content) = &msg.content else { continue };
        if matches!(msg.role, Role::System) {
            system_parts.push(content.as_text());
            continue;
        }
        messages.push(AnthropicMessage {
            role: match msg.role {
                Role::Assistant => "assistant".to_string(),
                _ => "user".to_string(),
            },
            content: content_to_blocks(content),
        });
    }

    AnthropicRequest {
        model: request.model.clone(),
        messages,
        max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        system: if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        },
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: request.top_k,
        stop_sequences: request.stop.as_ref().map(|s| s.0.clone()),
        stream,
    }
}

fn content_to_blocks(content: &MessageContent) -> Vec<Value> {
    match content {
        MessageContent::Text(text) => vec![serde_json::json!({"type": "text", "text": text})],
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => serde_json::json!({"type": "text", "text": text}),
                ContentPart::ImageUrl { image_url } => image_block(&image_url.url),
            })
            .collect(),
    }
}

/// Converts a data-URL (`data:<mime>;base64,<payload>`) image reference into
/// Anthropic's base64 source block; non-data URLs pass through as a `url`
/// source, which recent Anthropic API versions also accept.
fn image_block(url: &str) -> Value {
    if let Some(rest) = url.strip_prefix("data:") {
        if let Some((mime, payload)) = rest.split_once(";base64,") {
            return serde_json::json!({
                "type": "image",
                "source": {"type": "base64", "media_type": mime, "data": payload}
            });
        }
    }
    serde_json::json!({"type": "image", "source": {"type": "url", "url": url}})
}

fn response_to_unified(resp: AnthropicResponse) -> ChatResponse {
    let text: String = resp
        .content
        .iter()
        .filter_map(|b| match b {
            AnthropicContentBlock::Text { text } => Some(text.as_str()),
            AnthropicContentBlock::Other => None,
        })
        .collect();

    let usage = resp.usage.map(|u| Usage {
        prompt_tokens: u.input_tokens,
        completion_tokens: u.output_tokens,
        total_tokens: u.input_tokens + u.output_tokens,
        prompt_tokens_details: None,
        completion_tokens_details: None,
        cost_micros: None,
    });

    ChatResponse::new_unary(
        resp.id,
        resp.model,
        vec![Choice {
            index: 0,
            message: ChatResponseMessage {
                role: Role::Assistant,
                content: Some(MessageContent::Text(text)),
                reasoning: None,
            },
            finish_reason: resp.stop_reason.map(|r| FinishReason::from_vendor_token(&map_stop_reason(&r))),
        }],
        usage,
    )
}

/// Anthropic's stop reasons don't match OpenAI's vocabulary; normalize the
/// two that do (spec.md §4.4 "finish reason normalization").
fn map_stop_reason(raw: &str) -> String {
    match raw {
        "end_turn" | "stop_sequence" => "stop".to_string(),
        "max_tokens" => "length".to_string(),
        "tool_use" => "tool_calls".to_string(),
        other => other.to_string(),
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn instance_name(&self) -> &str {
        &self.instance_name
    }

    fn vendor_type(&self) -> &'static str {
        "anthropic"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        let body = build_request(request, false);
        let url = format!("{}/messages", self.base_url);
        let headers = self.headers();
        let headers_ref: Vec<(&str, &str)> = headers.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

        let resp: AnthropicResponse = send_unary(&self.client, Method::POST, &url, Some(&body), &headers_ref)
            .await
            .map_err(map_upstream_error)?;
        Ok(response_to_unified(resp))
    }

    async fn stream(&self, request: ChatRequest) -> Result<ChatStream, GatewayError> {
        let body = build_request(&request, true);
        let url = format!("{}/messages", self.base_url);
        let headers = self.headers();
        let client = self.client.clone();
        let model = request.model.clone();

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            run_anthropic_stream(client, url, body, headers, model, tx).await;
        });
        Ok(rx)
    }

    async fn models(&self) -> Result<Vec<ModelDefinition>, GatewayError> {
        Ok(self.models.clone())
    }

    async fn health(&self) -> Result<(), GatewayError> {
        let url = format!("{}/models", self.base_url);
        let headers = self.headers();
        let mut req = self.client.get(&url);
        for (name, value) in &headers {
            req = req.header(name, value);
        }
        req.timeout(self.health_timeout)
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

/// Anthropic's SSE events are named (`event: content_block_delta`, etc.)
/// with a following `data: {...}` line. We only need the text deltas and
/// the terminal `message_delta`'s `stop_reason` (spec.md §4.4 "streaming
/// event mapping").
async fn run_anthropic_stream(
    client: reqwest::Client,
    url: String,
    body: AnthropicRequest,
    headers: Vec<(String, String)>,
    model: String,
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

    let message_id = uuid::Uuid::new_v4().to_string();
    let mut index = 0u32;

    loop {
        let line = match reader.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                let _ = tx.send(StreamItem::UpstreamError(e.body)).await;
                return;
            }
        };

        let Some(data) = line.strip_prefix("data: ") else {
            continue;
        };
        let Some(event) = serde_json::from_str::<Value>(data).ok() else {
            continue;
        };

        let event_type = event.get("type").and_then(|v| v.as_str()).unwrap_or_default();
        match event_type {
            "message_start" => {
                let Some(input_tokens) = event
                    .get("message")
                    .and_then(|m| m.get("usage"))
                    .and_then(|u| u.get("input_tokens"))
                    .and_then(|t| t.as_u64())
                else {
                    continue;
                };
                let mut chunk = delta_chunk(&message_id, &model, index, None, None);
                chunk.usage = Some(Usage {
                    prompt_tokens: input_tokens as u32,
                    completion_tokens: 0,
                    total_tokens: input_tokens as u32,
                    prompt_tokens_details: None,
                    completion_tokens_details: None,
                    cost_micros: None,
                });
                if tx.send(StreamItem::Delta(chunk)).await.is_err() {
                    return;
                }
            }
            "content_block_delta" => {
                let Some(text) = event
                    .get("delta")
                    .and_then(|d| d.get("text"))
                    .and_then(|t| t.as_str())
                else {
                    continue;
                };
                let chunk = delta_chunk(&message_id, &model, index, Some(text.to_string()), None);
                index += 1;
                if tx.send(StreamItem::Delta(chunk)).await.is_err() {
                    return;
                }
            }
            "message_delta" => {
                let reason = event
                    .get("delta")
                    .and_then(|d| d.get("stop_reason"))
                    .and_then(|r| r.as_str());
                let output_tokens = event
                    .get("usage")
                    .and_then(|u| u.get("output_tokens"))
                    .and_then(|t| t.as_u64());
                if reason.is_none() && output_tokens.is_none() {
                    continue;
                }
                let mut chunk = delta_chunk(&message_id, &model, index, None, None);
                if let Some(reason) = reason {
                    chunk.choices[0].finish_reason = Some(FinishReason::from_vendor_token(&map_stop_reason(reason)));
                }
                if let Some(output_tokens) = output_tokens {
                    chunk.usage = Some(Usage {
                        prompt_tokens: 0,
                        completion_tokens: output_tokens as u32,
                        total_tokens: output_tokens as u32,
                        prompt_tokens_details: None,
                        completion_tokens_details: None,
                        cost_micros: None,
                    });
                }
                if tx.send(StreamItem::Delta(chunk)).await.is_err() {
                    return;
                }
            }
            "message_stop" => return,
            _ => continue,
        }
    }
}

fn delta_chunk(id: &str, model: &str, index: u32, content: Option<String>, reasoning: Option<String>) -> ChatChunk {
    ChatChunk {
        id: id.to_string(),
        model: model.to_string(),
        created: chrono::Utc::now().timestamp(),
        object: ChatChunk::object_tag().to_string(),
        choices: vec![ChatStreamChoice {
            index,
            delta: ChatDelta {
                role: None,
                content,
                reasoning,
                image_urls: Vec::new(),
            },
            finish_reason: None,
            error: None,
        }],
        usage: None,
    }
}

pub fn factory() -> super::registry::AdapterFactory {
    Arc::new(|provider: &ProviderConfig, server: &ServerConfig| {
        AnthropicAdapter::new(provider, server).map(|a| Arc::new(a) as Arc<dyn ProviderAdapter>)
    })
}
