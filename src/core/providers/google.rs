//! Google Gemini adapter (C4, spec.md §4.4 "Google").
//!
//! Grounded in the teacher's `core/providers/google/{provider,streaming}.rs`
//! shape. Gemini's wire format is the furthest from the unified schema of
//! the four vendors: roles are `user`/`model`, content is `parts[]`, and
//! generation parameters nest under `generationConfig`. Safety settings
//! default to `BLOCK_NONE` across all categories so the gateway doesn't
//! silently truncate model output behind a vendor-side filter the caller
//! never asked for (spec.md §4.4 "Google ... safety settings").

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

const SAFETY_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

#[derive(Clone)]
pub struct GoogleAdapter {
    instance_name: String,
    base_url: String,
    credential: String,
    models: Vec<ModelDefinition>,
    client: reqwest::Client,
    health_timeout: Duration,
}

impl GoogleAdapter {
    pub fn new(provider: &ProviderConfig, server: &ServerConfig) -> Result<Self, GatewayError> {
        let credential = provider.resolved_credential()?;
        let base_url = provider
            .base_url
            .clone()
            .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string());
        let timeout = resolve_timeout(provider, server.unary_timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Internal(format!("failed to build http client: {e}")))?;

        Ok(Self {
            instance_name: provider.id.clone(),
            base_url,
            credential,
            models: seeded_model_definitions(provider),
            client,
            health_timeout: Duration::from_secs(server.health_timeout_secs),
        })
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}?key={}", self.base_url, model, method, self.credential)
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "systemInstruction")]
    system_instruction: Option<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
    #[serde(rename = "safetySettings")]
    safety_settings: Vec<GeminiSafetySetting>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<Value>,
}

#[derive(Debug, Default, Serialize)]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "topP")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "topK")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "stopSequences")]
    stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "responseModalities")]
    response_modalities: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct GeminiSafetySetting {
    category: String,
    threshold: String,
}

fn safety_settings() -> Vec<GeminiSafetySetting> {
    SAFETY_CATEGORIES
        .iter()
        .map(|c| GeminiSafetySetting {
            category: c.to_string(),
            threshold: "BLOCK_NONE".to_string(),
        })
        .collect()
}

fn role_to_gemini(role: &Role) -> &'static str {
    match role {
        Role::Assistant => "model",
        _ => "user",
    }
}

fn content_to_parts(content: &MessageContent) -> Vec<Value> {
    match content {
        MessageContent::Text(text) => vec![serde_json::json!({"text": text})],
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => serde_json::json!({"text": text}),
                ContentPart::ImageUrl { image_url } => inline_data_part(&image_url.url),
            })
            .collect(),
    }
}

fn inline_data_part(url: &str) -> Value {
    if let Some(rest) = url.strip_prefix("data:") {
        if let Some((mime, payload)) = rest.split_once(";base64,") {
            return serde_json::json!({"inlineData": {"mimeType": mime, "data": payload}});
        }
    }
    serde_json::json!({"fileData": {"fileUri": url}})
}

fn build_request(request: &ChatRequest) -> GeminiRequest {
    let mut contents = Vec::new();
    let mut system_instruction = None;

    for msg in &request.messages {
        let Some(content) = &msg.content else { continue };
        if matches!(msg.role, Role::System) {
            system_instruction = Some(GeminiContent {
                role: "user".to_string(),
                parts: content_to_parts(content),
            });
            continue;
        }
        contents.push(GeminiContent {
            role: role_to_gemini(&msg.role).to_string(),
            parts: content_to_parts(content),
        });
    }

    GeminiRequest {
        contents,
        system_instruction,
        generation_config: GeminiGenerationConfig {
            temperature: request.temperature,
            top_p: request.top_p,
            top_k: request.top_k,
            max_output_tokens: request.max_tokens,
            stop_sequences: request.stop.as_ref().map(|s| s.0.clone()),
            response_modalities: request
                .modalities
                .as_ref()
                .map(|mods| mods.iter().map(|m| m.to_uppercase()).collect()),
        },
        safety_settings: safety_settings(),
    }
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiResponseContent,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "inlineData")]
    inline_data: Option<GeminiInlineData>,
}

#[derive(Debug, Deserialize)]
struct GeminiInlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: u32,
    #[serde(rename = "totalTokenCount")]
    total_token_count: u32,
}

fn map_finish_reason(raw: &str) -> String {
    match raw {
        "STOP" => "stop".to_string(),
        "MAX_TOKENS" => "length".to_string(),
        other => other.to_lowercase(),
    }
}

fn response_to_unified(model: &str, resp: GeminiResponse) -> ChatResponse {
    let candidate = resp.candidates.into_iter().next();
    let (text, finish_reason) = match candidate {
        Some(c) => {
            let text = c
                .content
                .parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join("");
            (text, c.finish_reason.map(|r| map_finish_reason(&r)))
        }
        None => (String::new(), None),
    };

    let usage = resp.usage_metadata.map(|u| Usage {
        prompt_tokens: u.prompt_token_count,
        completion_tokens: u.candidates_token_count,
        total_tokens: u.total_token_count,
        prompt_tokens_details: None,
        completion_tokens_details: None,
        cost_micros: None,
    });

    ChatResponse::new_unary(
        uuid::Uuid::new_v4().to_string(),
        model.to_string(),
        vec![Choice {
            index: 0,
            message: ChatResponseMessage {
                role: Role::Assistant,
                content: Some(MessageContent::Text(text)),
                reasoning: None,
            },
            finish_reason: finish_reason.map(|r| FinishReason::from_vendor_token(&r)),
        }],
        usage,
    )
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    fn instance_name(&self) -> &str {
        &self.instance_name
    }

    fn vendor_type(&self) -> &'static str {
        "google"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        let body = build_request(request);
        let url = self.endpoint(&request.model, "generateContent");

        let resp: GeminiResponse = send_unary(&self.client, Method::POST, &url, Some(&body), &[])
            .await
            .map_err(map_upstream_error)?;
        Ok(response_to_unified(&request.model, resp))
    }

    async fn stream(&self, request: ChatRequest) -> Result<ChatStream, GatewayError> {
        let body = build_request(&request);
        let url = format!("{}&alt=sse", self.endpoint(&request.model, "streamGenerateContent"));
        let client = self.client.clone();
        let model = request.model.clone();

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            run_google_stream(client, url, body, model, tx).await;
        });
        Ok(rx)
    }

    async fn models(&self) -> Result<Vec<ModelDefinition>, GatewayError> {
        Ok(self.models.clone())
    }

    async fn health(&self) -> Result<(), GatewayError> {
        let url = format!("{}/models?key={}", self.base_url, self.credential);
        self.client
            .get(&url)
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

async fn run_google_stream(
    client: reqwest::Client,
    url: String,
    body: GeminiRequest,
    model: String,
    tx: mpsc::Sender<StreamItem>,
) {
    let mut reader = match SseLineReader::connect(&client, Method::POST, &url, Some(&body), &[]).await {
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
        let Ok(event) = serde_json::from_str::<GeminiResponse>(data) else {
            continue;
        };

        let usage = event.usage_metadata.as_ref().and_then(|u| {
            (u.total_token_count > 0).then(|| Usage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
                total_tokens: u.total_token_count,
                prompt_tokens_details: None,
                completion_tokens_details: None,
                cost_micros: None,
            })
        });

        let Some(candidate) = event.candidates.into_iter().next() else {
            if let Some(usage) = usage {
                let mut chunk = delta_chunk_with_index(&message_id, &model, index, None, Vec::new());
                chunk.usage = Some(usage);
                index += 1;
                if tx.send(StreamItem::Delta(chunk)).await.is_err() {
                    return;
                }
            }
            continue;
        };
        let text: String = candidate
            .content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        let image_urls: Vec<String> = candidate
            .content
            .parts
            .iter()
            .filter_map(|p| p.inline_data.as_ref())
            .map(|d| format!("data:{};base64,{}", d.mime_type, d.data))
            .collect();

        let finish_reason = candidate
            .finish_reason
            .as_deref()
            .map(|r| FinishReason::from_vendor_token(&map_finish_reason(r)));
        let is_final = finish_reason.is_some();

        let mut chunk = delta_chunk_with_index(
            &message_id,
            &model,
            index,
            if text.is_empty() { None } else { Some(text) },
            image_urls,
        );
        chunk.choices[0].finish_reason = finish_reason;
        chunk.usage = usage;
        index += 1;

        if tx.send(StreamItem::Delta(chunk)).await.is_err() {
            return;
        }
        if is_final {
            return;
        }
    }
}

fn delta_chunk_with_index(
    id: &str,
    model: &str,
    index: u32,
    content: Option<String>,
    image_urls: Vec<String>,
) -> ChatChunk {
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
                reasoning: None,
                image_urls,
            },
            finish_reason: None,
            error: None,
        }],
        usage: None,
    }
}

pub fn factory() -> super::registry::AdapterFactory {
    Arc::new(|provider: &ProviderConfig, server: &ServerConfig| {
        GoogleAdapter::new(provider, server).map(|a| Arc::new(a) as Arc<dyn ProviderAdapter>)
    })
}
