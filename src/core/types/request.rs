//! Unified chat request (spec.md §3 "Chat request", §4.1).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::common::Role;
use super::content::{MessageContent, StopSequences};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamOptions {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub include_usage: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSequences>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl ChatRequest {
    /// Returns a clone with `model` replaced by the upstream model id
    /// (spec.md §4.6: the service must not mutate the caller's original
    /// request).
    pub fn with_model(&self, upstream_model: &str) -> Self {
        let mut cloned = self.clone();
        cloned.model = upstream_model.to_string();
        cloned
    }

    /// The last user message's text, used by the image-generation adapter
    /// (spec.md §4.4 "treat the last user message's text as the prompt").
    pub fn last_user_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            // `find` yields `&&ChatMessage`; `matches!` only borrows here,
            // so `Role`'s lack of `Copy` is not an issue.
            .and_then(|m| m.content.as_ref())
            .map(|c| c.as_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_model_does_not_mutate_original() {
        let req = ChatRequest {
            model: "openai/gpt-4o".to_string(),
            messages: vec![],
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
        };
        let cloned = req.with_model("gpt-4o");
        assert_eq!(req.model, "openai/gpt-4o");
        assert_eq!(cloned.model, "gpt-4o");
    }
}
