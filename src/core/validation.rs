//! Request validation (C10, spec.md §7 `invalid-request`). Grounded in the
//! teacher's `utils/data/requests/validation.rs`: per-field checks collected
//! into a message, with an index-qualified key per offending message. Unlike
//! the teacher's single-error-short-circuit style, this collects every
//! failure into a field→message map up front (spec.md §7 "Validation errors
//! surface with a field→message map in the `errors` extension", §8 scenario
//! 5: a single request can fail on both `messages[0].role` and `model`).

use std::collections::HashMap;

use crate::core::types::ChatRequest;
use crate::error::GatewayError;

/// Validates a decoded chat request, returning every field error found
/// rather than stopping at the first one (spec.md §8 scenario 5 expects
/// both `messages[0].role` and `model` to appear in the same response).
pub fn validate_chat_request(request: &ChatRequest) -> Result<(), GatewayError> {
    let mut errors = HashMap::new();

    if request.model.is_empty() {
        errors.insert("model".to_string(), "model must not be empty".to_string());
    }

    if request.messages.is_empty() {
        errors.insert("messages".to_string(), "messages must not be empty".to_string());
    } else {
        for (i, message) in request.messages.iter().enumerate() {
            if !message.role.is_recognized() {
                errors.insert(
                    format!("messages[{i}].role"),
                    format!("unrecognized role: {}", message.role.as_str()),
                );
            }
            if message.content.is_none() && message.tool_call_id.is_none() {
                errors.insert(format!("messages[{i}].content"), "content must not be empty".to_string());
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(GatewayError::invalid_with_fields("request failed validation", errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ChatMessage, MessageContent, Role};

    fn base_request() -> ChatRequest {
        ChatRequest {
            model: "openai/gpt-4o".to_string(),
            messages: vec![ChatMessage {
                role: Role::User,
                content: Some(MessageContent::Text("hi".to_string())),
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

    #[test]
    fn accepts_a_well_formed_request() {
        assert!(validate_chat_request(&base_request()).is_ok());
    }

    #[test]
    fn flags_bad_role_and_missing_model_together() {
        let mut request = base_request();
        request.model = String::new();
        request.messages[0].role = Role::Unknown("bad".to_string());

        let err = validate_chat_request(&request).unwrap_err();
        match err {
            GatewayError::InvalidRequest { field_errors, .. } => {
                assert!(field_errors.contains_key("model"));
                assert!(field_errors.contains_key("messages[0].role"));
            }
            other => panic!("expected InvalidRequest, got {other:?}"),
        }
    }

    #[test]
    fn flags_empty_messages() {
        let mut request = base_request();
        request.messages.clear();
        let err = validate_chat_request(&request).unwrap_err();
        match err {
            GatewayError::InvalidRequest { field_errors, .. } => {
                assert!(field_errors.contains_key("messages"));
            }
            other => panic!("expected InvalidRequest, got {other:?}"),
        }
    }
}
