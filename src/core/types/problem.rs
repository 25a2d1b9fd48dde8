//! RFC 9457 `application/problem+json` rendering (spec.md §7, §6).

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub type_: String,
    pub title: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(flatten)]
    pub extensions: HashMap<String, Value>,
}

impl Problem {
    pub fn new(type_: &str, title: &str, status: u16) -> Self {
        Self {
            type_: type_.to_string(),
            title: title.to_string(),
            status,
            detail: None,
            extensions: HashMap::new(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_extension(mut self, key: &str, value: Value) -> Self {
        self.extensions.insert(key.to_string(), value);
        self
    }
}
