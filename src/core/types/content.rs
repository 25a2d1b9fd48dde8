//! Polymorphic message content and the `stop` field.
//!
//! Both types decode from either a bare string or a sequence, and re-encode
//! to whichever in-memory shape is populated (spec.md §4.1). This is the one
//! subtle part of the unified schema: a hand-rolled `Deserialize`/`Serialize`
//! pair instead of a derived one, so the wire shape stays exactly as
//! observed by clients.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A single part of a multi-part message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Message content: either a bare string or an ordered sequence of parts.
#[derive(Debug, Clone)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Extracts the plain-text view of this content, concatenating any text
    /// parts. Used by adapters that only need a prompt string (e.g. the
    /// image-generation adapter, spec.md §4.4).
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    pub fn image_parts(&self) -> Vec<&ImageUrl> {
        match self {
            MessageContent::Text(_) => Vec::new(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::ImageUrl { image_url } => Some(image_url),
                    ContentPart::Text { .. } => None,
                })
                .collect(),
        }
    }
}

impl Serialize for MessageContent {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            MessageContent::Text(s) => s.serialize(serializer),
            MessageContent::Parts(parts) => parts.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for MessageContent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Parts(Vec<ContentPart>),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Text(s) => Ok(MessageContent::Text(s)),
            Repr::Parts(p) => Ok(MessageContent::Parts(p)),
        }
    }
}

/// `stop`: decodes from a single string or a sequence of strings; canonical
/// encoding is the single-string form when exactly one value is present
/// (spec.md §4.1, tested by the stop round-trip property in §8).
#[derive(Debug, Clone, Default)]
pub struct StopSequences(pub Vec<String>);

impl Serialize for StopSequences {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self.0.as_slice() {
            [single] => single.serialize(serializer),
            many => many.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for StopSequences {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Single(String),
            Many(Vec<String>),
        }
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Single(s) => StopSequences(vec![s]),
            Repr::Many(v) => StopSequences(v),
        })
    }
}
