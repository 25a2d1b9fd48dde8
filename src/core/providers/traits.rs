//! Provider adapter interface (C3, spec.md §4.3).
//!
//! Grounded in the teacher's `core/traits/provider.rs` (`LLMProvider`
//! trait shape, `async_trait` use), narrowed to exactly the five
//! capabilities spec.md §4.3 names: instance name, vendor tag, `Chat`,
//! `Stream`, `Models`, `Health`.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::types::{ChatRequest, ChatResponse, ModelDefinition, StreamItem};
use crate::error::GatewayError;

/// Channel carrying stream items from an adapter's background producer task
/// to the stream pipeline (C7). Capacity 1 is sufficient (spec.md §5): the
/// consumer drains one item at a time, which backpressures the producer's
/// upstream read.
pub type ChatStream = mpsc::Receiver<StreamItem>;

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// The operator-chosen instance id (spec.md §3 "Provider instance").
    fn instance_name(&self) -> &str;

    /// The vendor type tag this adapter was registered under
    /// (e.g. "openai", "anthropic").
    fn vendor_type(&self) -> &'static str;

    /// Unary chat completion.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError>;

    /// Streaming chat completion. Returns a fresh, independent channel per
    /// call (spec.md §4.3: "restartable only by a fresh call"). The
    /// producer task sends items in upstream order and closes the channel
    /// when it finishes; on error it sends exactly one `StreamItem::UpstreamError`
    /// before closing (spec.md §4.7).
    async fn stream(&self, request: ChatRequest) -> Result<ChatStream, GatewayError>;

    /// The catalog this adapter claims authority over (spec.md §4.3).
    async fn models(&self) -> Result<Vec<ModelDefinition>, GatewayError>;

    /// Verifies reachability and credential validity in bounded time
    /// (spec.md §4.3, §5: 5s budget enforced by the caller).
    async fn health(&self) -> Result<(), GatewayError>;
}
