//! A multi-provider LLM gateway: a single HTTP front door that accepts an
//! OpenAI-style chat-completion request, routes it to the correct upstream
//! model vendor, translates the request and response between the unified
//! wire format and the vendor's native format, streams tokens back to the
//! client in real time, and records per-request usage for billing and
//! analytics.
//!
//! `core` holds the request pipeline (C1-C9): the unified schema, the
//! provider adapters and their registry, the model registry, the gateway
//! service, the stream pipeline's producer side, the thinking extractor,
//! and the usage ingestor. `server` holds the HTTP entry handlers (C10)
//! and the stream pipeline's consumer side, kept separate because they
//! depend on `actix-web` while the core does not need to.

pub mod config;
pub mod core;
pub mod error;
pub mod server;

pub use error::{GatewayError, Result};
