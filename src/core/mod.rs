//! The gateway core (spec.md §2 C1-C9): unified schema, transport helpers,
//! provider adapters and their registry, the model registry, the gateway
//! service that orchestrates a request end to end, the thinking extractor,
//! and the usage ingestor. HTTP entry handlers (C10) live in `crate::server`
//! since they depend on the actix-web framework, mirroring the teacher's
//! `core`/`server` split.

pub mod gateway;
pub mod http;
pub mod ingestor;
pub mod providers;
pub mod registry;
pub mod repository;
pub mod types;
pub mod validation;
