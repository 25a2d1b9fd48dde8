//! HTTP entry handlers (C10, spec.md §4.10) and the stream pipeline's
//! consumer side (C7, spec.md §4.7). Split from `crate::core` because both
//! depend on `actix-web`, mirroring the teacher's `core`/`server` split.

pub mod auth;
pub mod builder;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod stream;

pub use builder::{build_gateway, run_server};
pub use state::AppState;
