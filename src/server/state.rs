//! Application state shared across HTTP handlers (C10).
//!
//! Grounded in the teacher's `server/state.rs`: a small `Clone` struct of
//! `Arc`-wrapped shared resources, handed to every handler through
//! `actix_web::web::Data`.

use std::sync::Arc;
use std::time::Instant;

use crate::core::gateway::GatewayService;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayService>,
    boot_time: Instant,
}

impl AppState {
    pub fn new(gateway: Arc<GatewayService>) -> Self {
        Self {
            gateway,
            boot_time: Instant::now(),
        }
    }

    /// Process uptime in seconds, for `GET /health` (spec.md §4.10).
    pub fn uptime_secs(&self) -> u64 {
        self.boot_time.elapsed().as_secs()
    }
}
