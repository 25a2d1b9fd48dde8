//! Server and gateway-level settings.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_unary_timeout_secs")]
    pub unary_timeout_secs: u64,
    #[serde(default = "default_image_timeout_secs")]
    pub image_timeout_secs: u64,
    #[serde(default = "default_health_timeout_secs")]
    pub health_timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
/// 60s unary adapter HTTP client default (spec.md §5).
fn default_unary_timeout_secs() -> u64 {
    60
}
/// 5min image-gen timeout (spec.md §5, §4.4).
fn default_image_timeout_secs() -> u64 {
    300
}
/// 5s health probe timeout (spec.md §5).
fn default_health_timeout_secs() -> u64 {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            unary_timeout_secs: default_unary_timeout_secs(),
            image_timeout_secs: default_image_timeout_secs(),
            health_timeout_secs: default_health_timeout_secs(),
        }
    }
}

/// Ingestor tuning (spec.md §4.9). Fixed defaults match the spec's numbers
/// exactly; configurable only for tests.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestorConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

fn default_queue_capacity() -> usize {
    10_000
}
fn default_batch_size() -> usize {
    50
}
fn default_flush_interval_secs() -> u64 {
    5
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            batch_size: default_batch_size(),
            flush_interval_secs: default_flush_interval_secs(),
        }
    }
}
