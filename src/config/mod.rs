//! Configuration loading (ambient stack; external per spec.md §1 in the
//! source system, but every runnable crate needs a loader — grounded in the
//! teacher's `src/config/loader.rs` TOML-first convention).

pub mod models;
pub mod validation;

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

pub use models::{IngestorConfig, ProviderConfig, ServerConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("missing required field: {0}")]
    MissingField(String),
    #[error("environment variable not set: {0}")]
    MissingEnvVar(String),
    #[error("duplicate provider id: {0}")]
    DuplicateProviderId(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ingestor: IngestorConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            ingestor: IngestorConfig::default(),
            providers: Vec::new(),
        }
    }
}

impl GatewayConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let text = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_ref.display().to_string(),
            source,
        })?;
        let config: GatewayConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_ref.display().to_string(),
            source,
        })?;
        validation::validate(&config)?;
        Ok(config)
    }
}
