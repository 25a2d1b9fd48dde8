pub mod model_seed;
pub mod provider;
pub mod server;

pub use model_seed::ModelSeed;
pub use provider::ProviderConfig;
pub use server::{IngestorConfig, ServerConfig};
