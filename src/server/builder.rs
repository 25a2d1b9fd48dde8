//! Server builder and boot sequence (spec.md §3 "Lifecycle": providers are
//! registered "after a successful `Health()` and non-empty `Models()`").
//!
//! Grounded in the teacher's `server/builder.rs` `run_server` entry point
//! and `server/server.rs`'s `HttpServer::new` provider-bootstrap loop,
//! narrowed to the core's five-vendor adapter registry instead of the
//! teacher's full provider pool.

use std::sync::Arc;

use actix_web::{App, HttpServer as ActixHttpServer, middleware::Logger, web};
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::core::gateway::GatewayService;
use crate::core::providers;
use crate::core::registry::ModelRegistry;
use crate::core::repository::InProcessRequestRepository;
use crate::error::{GatewayError, Result};

use super::routes;
use super::state::AppState;

/// Builds the gateway service from configuration: constructs each enabled
/// provider's adapter, health-probes it, and registers it (spec.md §3
/// Lifecycle, §4.6 `RegisterProvider`). A provider that fails its health
/// probe or returns an empty catalog is skipped with a warning rather than
/// failing the whole boot — the core performs no cross-provider retry, but
/// an unreachable provider at boot should not prevent the others from
/// serving traffic.
pub async fn build_gateway(config: &GatewayConfig) -> Arc<GatewayService> {
    let adapter_registry = providers::default_registry();
    let model_registry = Arc::new(ModelRegistry::new());
    let repository = Arc::new(InProcessRequestRepository::new());
    let (ingestor, _join) = crate::core::ingestor::spawn(config.ingestor.clone(), repository);
    let service = Arc::new(GatewayService::new(model_registry, ingestor));

    for provider_config in config.providers.iter().filter(|p| p.enabled) {
        let adapter = match adapter_registry.build(provider_config, &config.server) {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!(provider = %provider_config.id, error = %e, "failed to construct provider adapter");
                continue;
            }
        };

        if let Err(e) = adapter.health().await {
            warn!(provider = %provider_config.id, error = %e, "provider failed health probe, skipping registration");
            continue;
        }

        match service.register_provider(adapter).await {
            Ok(count) => info!(provider = %provider_config.id, models = count, "registered provider"),
            Err(e) => warn!(provider = %provider_config.id, error = %e, "failed to register provider"),
        }
    }

    service
}

/// Loads configuration, boots the gateway, and runs the HTTP server until
/// it stops (spec.md §4.10 "HTTP Entry Handlers", §6 "HTTP surface").
pub async fn run_server(config_path: &str) -> Result<()> {
    let config = match GatewayConfig::from_file(config_path) {
        Ok(config) => config,
        Err(e) => {
            warn!(path = config_path, error = %e, "failed to load config file, using defaults");
            GatewayConfig::default()
        }
    };

    let gateway = build_gateway(&config).await;
    let state = web::Data::new(AppState::new(gateway));
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    info!(addr = %bind_addr, "starting gateway HTTP server");

    ActixHttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .configure(routes::configure)
    })
    .bind(&bind_addr)
    .map_err(|e| GatewayError::Internal(format!("failed to bind {bind_addr}: {e}")))?
    .run()
    .await
    .map_err(|e| GatewayError::Internal(format!("server error: {e}")))
}
