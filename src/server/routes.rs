//! Route table (spec.md §6 "HTTP surface").

use actix_web::web;

use super::handlers;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(handlers::health_check))
        .service(
            web::scope("/api/v1")
                .route("/chat/completions", web::post().to(handlers::chat_completions))
                .route("/models", web::get().to(handlers::list_models)),
        );
}
