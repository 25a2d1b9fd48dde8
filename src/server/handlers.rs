//! HTTP entry handlers (C10, spec.md §4.10).
//!
//! Bind JSON, validate, dispatch to the gateway service (C6), and render
//! either a unary JSON response or delegate to the stream pipeline (C7).
//! Grounded in the teacher's `server/routes/ai/chat.rs` and
//! `server/handlers.rs` shape, narrowed to the three endpoints spec.md
//! §4.10 and §6 name.

use actix_web::{HttpRequest, HttpResponse, Result as ActixResult, web};
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use crate::core::gateway::{ModelFilter, RequestContext};
use crate::core::types::{ChatRequest, ModelView};
use crate::core::validation::validate_chat_request;
use actix_web::ResponseError;

use super::auth::read_principal;
use super::state::AppState;
use super::stream::stream_chat_completions;

/// `X-App-Name` header (spec.md §6 "Auth contract"): an optional caller
/// label carried through to the usage log, read directly from the request
/// since the auth/app-label middleware itself is an external collaborator
/// (spec.md §1 "Out of scope").
const APP_NAME_HEADER: &str = "X-App-Name";

fn request_context(req: &HttpRequest) -> RequestContext {
    let app_label = req
        .headers()
        .get(APP_NAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let client_ip = req.connection_info().realip_remote_addr().map(str::to_string);
    let user_agent = req
        .headers()
        .get(actix_web::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let principal = read_principal(req);

    RequestContext {
        user_id: principal.user_id,
        api_key_id: principal.api_key_id,
        app_label,
        client_ip,
        user_agent,
    }
}

/// `POST /api/v1/chat/completions` (spec.md §4.10, §6).
pub async fn chat_completions(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<ChatRequest>,
) -> ActixResult<HttpResponse> {
    let request = body.into_inner();

    if let Err(e) = validate_chat_request(&request) {
        warn!(model = %request.model, "chat completion request failed validation");
        return Ok(e.error_response());
    }

    let ctx = request_context(&req);

    if request.stream {
        return stream_chat_completions(state, request, ctx).await;
    }

    info!(model = %request.model, "dispatching unary chat completion");
    match state.gateway.chat(&request, &ctx).await {
        Ok(response) => Ok(HttpResponse::Ok().json(response)),
        Err(e) => Ok(e.error_response()),
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ModelListQuery {
    pub provider: Option<String>,
    pub id: Option<String>,
    pub modality: Option<String>,
    pub owned_by: Option<String>,
}

/// `GET /api/v1/models?provider=&id=&modality=&owned_by=` (spec.md §4.10).
pub async fn list_models(state: web::Data<AppState>, query: web::Query<ModelListQuery>) -> ActixResult<HttpResponse> {
    let filter = ModelFilter {
        provider: query.provider.clone(),
        id_substring: query.id.clone(),
        modality: query.modality.clone(),
        owned_by: query.owned_by.clone(),
    };
    let models: Vec<ModelView> = state.gateway.list_all_models(&filter).iter().map(ModelView::from).collect();
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "object": "list",
        "data": models,
    })))
}

/// `GET /health` (spec.md §4.10).
pub async fn health_check(state: web::Data<AppState>) -> ActixResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "uptime": state.uptime_secs(),
        "time": Utc::now().to_rfc3339(),
    })))
}
