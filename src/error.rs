//! Error handling for the gateway (spec.md §7).
//!
//! Grounded in the teacher's `src/utils/error/error.rs`: a single
//! `thiserror`-derived enum implementing `actix_web::ResponseError`, with
//! each variant mapping to one RFC 9457 problem+json response.

use std::collections::HashMap;

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::Value;
use thiserror::Error;

use crate::core::types::Problem;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// Body decode failure, missing required field, bad role, empty
    /// messages (spec.md §7 `invalid-request`).
    #[error("invalid request: {message}")]
    InvalidRequest {
        message: String,
        field_errors: HashMap<String, String>,
    },

    /// Unknown public model id (spec.md §7 `not-found`).
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// Model resolved to a provider id that is not registered
    /// (spec.md §4.6, §7 `provider-unavailable`).
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Network error or non-2xx from the provider (spec.md §7
    /// `upstream-failure`).
    #[error("upstream failure: {message}")]
    UpstreamFailure {
        status: u16,
        message: String,
        vendor_type: Option<String>,
        vendor_code: Option<String>,
        vendor_param: Option<String>,
    },

    /// Client disconnected mid-stream (spec.md §7 `cancelled`, the 499
    /// convention).
    #[error("request cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

impl GatewayError {
    pub fn invalid(message: impl Into<String>) -> Self {
        GatewayError::InvalidRequest {
            message: message.into(),
            field_errors: HashMap::new(),
        }
    }

    pub fn invalid_with_fields(message: impl Into<String>, fields: HashMap<String, String>) -> Self {
        GatewayError::InvalidRequest {
            message: message.into(),
            field_errors: fields,
        }
    }

    pub fn status_code_u16(&self) -> u16 {
        match self {
            GatewayError::InvalidRequest { .. } => 400,
            GatewayError::ModelNotFound(_) => 404,
            GatewayError::ProviderUnavailable(_) => 502,
            GatewayError::UpstreamFailure { status, .. } => {
                if *status >= 400 && *status < 600 {
                    *status
                } else {
                    502
                }
            }
            GatewayError::Cancelled => 499,
            GatewayError::Internal(_) => 500,
            GatewayError::Config(_) => 500,
        }
    }

    /// Renders this error as an RFC 9457 problem object (spec.md §7, §6).
    pub fn to_problem(&self) -> Problem {
        let status = self.status_code_u16();
        match self {
            GatewayError::InvalidRequest { message, field_errors } => {
                let mut p = Problem::new("about:blank", "Validation Error", status).with_detail(message.clone());
                if !field_errors.is_empty() {
                    p = p.with_extension(
                        "errors",
                        serde_json::to_value(field_errors).unwrap_or(Value::Null),
                    );
                }
                p
            }
            GatewayError::ModelNotFound(id) => {
                Problem::new("about:blank", "Model Not Found", status).with_detail(format!("unknown model: {id}"))
            }
            GatewayError::ProviderUnavailable(id) => Problem::new("about:blank", "Provider Unavailable", status)
                .with_detail(format!("provider not registered: {id}")),
            GatewayError::UpstreamFailure {
                message,
                vendor_type,
                vendor_code,
                vendor_param,
                ..
            } => {
                let mut p = Problem::new("about:blank", "Upstream Provider Error", status).with_detail(message.clone());
                if let Some(t) = vendor_type {
                    p = p.with_extension("upstream_type", Value::String(t.clone()));
                }
                if let Some(c) = vendor_code {
                    p = p.with_extension("upstream_code", Value::String(c.clone()));
                }
                if let Some(param) = vendor_param {
                    p = p.with_extension("upstream_param", Value::String(param.clone()));
                }
                p
            }
            GatewayError::Cancelled => Problem::new("about:blank", "Request Cancelled", status),
            GatewayError::Internal(message) => {
                Problem::new("about:blank", "Internal Server Error", status).with_detail(message.clone())
            }
            GatewayError::Config(e) => Problem::new("about:blank", "Configuration Error", status).with_detail(e.to_string()),
        }
    }
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status_code_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        let problem = self.to_problem();
        HttpResponse::build(self.status_code())
            .content_type("application/problem+json")
            .json(problem)
    }
}
