//! Built-in routes served next to the caller's router.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

use crate::config::{Configuration, LibraryPolicy};
use crate::error::ErrorResponse;

pub const HEALTH_PATH: &str = "/api/health";
pub const POLICY_PATH: &str = "/api/library/policy";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub environment: &'static str,
    pub version: &'static str,
}

/// Routes every deployment exposes.
pub fn builtin_routes(config: Arc<Configuration>) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health))
        .route(POLICY_PATH, get(library_policy))
        .with_state(config)
}

async fn health(State(config): State<Arc<Configuration>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        environment: config.environment.as_str(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn library_policy(State(config): State<Arc<Configuration>>) -> Json<LibraryPolicy> {
    Json(config.library)
}

/// JSON 404 for paths no router claims.
pub async fn not_found() -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "Route not found".to_string(),
        }),
    )
}
