//! Health and status handlers

use crate::api::state::AppState;
use crate::error::ApiResult;
use axum::{extract::State, Json};
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatusResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub storage_backend: String,
    pub metric_codes: Vec<String>,
    pub active_tenants: usize,
}

pub async fn service_status(
    State(state): State<AppState>,
) -> ApiResult<Json<ServiceStatusResponse>> {
    let active_tenants = state.engine.appetites().active_tenants().await?;

    Ok(Json(ServiceStatusResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
        started_at: state.started_at,
        storage_backend: state.storage_backend.to_string(),
        metric_codes: state.engine.resolver().registry().metric_codes(),
        active_tenants: active_tenants.len(),
    }))
}
