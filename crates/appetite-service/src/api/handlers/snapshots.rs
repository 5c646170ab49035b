//! Decision snapshot (fact ledger) handlers

use crate::api::auth::TenantScope;
use crate::api::extract::{ApiJson, ApiQuery};
use crate::api::state::AppState;
use crate::error::ApiResult;
use appetite_core::{AppetiteError, MetricObservation, ObservationDraft};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

const DEFAULT_HISTORY_LIMIT: usize = 100;
const MAX_HISTORY_LIMIT: usize = 1000;

pub async fn create_snapshot(
    State(state): State<AppState>,
    scope: TenantScope,
    ApiJson(draft): ApiJson<ObservationDraft>,
) -> ApiResult<(StatusCode, Json<MetricObservation>)> {
    let observation = state.engine.ledger().append(&scope.tenant_id, draft).await?;
    Ok((StatusCode::CREATED, Json(observation)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    #[serde(default)]
    pub metric_code: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SnapshotListResponse {
    pub snapshots: Vec<MetricObservation>,
}

pub async fn list_snapshots(
    State(state): State<AppState>,
    scope: TenantScope,
    ApiQuery(query): ApiQuery<HistoryQuery>,
) -> ApiResult<Json<SnapshotListResponse>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let snapshots = state
        .engine
        .ledger()
        .history(&scope.tenant_id, query.metric_code.as_deref(), limit)
        .await?;
    Ok(Json(SnapshotListResponse { snapshots }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentQuery {
    pub metric_code: String,
    #[serde(default)]
    pub entity_id: Option<String>,
}

pub async fn current_snapshot(
    State(state): State<AppState>,
    scope: TenantScope,
    ApiQuery(query): ApiQuery<CurrentQuery>,
) -> ApiResult<Json<MetricObservation>> {
    let observation = state
        .engine
        .ledger()
        .current(
            &scope.tenant_id,
            &query.metric_code,
            query.entity_id.as_deref(),
        )
        .await?
        .ok_or_else(|| {
            AppetiteError::NotFound(format!("no observation for '{}'", query.metric_code))
        })?;
    Ok(Json(observation))
}

#[derive(Debug, Serialize)]
pub struct ChainResponse {
    pub chain: Vec<MetricObservation>,
}

pub async fn snapshot_chain(
    State(state): State<AppState>,
    scope: TenantScope,
    Path((_, observation_id)): Path<(String, String)>,
) -> ApiResult<Json<ChainResponse>> {
    let chain = state
        .engine
        .ledger()
        .chain(&scope.tenant_id, &observation_id)
        .await?;
    Ok(Json(ChainResponse { chain }))
}
