//! Risk appetite evaluation, detection and governance handlers

use crate::api::auth::TenantScope;
use crate::api::extract::{ApiJson, ApiQuery};
use crate::api::state::AppState;
use crate::error::ApiResult;
use appetite_core::{
    AppetiteDraft, AppetiteError, BreachEvent, ComparisonOperator, DetectionReport,
    EvaluationReport, ImpactPreview, RiskAppetite,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

pub async fn evaluate(
    State(state): State<AppState>,
    scope: TenantScope,
) -> ApiResult<Json<EvaluationReport>> {
    Ok(Json(state.engine.evaluate_all(&scope.tenant_id).await?))
}

pub async fn detect(
    State(state): State<AppState>,
    scope: TenantScope,
) -> ApiResult<Json<DetectionReport>> {
    Ok(Json(state.engine.detect_and_enforce(&scope.tenant_id).await?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreachQuery {
    #[serde(default)]
    pub unresolved: Option<bool>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct BreachListResponse {
    pub breaches: Vec<BreachEvent>,
}

pub async fn list_breaches(
    State(state): State<AppState>,
    scope: TenantScope,
    ApiQuery(query): ApiQuery<BreachQuery>,
) -> ApiResult<Json<BreachListResponse>> {
    let breaches = state
        .engine
        .breaches(
            &scope.tenant_id,
            query.unresolved.unwrap_or(false),
            query.limit,
        )
        .await?;
    Ok(Json(BreachListResponse { breaches }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveBreachRequest {
    pub breach_id: String,
    #[serde(default)]
    pub resolution: Option<String>,
}

pub async fn resolve_breach(
    State(state): State<AppState>,
    scope: TenantScope,
    ApiJson(request): ApiJson<ResolveBreachRequest>,
) -> ApiResult<Json<BreachEvent>> {
    if request.breach_id.trim().is_empty() {
        return Err(AppetiteError::validation("breachId is required").into());
    }
    let breach = state
        .engine
        .resolve_breach(&scope.tenant_id, &request.breach_id, request.resolution)
        .await?;
    Ok(Json(breach))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactPreviewQuery {
    pub metric_code: String,
    pub threshold: f64,
    pub operator: String,
}

pub async fn impact_preview(
    State(state): State<AppState>,
    scope: TenantScope,
    ApiQuery(query): ApiQuery<ImpactPreviewQuery>,
) -> ApiResult<Json<ImpactPreview>> {
    let operator: ComparisonOperator = query.operator.parse()?;
    if !query.threshold.is_finite() {
        return Err(AppetiteError::validation("threshold must be a finite number").into());
    }
    let preview = state
        .engine
        .impact_preview(&scope.tenant_id, &query.metric_code, query.threshold, operator)
        .await?;
    Ok(Json(preview))
}

#[derive(Debug, Serialize)]
pub struct AppetiteListResponse {
    pub appetites: Vec<RiskAppetite>,
}

pub async fn list_appetites(
    State(state): State<AppState>,
    scope: TenantScope,
) -> ApiResult<Json<AppetiteListResponse>> {
    let appetites = state.engine.appetites().list(&scope.tenant_id).await?;
    Ok(Json(AppetiteListResponse { appetites }))
}

pub async fn active_appetite(
    State(state): State<AppState>,
    scope: TenantScope,
) -> ApiResult<Json<RiskAppetite>> {
    let appetite = state
        .engine
        .appetites()
        .active(&scope.tenant_id)
        .await?
        .ok_or_else(|| AppetiteError::NotFound("no active risk appetite".to_string()))?;
    Ok(Json(appetite))
}

pub async fn create_appetite(
    State(state): State<AppState>,
    scope: TenantScope,
    ApiJson(draft): ApiJson<AppetiteDraft>,
) -> ApiResult<(StatusCode, Json<RiskAppetite>)> {
    let appetite = state
        .engine
        .appetites()
        .create_draft(&scope.tenant_id, draft)
        .await?;
    Ok((StatusCode::CREATED, Json(appetite)))
}

pub async fn activate_appetite(
    State(state): State<AppState>,
    scope: TenantScope,
    Path((_, appetite_id)): Path<(String, String)>,
) -> ApiResult<Json<RiskAppetite>> {
    let appetite = state
        .engine
        .appetites()
        .activate(&scope.tenant_id, &appetite_id, &scope.actor_id)
        .await?;
    Ok(Json(appetite))
}
