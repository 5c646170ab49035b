//! Board scenario handlers

use crate::api::auth::TenantScope;
use crate::api::extract::{ApiJson, ApiQuery};
use crate::api::state::AppState;
use crate::error::ApiResult;
use appetite_core::{BoardScenario, ScenarioRequest, ScenarioResult};
use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

pub async fn simulate(
    State(state): State<AppState>,
    scope: TenantScope,
    ApiJson(request): ApiJson<ScenarioRequest>,
) -> ApiResult<Json<ScenarioResult>> {
    let result = state
        .projector
        .simulate(&scope.tenant_id, request, &scope.actor_id)
        .await?;
    Ok(Json(result))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioQuery {
    #[serde(default)]
    pub include_archived: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ScenarioListResponse {
    pub scenarios: Vec<BoardScenario>,
}

pub async fn list_scenarios(
    State(state): State<AppState>,
    scope: TenantScope,
    ApiQuery(query): ApiQuery<ScenarioQuery>,
) -> ApiResult<Json<ScenarioListResponse>> {
    let scenarios = state
        .projector
        .list(&scope.tenant_id, query.include_archived.unwrap_or(false))
        .await?;
    Ok(Json(ScenarioListResponse { scenarios }))
}

pub async fn get_scenario(
    State(state): State<AppState>,
    scope: TenantScope,
    Path((_, scenario_id)): Path<(String, String)>,
) -> ApiResult<Json<BoardScenario>> {
    Ok(Json(state.projector.get(&scope.tenant_id, &scenario_id).await?))
}

pub async fn archive_scenario(
    State(state): State<AppState>,
    scope: TenantScope,
    Path((_, scenario_id)): Path<(String, String)>,
) -> ApiResult<Json<BoardScenario>> {
    Ok(Json(
        state
            .projector
            .archive(&scope.tenant_id, &scenario_id)
            .await?,
    ))
}
