//! API Router configuration

use super::handlers::{self, board_scenarios, risk_appetite, snapshots, stress_test};
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    let tenant_routes = Router::new()
        // Evaluation and detection
        .route("/risk-appetite/evaluate", get(risk_appetite::evaluate))
        .route("/risk-appetite/detect", post(risk_appetite::detect))
        .route("/risk-appetite/breaches", get(risk_appetite::list_breaches))
        .route("/risk-appetite/resolve", post(risk_appetite::resolve_breach))
        .route(
            "/risk-appetite/impact-preview",
            get(risk_appetite::impact_preview),
        )
        // Governance
        .route(
            "/risk-appetite/appetites",
            get(risk_appetite::list_appetites).post(risk_appetite::create_appetite),
        )
        .route("/risk-appetite/active", get(risk_appetite::active_appetite))
        .route(
            "/risk-appetite/appetites/:id/activate",
            post(risk_appetite::activate_appetite),
        )
        // Stress tests
        .route("/risk-stress-test/simulate", post(stress_test::simulate))
        .route("/risk-stress-test/preview", post(stress_test::preview))
        .route("/risk-stress-test/tests", get(stress_test::list_tests))
        .route("/risk-stress-test/tests/:id", get(stress_test::get_test))
        // Board scenarios
        .route("/board-scenarios", get(board_scenarios::list_scenarios))
        .route("/board-scenarios/simulate", post(board_scenarios::simulate))
        .route("/board-scenarios/:id", get(board_scenarios::get_scenario))
        .route(
            "/board-scenarios/:id/archive",
            post(board_scenarios::archive_scenario),
        )
        // Decision snapshots
        .route(
            "/snapshots",
            get(snapshots::list_snapshots).post(snapshots::create_snapshot),
        )
        .route("/snapshots/current", get(snapshots::current_snapshot))
        .route("/snapshots/:id/chain", get(snapshots::snapshot_chain));

    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/status", get(handlers::service_status))
        .nest("/tenants/:tenant_id", tenant_routes);

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
