//! Application state for API handlers

use appetite_core::{
    Collaborators, EngineConfig, MetricRegistry, RiskAppetiteEngine, ScenarioProjector, Storage,
    StressTestSimulator,
};
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: RiskAppetiteEngine,

    pub simulator: StressTestSimulator,

    pub projector: ScenarioProjector,

    /// Storage backend label reported by the status endpoint
    pub storage_backend: &'static str,

    pub version: String,

    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Wire every component over one storage backend and one set of collaborators.
    pub fn new(
        storage: Arc<dyn Storage>,
        collaborators: Collaborators,
        engine_config: EngineConfig,
        storage_backend: &'static str,
    ) -> Self {
        let data = collaborators.data.clone();
        let engine = RiskAppetiteEngine::new(
            storage.clone(),
            collaborators,
            Arc::new(MetricRegistry::with_builtin()),
            engine_config,
        );

        Self {
            simulator: StressTestSimulator::new(engine.clone(), data.clone(), storage.clone()),
            projector: ScenarioProjector::new(engine.clone(), data, storage),
            engine,
            storage_backend,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: chrono::Utc::now(),
        }
    }

    /// Get uptime as a human-readable string
    pub fn uptime(&self) -> String {
        let secs = (chrono::Utc::now() - self.started_at).num_seconds();

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else if secs < 86400 {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        } else {
            format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
        }
    }
}
