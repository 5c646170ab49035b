//! Storage trait definitions

use crate::appetite::RiskAppetite;
use crate::breaches::BreachEvent;
use crate::error::AppetiteResult;
use crate::ledger::MetricObservation;
use crate::scenarios::BoardScenario;
use crate::stress::StressTest;
use crate::types::TruthLevel;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Combined storage trait
#[async_trait]
pub trait Storage:
    ObservationStorage
    + AppetiteStorage
    + BreachStorage
    + StressTestStorage
    + ScenarioStorage
    + Send
    + Sync
{
}

/// Append-only fact ledger rows
#[async_trait]
pub trait ObservationStorage: Send + Sync {
    async fn insert_observation(&self, observation: MetricObservation) -> AppetiteResult<()>;

    async fn get_observation(
        &self,
        tenant_id: &str,
        id: &str,
    ) -> AppetiteResult<Option<MetricObservation>>;

    /// Latest by `as_of`, ties broken by `created_at`. `entity_id = None` matches
    /// tenant-wide observations only.
    async fn latest_observation(
        &self,
        tenant_id: &str,
        metric_code: &str,
        entity_id: Option<&str>,
        truth_level: Option<TruthLevel>,
    ) -> AppetiteResult<Option<MetricObservation>>;

    /// Newest first.
    async fn list_observations(
        &self,
        tenant_id: &str,
        metric_code: Option<&str>,
        limit: usize,
    ) -> AppetiteResult<Vec<MetricObservation>>;

    async fn count_observations(&self, tenant_id: &str) -> AppetiteResult<usize>;
}

/// Risk appetites with their rules
#[async_trait]
pub trait AppetiteStorage: Send + Sync {
    /// Store a draft, assigning the next per-tenant version. Returns the stored record.
    async fn insert_appetite(&self, appetite: RiskAppetite) -> AppetiteResult<RiskAppetite>;

    async fn get_appetite(&self, tenant_id: &str, id: &str)
        -> AppetiteResult<Option<RiskAppetite>>;

    async fn active_appetite(&self, tenant_id: &str) -> AppetiteResult<Option<RiskAppetite>>;

    /// Newest version first.
    async fn list_appetites(&self, tenant_id: &str) -> AppetiteResult<Vec<RiskAppetite>>;

    /// Archive the current active appetite and activate `id` atomically.
    async fn activate_appetite(
        &self,
        tenant_id: &str,
        id: &str,
        approved_by: &str,
        approved_at: DateTime<Utc>,
    ) -> AppetiteResult<RiskAppetite>;

    async fn tenants_with_active_appetite(&self) -> AppetiteResult<Vec<String>>;
}

/// Breach events
#[async_trait]
pub trait BreachStorage: Send + Sync {
    /// Conditional insert. Fails with `DuplicateBreach` when the rule has an open event.
    async fn insert_breach_if_absent(&self, breach: BreachEvent) -> AppetiteResult<()>;

    async fn has_open_breach(&self, tenant_id: &str, rule_id: &str) -> AppetiteResult<bool>;

    async fn resolve_breach(
        &self,
        tenant_id: &str,
        id: &str,
        notes: Option<String>,
        resolved_at: DateTime<Utc>,
    ) -> AppetiteResult<BreachEvent>;

    /// Newest first.
    async fn list_breaches(
        &self,
        tenant_id: &str,
        unresolved_only: bool,
        limit: usize,
    ) -> AppetiteResult<Vec<BreachEvent>>;

    async fn count_breaches(&self, tenant_id: &str) -> AppetiteResult<usize>;
}

/// Saved stress tests
#[async_trait]
pub trait StressTestStorage: Send + Sync {
    async fn insert_stress_test(&self, test: StressTest) -> AppetiteResult<()>;

    async fn get_stress_test(&self, tenant_id: &str, id: &str)
        -> AppetiteResult<Option<StressTest>>;

    async fn list_stress_tests(&self, tenant_id: &str) -> AppetiteResult<Vec<StressTest>>;
}

/// Saved board scenarios
#[async_trait]
pub trait ScenarioStorage: Send + Sync {
    async fn insert_scenario(&self, scenario: BoardScenario) -> AppetiteResult<()>;

    async fn get_scenario(&self, tenant_id: &str, id: &str)
        -> AppetiteResult<Option<BoardScenario>>;

    async fn list_scenarios(
        &self,
        tenant_id: &str,
        include_archived: bool,
    ) -> AppetiteResult<Vec<BoardScenario>>;

    async fn archive_scenario(&self, tenant_id: &str, id: &str) -> AppetiteResult<BoardScenario>;
}
