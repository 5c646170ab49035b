//! In-memory storage implementation

use super::traits::*;
use crate::appetite::RiskAppetite;
use crate::breaches::BreachEvent;
use crate::error::{AppetiteError, AppetiteResult};
use crate::ledger::MetricObservation;
use crate::scenarios::BoardScenario;
use crate::stress::StressTest;
use crate::types::{AppetiteStatus, TruthLevel};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory storage for development and testing
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    observations: Arc<RwLock<Vec<MetricObservation>>>,
    appetites: Arc<RwLock<HashMap<String, RiskAppetite>>>,
    breaches: Arc<RwLock<Vec<BreachEvent>>>,
    stress_tests: Arc<RwLock<Vec<StressTest>>>,
    scenarios: Arc<RwLock<Vec<BoardScenario>>>,
    failing_breach_rules: Arc<RwLock<BTreeSet<String>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make breach inserts for `rule_id` fail, as a dropped connection would.
    pub async fn fail_breach_writes_for(&self, rule_id: &str) {
        self.failing_breach_rules
            .write()
            .await
            .insert(rule_id.to_string());
    }
}

impl Storage for InMemoryStorage {}

#[async_trait]
impl ObservationStorage for InMemoryStorage {
    async fn insert_observation(&self, observation: MetricObservation) -> AppetiteResult<()> {
        self.observations.write().await.push(observation);
        Ok(())
    }

    async fn get_observation(
        &self,
        tenant_id: &str,
        id: &str,
    ) -> AppetiteResult<Option<MetricObservation>> {
        let observations = self.observations.read().await;
        Ok(observations
            .iter()
            .find(|o| o.tenant_id == tenant_id && o.id == id)
            .cloned())
    }

    async fn latest_observation(
        &self,
        tenant_id: &str,
        metric_code: &str,
        entity_id: Option<&str>,
        truth_level: Option<TruthLevel>,
    ) -> AppetiteResult<Option<MetricObservation>> {
        let observations = self.observations.read().await;
        Ok(observations
            .iter()
            .filter(|o| {
                o.tenant_id == tenant_id
                    && o.metric_code == metric_code
                    && o.entity_id.as_deref() == entity_id
                    && truth_level.map_or(true, |level| o.truth_level == level)
            })
            .max_by_key(|o| (o.as_of, o.created_at))
            .cloned())
    }

    async fn list_observations(
        &self,
        tenant_id: &str,
        metric_code: Option<&str>,
        limit: usize,
    ) -> AppetiteResult<Vec<MetricObservation>> {
        let observations = self.observations.read().await;
        let mut matching: Vec<_> = observations
            .iter()
            .filter(|o| {
                o.tenant_id == tenant_id && metric_code.map_or(true, |code| o.metric_code == code)
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| (b.as_of, b.created_at).cmp(&(a.as_of, a.created_at)));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn count_observations(&self, tenant_id: &str) -> AppetiteResult<usize> {
        let observations = self.observations.read().await;
        Ok(observations.iter().filter(|o| o.tenant_id == tenant_id).count())
    }
}

#[async_trait]
impl AppetiteStorage for InMemoryStorage {
    async fn insert_appetite(&self, mut appetite: RiskAppetite) -> AppetiteResult<RiskAppetite> {
        let mut appetites = self.appetites.write().await;
        let latest = appetites
            .values()
            .filter(|a| a.tenant_id == appetite.tenant_id)
            .map(|a| a.version)
            .max()
            .unwrap_or(0);
        appetite.version = latest + 1;
        appetites.insert(appetite.id.clone(), appetite.clone());
        Ok(appetite)
    }

    async fn get_appetite(
        &self,
        tenant_id: &str,
        id: &str,
    ) -> AppetiteResult<Option<RiskAppetite>> {
        let appetites = self.appetites.read().await;
        Ok(appetites.get(id).filter(|a| a.tenant_id == tenant_id).cloned())
    }

    async fn active_appetite(&self, tenant_id: &str) -> AppetiteResult<Option<RiskAppetite>> {
        let appetites = self.appetites.read().await;
        Ok(appetites
            .values()
            .find(|a| a.tenant_id == tenant_id && a.status == AppetiteStatus::Active)
            .cloned())
    }

    async fn list_appetites(&self, tenant_id: &str) -> AppetiteResult<Vec<RiskAppetite>> {
        let appetites = self.appetites.read().await;
        let mut list: Vec<_> = appetites
            .values()
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(list)
    }

    async fn activate_appetite(
        &self,
        tenant_id: &str,
        id: &str,
        approved_by: &str,
        approved_at: DateTime<Utc>,
    ) -> AppetiteResult<RiskAppetite> {
        let mut appetites = self.appetites.write().await;

        let target_status = appetites
            .get(id)
            .filter(|a| a.tenant_id == tenant_id)
            .map(|a| a.status)
            .ok_or_else(|| AppetiteError::NotFound(format!("risk appetite '{id}'")))?;
        match target_status {
            AppetiteStatus::Archived => {
                return Err(AppetiteError::validation(format!(
                    "risk appetite '{id}' is archived and cannot be activated"
                )))
            }
            AppetiteStatus::Active => {
                return appetites
                    .get(id)
                    .cloned()
                    .ok_or_else(|| AppetiteError::NotFound(format!("risk appetite '{id}'")))
            }
            AppetiteStatus::Draft => {}
        }

        for appetite in appetites.values_mut() {
            if appetite.tenant_id == tenant_id && appetite.status == AppetiteStatus::Active {
                appetite.status = AppetiteStatus::Archived;
            }
        }

        let target = appetites
            .get_mut(id)
            .ok_or_else(|| AppetiteError::NotFound(format!("risk appetite '{id}'")))?;
        target.status = AppetiteStatus::Active;
        target.approved_by = Some(approved_by.to_string());
        target.approved_at = Some(approved_at);
        Ok(target.clone())
    }

    async fn tenants_with_active_appetite(&self) -> AppetiteResult<Vec<String>> {
        let appetites = self.appetites.read().await;
        let tenants: BTreeSet<_> = appetites
            .values()
            .filter(|a| a.status == AppetiteStatus::Active)
            .map(|a| a.tenant_id.clone())
            .collect();
        Ok(tenants.into_iter().collect())
    }
}

#[async_trait]
impl BreachStorage for InMemoryStorage {
    async fn insert_breach_if_absent(&self, breach: BreachEvent) -> AppetiteResult<()> {
        if self.failing_breach_rules.read().await.contains(&breach.rule_id) {
            return Err(AppetiteError::Storage(format!(
                "breach write for rule '{}' failed",
                breach.rule_id
            )));
        }
        let mut breaches = self.breaches.write().await;
        let open = breaches.iter().any(|b| {
            b.tenant_id == breach.tenant_id && b.rule_id == breach.rule_id && !b.is_resolved
        });
        if open {
            return Err(AppetiteError::DuplicateBreach {
                rule_id: breach.rule_id,
            });
        }
        breaches.push(breach);
        Ok(())
    }

    async fn has_open_breach(&self, tenant_id: &str, rule_id: &str) -> AppetiteResult<bool> {
        let breaches = self.breaches.read().await;
        Ok(breaches
            .iter()
            .any(|b| b.tenant_id == tenant_id && b.rule_id == rule_id && !b.is_resolved))
    }

    async fn resolve_breach(
        &self,
        tenant_id: &str,
        id: &str,
        notes: Option<String>,
        resolved_at: DateTime<Utc>,
    ) -> AppetiteResult<BreachEvent> {
        let mut breaches = self.breaches.write().await;
        let breach = breaches
            .iter_mut()
            .find(|b| b.tenant_id == tenant_id && b.id == id)
            .ok_or_else(|| AppetiteError::NotFound(format!("breach '{id}'")))?;
        if breach.is_resolved {
            return Err(AppetiteError::validation(format!(
                "breach '{id}' is already resolved"
            )));
        }
        breach.is_resolved = true;
        breach.resolved_at = Some(resolved_at);
        breach.resolution_notes = notes;
        Ok(breach.clone())
    }

    async fn list_breaches(
        &self,
        tenant_id: &str,
        unresolved_only: bool,
        limit: usize,
    ) -> AppetiteResult<Vec<BreachEvent>> {
        let breaches = self.breaches.read().await;
        let mut list: Vec<_> = breaches
            .iter()
            .filter(|b| b.tenant_id == tenant_id && (!unresolved_only || !b.is_resolved))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.breached_at.cmp(&a.breached_at));
        list.truncate(limit);
        Ok(list)
    }

    async fn count_breaches(&self, tenant_id: &str) -> AppetiteResult<usize> {
        let breaches = self.breaches.read().await;
        Ok(breaches.iter().filter(|b| b.tenant_id == tenant_id).count())
    }
}

#[async_trait]
impl StressTestStorage for InMemoryStorage {
    async fn insert_stress_test(&self, test: StressTest) -> AppetiteResult<()> {
        self.stress_tests.write().await.push(test);
        Ok(())
    }

    async fn get_stress_test(
        &self,
        tenant_id: &str,
        id: &str,
    ) -> AppetiteResult<Option<StressTest>> {
        let tests = self.stress_tests.read().await;
        Ok(tests
            .iter()
            .find(|t| t.tenant_id == tenant_id && t.id == id)
            .cloned())
    }

    async fn list_stress_tests(&self, tenant_id: &str) -> AppetiteResult<Vec<StressTest>> {
        let tests = self.stress_tests.read().await;
        let mut list: Vec<_> = tests
            .iter()
            .filter(|t| t.tenant_id == tenant_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }
}

#[async_trait]
impl ScenarioStorage for InMemoryStorage {
    async fn insert_scenario(&self, scenario: BoardScenario) -> AppetiteResult<()> {
        self.scenarios.write().await.push(scenario);
        Ok(())
    }

    async fn get_scenario(
        &self,
        tenant_id: &str,
        id: &str,
    ) -> AppetiteResult<Option<BoardScenario>> {
        let scenarios = self.scenarios.read().await;
        Ok(scenarios
            .iter()
            .find(|s| s.tenant_id == tenant_id && s.id == id)
            .cloned())
    }

    async fn list_scenarios(
        &self,
        tenant_id: &str,
        include_archived: bool,
    ) -> AppetiteResult<Vec<BoardScenario>> {
        let scenarios = self.scenarios.read().await;
        let mut list: Vec<_> = scenarios
            .iter()
            .filter(|s| s.tenant_id == tenant_id && (include_archived || !s.is_archived))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn archive_scenario(&self, tenant_id: &str, id: &str) -> AppetiteResult<BoardScenario> {
        let mut scenarios = self.scenarios.write().await;
        let scenario = scenarios
            .iter_mut()
            .find(|s| s.tenant_id == tenant_id && s.id == id)
            .ok_or_else(|| AppetiteError::NotFound(format!("board scenario '{id}'")))?;
        scenario.is_archived = true;
        Ok(scenario.clone())
    }
}
