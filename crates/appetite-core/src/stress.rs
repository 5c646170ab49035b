//! Counterfactual stress tests against the active appetite.
//!
//! A stress test re-evaluates the live metric values under proposed thresholds.
//! Simulated thresholds are read as the acceptable bound of a metric: a rule is
//! breached under the test when its value does not satisfy `operator threshold`.
//! Nothing here writes observations or breach events.

use crate::collaborators::{OperationalData, ReconciliationDecision};
use crate::engine::RiskAppetiteEngine;
use crate::error::{AppetiteError, AppetiteResult};
use crate::evaluator::evaluate;
use crate::resolver::{AUTO_MATCH_RATE, FALSE_AUTO_RATE};
use crate::storage::Storage;
use crate::types::{BreachAction, ComparisonOperator, Severity};
use chrono::{DateTime, Duration as ChronoDuration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Extra manual approvals per tightened rule.
pub const APPROVAL_GROWTH_PER_TIGHTENED_RULE: f64 = 0.15;
pub const MANUAL_APPROVALS_METRIC: &str = "manual_approvals";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SimulatedChange {
    pub metric_code: String,
    pub simulated_threshold: f64,
    pub operator: ComparisonOperator,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StressTestRequest {
    #[serde(default)]
    pub simulated_changes: Vec<SimulatedChange>,
    #[serde(default)]
    pub test_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImpactClass {
    NoChange,
    NewBreach,
    Resolved,
    StillBreached,
}

impl ImpactClass {
    fn classify(originally_breached: bool, simulated_breached: bool) -> Self {
        match (originally_breached, simulated_breached) {
            (false, true) => Self::NewBreach,
            (true, false) => Self::Resolved,
            (true, true) => Self::StillBreached,
            (false, false) => Self::NoChange,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DetailedImpact {
    pub rule_id: String,
    pub metric_code: String,
    pub metric_label: String,
    pub current_value: Option<f64>,
    pub original_threshold: f64,
    pub original_operator: ComparisonOperator,
    pub simulated_threshold: f64,
    pub simulated_operator: ComparisonOperator,
    pub originally_breached: bool,
    pub simulated_breached: bool,
    pub impact: ImpactClass,
    pub severity: Severity,
    pub action_on_breach: BreachAction,
}

/// A number derived from a rule of thumb rather than a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HeuristicEstimate {
    pub baseline: f64,
    pub projected: f64,
    pub estimate: bool,
    pub basis: String,
    pub note: String,
}

impl HeuristicEstimate {
    fn new(baseline: f64, projected: f64, note: impl Into<String>) -> Self {
        Self {
            baseline,
            projected,
            estimate: true,
            basis: "heuristic".to_string(),
            note: note.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImpactSummary {
    pub rules_evaluated: usize,
    pub new_breaches: usize,
    pub resolved_breaches: usize,
    pub still_breached: usize,
    pub unchanged: usize,
    pub tightened_rules: usize,
    pub loosened_rules: usize,
    pub unmatched_changes: Vec<String>,
    pub automation_rate: HeuristicEstimate,
    pub approval_volume: HeuristicEstimate,
}

/// Persisted stress test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StressTest {
    pub id: String,
    pub tenant_id: String,
    pub test_name: String,
    pub description: Option<String>,
    pub base_risk_appetite_id: String,
    pub simulated_risk_appetite: Vec<SimulatedChange>,
    pub impact_summary: ImpactSummary,
    pub detailed_impacts: Vec<DetailedImpact>,
    pub baseline_metrics: BTreeMap<String, f64>,
    pub simulated_metrics: BTreeMap<String, f64>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Simulation output, saved or not.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StressTestResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
    pub base_risk_appetite_id: String,
    pub impact_summary: ImpactSummary,
    pub detailed_impacts: Vec<DetailedImpact>,
    pub baseline_metrics: BTreeMap<String, f64>,
    pub simulated_metrics: BTreeMap<String, f64>,
    pub simulated_at: DateTime<Utc>,
}

/// Whether moving a bound from `original` to `simulated` makes it stricter.
fn tightens(operator: ComparisonOperator, original: f64, simulated: f64) -> bool {
    match operator {
        ComparisonOperator::Lt | ComparisonOperator::Le => simulated < original,
        ComparisonOperator::Gt | ComparisonOperator::Ge => simulated > original,
        ComparisonOperator::Eq => false,
    }
}

fn loosens(operator: ComparisonOperator, original: f64, simulated: f64) -> bool {
    operator != ComparisonOperator::Eq
        && simulated != original
        && !tightens(operator, original, simulated)
}

fn validate_changes(changes: &[SimulatedChange]) -> AppetiteResult<()> {
    if changes.is_empty() {
        return Err(AppetiteError::validation(
            "simulatedChanges must contain at least one change",
        ));
    }
    for change in changes {
        if change.metric_code.trim().is_empty() {
            return Err(AppetiteError::validation("simulated change metricCode is required"));
        }
        if !change.simulated_threshold.is_finite() {
            return Err(AppetiteError::validation(format!(
                "simulatedThreshold for '{}' must be a finite number",
                change.metric_code
            )));
        }
    }
    Ok(())
}

#[derive(Clone)]
pub struct StressTestSimulator {
    engine: RiskAppetiteEngine,
    data: Arc<dyn OperationalData>,
    storage: Arc<dyn Storage>,
}

impl StressTestSimulator {
    pub fn new(
        engine: RiskAppetiteEngine,
        data: Arc<dyn OperationalData>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            engine,
            data,
            storage,
        }
    }

    /// Compute the impact of `changes` without saving anything.
    pub async fn simulate(
        &self,
        tenant_id: &str,
        changes: &[SimulatedChange],
    ) -> AppetiteResult<StressTestResult> {
        validate_changes(changes)?;

        let appetite = self
            .engine
            .appetites()
            .active(tenant_id)
            .await?
            .ok_or_else(|| AppetiteError::NoActiveAppetite(tenant_id.to_string()))?;

        let pass = self.engine.run_rules(tenant_id, &appetite).await;
        let by_metric: BTreeMap<&str, &SimulatedChange> = changes
            .iter()
            .map(|change| (change.metric_code.as_str(), change))
            .collect();

        let mut detailed_impacts = Vec::new();
        let mut tightened = 0;
        let mut loosened = 0;
        let mut false_auto_tightening: Option<(f64, f64)> = None;

        for rule in appetite.enabled_rules() {
            let change = by_metric.get(rule.metric_code.as_str());
            let (simulated_threshold, simulated_operator) = change
                .map(|c| (c.simulated_threshold, c.operator))
                .unwrap_or((rule.threshold, rule.operator));

            if change.is_some() {
                if tightens(simulated_operator, rule.threshold, simulated_threshold) {
                    tightened += 1;
                    if rule.metric_code == FALSE_AUTO_RATE {
                        false_auto_tightening = Some((rule.threshold, simulated_threshold));
                    }
                } else if loosens(simulated_operator, rule.threshold, simulated_threshold) {
                    loosened += 1;
                }
            }

            let current_value = pass.resolved.get(&rule.metric_code).map(|m| m.value);
            let (originally_breached, simulated_breached) = match current_value {
                Some(value) => (
                    !evaluate(value, rule.operator, rule.threshold),
                    !evaluate(value, simulated_operator, simulated_threshold),
                ),
                None => (false, false),
            };

            detailed_impacts.push(DetailedImpact {
                rule_id: rule.id.clone(),
                metric_code: rule.metric_code.clone(),
                metric_label: rule.metric_label.clone(),
                current_value,
                original_threshold: rule.threshold,
                original_operator: rule.operator,
                simulated_threshold,
                simulated_operator,
                originally_breached,
                simulated_breached,
                impact: ImpactClass::classify(originally_breached, simulated_breached),
                severity: rule.severity,
                action_on_breach: rule.action_on_breach,
            });
        }

        let unmatched_changes: Vec<String> = changes
            .iter()
            .filter(|c| !appetite.enabled_rules().any(|r| r.metric_code == c.metric_code))
            .map(|c| c.metric_code.clone())
            .collect();

        let baseline_automation = match pass.resolved.get(AUTO_MATCH_RATE) {
            Some(metric) => metric.value,
            None => self
                .engine
                .resolver()
                .try_resolve(tenant_id, AUTO_MATCH_RATE)
                .await
                .map(|m| m.value)
                .unwrap_or(0.0),
        };
        let automation_rate = match false_auto_tightening {
            Some((original, simulated)) if original != 0.0 => HeuristicEstimate::new(
                baseline_automation,
                baseline_automation * (simulated / original),
                "auto match rate scaled by the tightened false auto bound",
            ),
            _ => HeuristicEstimate::new(
                baseline_automation,
                baseline_automation,
                "false auto bound not tightened",
            ),
        };

        let baseline_approvals = self.manual_approvals(tenant_id).await?;
        let approval_volume = HeuristicEstimate::new(
            baseline_approvals,
            baseline_approvals * (1.0 + APPROVAL_GROWTH_PER_TIGHTENED_RULE * tightened as f64),
            format!(
                "manual matches over the trailing window, +{}% per tightened rule",
                APPROVAL_GROWTH_PER_TIGHTENED_RULE * 100.0
            ),
        );

        let count = |class: ImpactClass| detailed_impacts.iter().filter(|d| d.impact == class).count();
        let impact_summary = ImpactSummary {
            rules_evaluated: detailed_impacts.len(),
            new_breaches: count(ImpactClass::NewBreach),
            resolved_breaches: count(ImpactClass::Resolved),
            still_breached: count(ImpactClass::StillBreached),
            unchanged: count(ImpactClass::NoChange),
            tightened_rules: tightened,
            loosened_rules: loosened,
            unmatched_changes,
            automation_rate: automation_rate.clone(),
            approval_volume: approval_volume.clone(),
        };

        let mut baseline_metrics: BTreeMap<String, f64> = pass
            .resolved
            .iter()
            .map(|(code, metric)| (code.clone(), metric.value))
            .collect();
        baseline_metrics.insert(AUTO_MATCH_RATE.to_string(), automation_rate.baseline);
        baseline_metrics.insert(MANUAL_APPROVALS_METRIC.to_string(), approval_volume.baseline);

        let simulated_metrics = BTreeMap::from([
            (AUTO_MATCH_RATE.to_string(), automation_rate.projected),
            (MANUAL_APPROVALS_METRIC.to_string(), approval_volume.projected),
        ]);

        Ok(StressTestResult {
            test_id: None,
            base_risk_appetite_id: appetite.id,
            impact_summary,
            detailed_impacts,
            baseline_metrics,
            simulated_metrics,
            simulated_at: Utc::now(),
        })
    }

    /// Simulate and persist the result as a stress test record.
    pub async fn run(
        &self,
        tenant_id: &str,
        request: StressTestRequest,
        created_by: &str,
    ) -> AppetiteResult<StressTestResult> {
        let mut result = self.simulate(tenant_id, &request.simulated_changes).await?;
        let created_at = Utc::now().trunc_subsecs(6);

        let test = StressTest {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            test_name: request
                .test_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| format!("Stress test {}", created_at.format("%Y-%m-%d %H:%M"))),
            description: request.description,
            base_risk_appetite_id: result.base_risk_appetite_id.clone(),
            simulated_risk_appetite: request.simulated_changes,
            impact_summary: result.impact_summary.clone(),
            detailed_impacts: result.detailed_impacts.clone(),
            baseline_metrics: result.baseline_metrics.clone(),
            simulated_metrics: result.simulated_metrics.clone(),
            created_by: created_by.to_string(),
            created_at,
        };
        self.storage.insert_stress_test(test.clone()).await?;

        info!(
            tenant_id,
            test_id = %test.id,
            new_breaches = test.impact_summary.new_breaches,
            resolved = test.impact_summary.resolved_breaches,
            "Saved risk stress test"
        );
        result.test_id = Some(test.id);
        Ok(result)
    }

    pub async fn list(&self, tenant_id: &str) -> AppetiteResult<Vec<StressTest>> {
        self.storage.list_stress_tests(tenant_id).await
    }

    pub async fn get(&self, tenant_id: &str, id: &str) -> AppetiteResult<StressTest> {
        self.storage
            .get_stress_test(tenant_id, id)
            .await?
            .ok_or_else(|| AppetiteError::NotFound(format!("stress test '{id}'")))
    }

    async fn manual_approvals(&self, tenant_id: &str) -> AppetiteResult<f64> {
        let since = Utc::now() - ChronoDuration::days(crate::resolver::LOOKBACK_DAYS);
        let outcomes = self.data.reconciliation_outcomes(tenant_id, since).await?;
        Ok(outcomes
            .iter()
            .filter(|o| o.outcome == ReconciliationDecision::ManualMatch)
            .count() as f64)
    }
}
