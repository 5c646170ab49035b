//! Risk appetite engine: evaluation, detection and enforcement.
//!
//! One detection pass per tenant resolves every enabled rule of the active
//! appetite, compares it against its threshold, and for each new breach runs
//! the enforcement action before recording the breach event. Passes for the
//! same tenant are serialized; different tenants run independently.

use crate::appetite::{AppetiteRegistry, RiskAppetite, RiskAppetiteRule};
use crate::breaches::{BreachEvent, BreachRecorder};
use crate::collaborators::Collaborators;
use crate::enforcement::{EnforcementDispatcher, EnforcementOutcome};
use crate::error::AppetiteResult;
use crate::evaluator::evaluate;
use crate::ledger::{DerivedFrom, FactLedger, ObservationDraft};
use crate::resolver::{MetricRegistry, MetricResolver, MetricSource, ResolvedMetric, LOOKBACK_DAYS};
use crate::storage::Storage;
use crate::types::{BreachAction, ComparisonOperator, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub resolve_timeout: Duration,
    pub action_timeout: Duration,
    /// Append provisional observations for metrics recomputed during detection.
    pub record_observations: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resolve_timeout: Duration::from_millis(2000),
            action_timeout: Duration::from_millis(2000),
            record_observations: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleEvaluation {
    pub rule_id: String,
    pub metric_code: String,
    pub metric_label: String,
    pub domain: String,
    pub operator: ComparisonOperator,
    pub threshold: f64,
    pub unit: String,
    pub severity: Severity,
    pub action_on_breach: BreachAction,
    pub current_value: f64,
    pub source: MetricSource,
    pub is_breached: bool,
}

/// A rule that produced neither a pass nor a breach.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRule {
    pub rule_id: String,
    pub metric_code: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationReport {
    pub has_active_appetite: bool,
    pub appetite_id: Option<String>,
    pub version: Option<u32>,
    pub evaluations: Vec<RuleEvaluation>,
    pub skipped: Vec<SkippedRule>,
    pub breach_count: usize,
    pub evaluated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewBreach {
    pub breach_id: String,
    pub rule_id: String,
    pub metric_code: String,
    pub value: f64,
    pub threshold: f64,
    pub operator: ComparisonOperator,
    pub severity: Severity,
    pub action: BreachAction,
    pub action_result: EnforcementOutcome,
}

/// A breached rule whose enforcement or breach write failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FailedRule {
    pub rule_id: String,
    pub metric_code: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DetectionReport {
    pub detected: usize,
    pub appetite_id: Option<String>,
    pub new_breaches: Vec<NewBreach>,
    /// Breached rules that already had an open event.
    pub already_open: Vec<String>,
    pub skipped: Vec<SkippedRule>,
    pub failed: Vec<FailedRule>,
    pub observations_recorded: usize,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImpactPreview {
    pub metric_code: String,
    pub current_value: Option<f64>,
    pub proposed_threshold: f64,
    pub operator: ComparisonOperator,
    pub would_breach: bool,
    pub source: MetricSource,
}

/// Per-tenant async locks, created on first use.
#[derive(Debug, Default)]
pub struct TenantLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TenantLocks {
    pub async fn acquire(&self, tenant_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(tenant_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Outcome of resolving every enabled rule once.
pub(crate) struct RulePass {
    pub evaluations: Vec<(RiskAppetiteRule, RuleEvaluation)>,
    pub skipped: Vec<SkippedRule>,
    pub resolved: BTreeMap<String, ResolvedMetric>,
}

#[derive(Clone)]
pub struct RiskAppetiteEngine {
    appetites: AppetiteRegistry,
    resolver: MetricResolver,
    dispatcher: EnforcementDispatcher,
    recorder: BreachRecorder,
    ledger: FactLedger,
    config: EngineConfig,
    locks: Arc<TenantLocks>,
}

impl RiskAppetiteEngine {
    pub fn new(
        storage: Arc<dyn Storage>,
        collaborators: Collaborators,
        metrics: Arc<MetricRegistry>,
        config: EngineConfig,
    ) -> Self {
        let ledger = FactLedger::new(storage.clone());
        Self {
            appetites: AppetiteRegistry::new(storage.clone()),
            resolver: MetricResolver::new(
                metrics,
                collaborators.data.clone(),
                ledger.clone(),
                config.resolve_timeout,
            ),
            dispatcher: EnforcementDispatcher::new(collaborators, config.action_timeout),
            recorder: BreachRecorder::new(storage),
            ledger,
            config,
            locks: Arc::new(TenantLocks::default()),
        }
    }

    pub fn appetites(&self) -> &AppetiteRegistry {
        &self.appetites
    }

    pub fn resolver(&self) -> &MetricResolver {
        &self.resolver
    }

    pub fn ledger(&self) -> &FactLedger {
        &self.ledger
    }

    pub fn recorder(&self) -> &BreachRecorder {
        &self.recorder
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Resolve each enabled rule of `appetite`, each metric at most once.
    pub(crate) async fn run_rules(&self, tenant_id: &str, appetite: &RiskAppetite) -> RulePass {
        let mut pass = RulePass {
            evaluations: Vec::new(),
            skipped: Vec::new(),
            resolved: BTreeMap::new(),
        };
        let mut failures: HashMap<String, String> = HashMap::new();

        for rule in appetite.enabled_rules() {
            if !pass.resolved.contains_key(&rule.metric_code)
                && !failures.contains_key(&rule.metric_code)
            {
                match self.resolver.resolve(tenant_id, &rule.metric_code).await {
                    Ok(Some(resolved)) => {
                        pass.resolved.insert(rule.metric_code.clone(), resolved);
                    }
                    Ok(None) => {
                        failures.insert(rule.metric_code.clone(), "metric unavailable".to_string());
                    }
                    Err(err) => {
                        failures.insert(rule.metric_code.clone(), err.to_string());
                    }
                }
            }

            let Some(resolved) = pass.resolved.get(&rule.metric_code) else {
                let reason = failures
                    .get(&rule.metric_code)
                    .cloned()
                    .unwrap_or_else(|| "metric unavailable".to_string());
                warn!(tenant_id, rule_id = %rule.id, metric_code = %rule.metric_code, reason = %reason, "Skipping rule");
                pass.skipped.push(SkippedRule {
                    rule_id: rule.id.clone(),
                    metric_code: rule.metric_code.clone(),
                    reason,
                });
                continue;
            };

            let evaluation = RuleEvaluation {
                rule_id: rule.id.clone(),
                metric_code: rule.metric_code.clone(),
                metric_label: rule.metric_label.clone(),
                domain: rule.risk_domain.clone(),
                operator: rule.operator,
                threshold: rule.threshold,
                unit: rule.unit.clone(),
                severity: rule.severity,
                action_on_breach: rule.action_on_breach,
                current_value: resolved.value,
                source: resolved.source,
                is_breached: evaluate(resolved.value, rule.operator, rule.threshold),
            };
            pass.evaluations.push((rule.clone(), evaluation));
        }

        pass
    }

    /// Read-only evaluation of the active appetite.
    #[instrument(skip(self))]
    pub async fn evaluate_all(&self, tenant_id: &str) -> AppetiteResult<EvaluationReport> {
        let evaluated_at = Utc::now();
        let Some(appetite) = self.appetites.active(tenant_id).await? else {
            return Ok(EvaluationReport {
                has_active_appetite: false,
                appetite_id: None,
                version: None,
                evaluations: Vec::new(),
                skipped: Vec::new(),
                breach_count: 0,
                evaluated_at,
            });
        };

        let pass = self.run_rules(tenant_id, &appetite).await;
        let evaluations: Vec<RuleEvaluation> =
            pass.evaluations.into_iter().map(|(_, e)| e).collect();
        let breach_count = evaluations.iter().filter(|e| e.is_breached).count();

        Ok(EvaluationReport {
            has_active_appetite: true,
            appetite_id: Some(appetite.id),
            version: Some(appetite.version),
            evaluations,
            skipped: pass.skipped,
            breach_count,
            evaluated_at,
        })
    }

    /// Evaluate, enforce and record new breaches for one tenant.
    #[instrument(skip(self))]
    pub async fn detect_and_enforce(&self, tenant_id: &str) -> AppetiteResult<DetectionReport> {
        let _guard = self.locks.acquire(tenant_id).await;
        let detected_at = Utc::now();

        let Some(appetite) = self.appetites.active(tenant_id).await? else {
            debug!(tenant_id, "No active risk appetite; nothing to detect");
            return Ok(DetectionReport {
                detected: 0,
                appetite_id: None,
                new_breaches: Vec::new(),
                already_open: Vec::new(),
                skipped: Vec::new(),
                failed: Vec::new(),
                observations_recorded: 0,
                detected_at,
            });
        };

        let pass = self.run_rules(tenant_id, &appetite).await;

        let observations_recorded = if self.config.record_observations {
            self.record_observations(tenant_id, pass.resolved.values()).await
        } else {
            0
        };

        let mut new_breaches = Vec::new();
        let mut already_open = Vec::new();
        let mut failed = Vec::new();

        for (rule, evaluation) in pass.evaluations.iter().filter(|(_, e)| e.is_breached) {
            match self
                .enforce_rule(tenant_id, &appetite.id, rule, evaluation.current_value)
                .await
            {
                Ok(Some(breach)) => new_breaches.push(breach),
                Ok(None) => already_open.push(rule.id.clone()),
                Err(err) => {
                    error!(
                        tenant_id,
                        rule_id = %rule.id,
                        metric_code = %rule.metric_code,
                        error = %err,
                        "Breach enforcement failed; continuing with remaining rules"
                    );
                    failed.push(FailedRule {
                        rule_id: rule.id.clone(),
                        metric_code: rule.metric_code.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        info!(
            tenant_id,
            appetite_id = %appetite.id,
            evaluated = pass.evaluations.len(),
            skipped = pass.skipped.len(),
            failed = failed.len(),
            new_breaches = new_breaches.len(),
            "Completed risk appetite detection pass"
        );

        Ok(DetectionReport {
            detected: new_breaches.len(),
            appetite_id: Some(appetite.id),
            new_breaches,
            already_open,
            skipped: pass.skipped,
            failed,
            observations_recorded,
            detected_at,
        })
    }

    /// Enforce and record one breached rule. `None` when an open breach already exists.
    async fn enforce_rule(
        &self,
        tenant_id: &str,
        appetite_id: &str,
        rule: &RiskAppetiteRule,
        value: f64,
    ) -> AppetiteResult<Option<NewBreach>> {
        if self.recorder.has_open(tenant_id, &rule.id).await? {
            debug!(tenant_id, rule_id = %rule.id, "Breach already open");
            return Ok(None);
        }

        let outcome = self
            .dispatcher
            .execute(tenant_id, rule.action_on_breach, rule, value)
            .await;
        let action_result = serde_json::to_value(&outcome)?;

        let recorded = self
            .recorder
            .record_if_new(tenant_id, appetite_id, rule, value, action_result)
            .await?;
        Ok(recorded.map(|event| new_breach(event, outcome)))
    }

    async fn record_observations<'a>(
        &self,
        tenant_id: &str,
        resolved: impl Iterator<Item = &'a ResolvedMetric>,
    ) -> usize {
        let mut recorded = 0;
        for metric in resolved.filter(|m| m.source == MetricSource::Computed) {
            let tables: Vec<&str> = metric.source_tables.iter().map(String::as_str).collect();
            let mut derived = DerivedFrom::formula(metric.formula.clone(), &tables);
            derived
                .assumptions
                .push(format!("trailing window {LOOKBACK_DAYS} days"));
            let draft =
                ObservationDraft::provisional(metric.metric_code.clone(), metric.value)
                    .with_derived_from(derived);

            match self.ledger.append(tenant_id, draft).await {
                Ok(_) => recorded += 1,
                Err(err) => {
                    warn!(tenant_id, metric_code = %metric.metric_code, error = %err, "Could not record metric observation")
                }
            }
        }
        recorded
    }

    /// What would a rule on `metric_code` do right now with a different threshold.
    pub async fn impact_preview(
        &self,
        tenant_id: &str,
        metric_code: &str,
        threshold: f64,
        operator: ComparisonOperator,
    ) -> AppetiteResult<ImpactPreview> {
        let resolved = self.resolver.try_resolve(tenant_id, metric_code).await;
        Ok(match resolved {
            Some(metric) => ImpactPreview {
                metric_code: metric_code.to_string(),
                current_value: Some(metric.value),
                proposed_threshold: threshold,
                operator,
                would_breach: evaluate(metric.value, operator, threshold),
                source: metric.source,
            },
            None => ImpactPreview {
                metric_code: metric_code.to_string(),
                current_value: None,
                proposed_threshold: threshold,
                operator,
                would_breach: false,
                source: MetricSource::Unavailable,
            },
        })
    }

    pub async fn breaches(
        &self,
        tenant_id: &str,
        unresolved_only: bool,
        limit: Option<usize>,
    ) -> AppetiteResult<Vec<BreachEvent>> {
        self.recorder.list(tenant_id, unresolved_only, limit).await
    }

    pub async fn resolve_breach(
        &self,
        tenant_id: &str,
        breach_id: &str,
        notes: Option<String>,
    ) -> AppetiteResult<BreachEvent> {
        self.recorder.resolve(tenant_id, breach_id, notes).await
    }
}

fn new_breach(event: BreachEvent, outcome: EnforcementOutcome) -> NewBreach {
    NewBreach {
        breach_id: event.id,
        rule_id: event.rule_id,
        metric_code: event.metric_code,
        value: event.metric_value,
        threshold: event.threshold,
        operator: event.operator,
        severity: event.severity,
        action: event.action_taken,
        action_result: outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appetite::{AppetiteDraft, RuleDraft};
    use crate::collaborators::{
        ExceptionStatus, FlagStore, InMemoryCollaborators, Invoice, InvoiceStatus, OperationalException,
        AR_OVERDUE_EXCEPTION,
    };
    use crate::storage::InMemoryStorage;
    use chrono::NaiveDate;

    struct Harness {
        engine: RiskAppetiteEngine,
        fixture: InMemoryCollaborators,
    }

    async fn harness(record_observations: bool) -> Harness {
        let fixture = InMemoryCollaborators::new();
        let engine = RiskAppetiteEngine::new(
            Arc::new(InMemoryStorage::new()),
            fixture.collaborators(),
            Arc::new(MetricRegistry::with_builtin()),
            EngineConfig {
                record_observations,
                ..EngineConfig::default()
            },
        );
        Harness { engine, fixture }
    }

    async fn seed_ar_overdue(fixture: &InMemoryCollaborators, tenant_id: &str, overdue: f64) {
        fixture
            .data
            .add_invoice(
                tenant_id,
                Invoice {
                    id: "inv-1".to_string(),
                    total_amount: 100.0,
                    paid_amount: 0.0,
                    status: InvoiceStatus::Open,
                    due_date: NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(),
                },
            )
            .await;
        fixture
            .data
            .add_exception(
                tenant_id,
                OperationalException {
                    id: "ex-1".to_string(),
                    exception_type: AR_OVERDUE_EXCEPTION.to_string(),
                    status: ExceptionStatus::Open,
                    impact_amount: overdue,
                    created_at: Utc::now(),
                },
            )
            .await;
    }

    async fn activate(engine: &RiskAppetiteEngine, tenant_id: &str, rules: Vec<RuleDraft>) -> RiskAppetite {
        let draft = engine
            .appetites()
            .create_draft(
                tenant_id,
                AppetiteDraft {
                    name: "FY26 appetite".to_string(),
                    description: None,
                    rules,
                },
            )
            .await
            .unwrap();
        engine.appetites().activate(tenant_id, &draft.id, "board").await.unwrap()
    }

    fn ar_rule() -> RuleDraft {
        RuleDraft::new(
            "ar_overdue_ratio",
            ComparisonOperator::Gt,
            20.0,
            Severity::High,
            BreachAction::Alert,
        )
        .in_domain("collections")
    }

    #[tokio::test]
    async fn no_active_appetite_reports_empty() {
        let h = harness(false).await;
        let report = h.engine.evaluate_all("t1").await.unwrap();
        assert!(!report.has_active_appetite);
        assert!(report.evaluations.is_empty());

        let detection = h.engine.detect_and_enforce("t1").await.unwrap();
        assert_eq!(detection.detected, 0);
        assert!(detection.appetite_id.is_none());
    }

    #[tokio::test]
    async fn detect_once_then_deduplicate() {
        let h = harness(false).await;
        seed_ar_overdue(&h.fixture, "t1", 25.0).await;
        activate(&h.engine, "t1", vec![ar_rule()]).await;

        let first = h.engine.detect_and_enforce("t1").await.unwrap();
        assert_eq!(first.detected, 1);
        let breach = &first.new_breaches[0];
        assert_eq!(breach.severity, Severity::High);
        assert_eq!(breach.action, BreachAction::Alert);
        assert!(breach.action_result.success);
        assert_eq!(h.fixture.alerts.alerts("t1").await.len(), 1);

        let second = h.engine.detect_and_enforce("t1").await.unwrap();
        assert_eq!(second.detected, 0);
        assert_eq!(second.already_open.len(), 1);
        assert_eq!(h.fixture.alerts.alerts("t1").await.len(), 1);
        assert_eq!(h.engine.breaches("t1", true, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn evaluate_is_read_only() {
        let h = harness(true).await;
        seed_ar_overdue(&h.fixture, "t1", 25.0).await;
        activate(&h.engine, "t1", vec![ar_rule()]).await;

        let report = h.engine.evaluate_all("t1").await.unwrap();
        assert_eq!(report.breach_count, 1);
        assert!(report.evaluations[0].is_breached);
        assert_eq!(report.version, Some(1));
        assert_eq!(h.engine.recorder().count("t1").await.unwrap(), 0);
        assert_eq!(h.engine.ledger().count("t1").await.unwrap(), 0);
        assert!(h.fixture.alerts.alerts("t1").await.is_empty());
    }

    #[tokio::test]
    async fn unknown_metric_and_disabled_rules_are_skipped() {
        let h = harness(false).await;
        seed_ar_overdue(&h.fixture, "t1", 25.0).await;
        activate(
            &h.engine,
            "t1",
            vec![
                ar_rule().disabled(),
                RuleDraft::new(
                    "customer_churn",
                    ComparisonOperator::Gt,
                    1.0,
                    Severity::Low,
                    BreachAction::Alert,
                ),
            ],
        )
        .await;

        let report = h.engine.evaluate_all("t1").await.unwrap();
        assert!(report.evaluations.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].metric_code, "customer_churn");
        assert_eq!(report.breach_count, 0);
    }

    #[tokio::test]
    async fn collaborator_failure_skips_rule_without_failing_pass() {
        let h = harness(false).await;
        activate(&h.engine, "t1", vec![ar_rule()]).await;
        h.fixture.data.set_unavailable(true);

        let report = h.engine.detect_and_enforce("t1").await.unwrap();
        assert_eq!(report.detected, 0);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].reason.contains("ar_overdue_ratio"));
    }

    #[tokio::test]
    async fn detection_records_provisional_observations() {
        let h = harness(true).await;
        seed_ar_overdue(&h.fixture, "t1", 10.0).await;
        activate(&h.engine, "t1", vec![ar_rule()]).await;

        let report = h.engine.detect_and_enforce("t1").await.unwrap();
        assert_eq!(report.detected, 0);
        assert_eq!(report.observations_recorded, 1);

        let current = h
            .engine
            .ledger()
            .current("t1", "ar_overdue_ratio", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.truth_level, crate::types::TruthLevel::Provisional);
        assert_eq!(current.authority, crate::types::Authority::Rule);
        assert!(current.derived_from.formula.is_some());
    }

    #[tokio::test]
    async fn concurrent_detection_creates_one_breach() {
        let h = harness(false).await;
        seed_ar_overdue(&h.fixture, "t1", 25.0).await;
        activate(&h.engine, "t1", vec![ar_rule()]).await;

        let runs = futures::future::join_all((0..8).map(|_| {
            let engine = h.engine.clone();
            async move { engine.detect_and_enforce("t1").await.unwrap().detected }
        }))
        .await;

        assert_eq!(runs.iter().sum::<usize>(), 1);
        assert_eq!(h.fixture.alerts.alerts("t1").await.len(), 1);
    }

    #[tokio::test]
    async fn resolved_breach_can_fire_again() {
        let h = harness(false).await;
        seed_ar_overdue(&h.fixture, "t1", 25.0).await;
        activate(&h.engine, "t1", vec![ar_rule()]).await;

        let first = h.engine.detect_and_enforce("t1").await.unwrap();
        h.engine
            .resolve_breach("t1", &first.new_breaches[0].breach_id, Some("written off".into()))
            .await
            .unwrap();

        let again = h.engine.detect_and_enforce("t1").await.unwrap();
        assert_eq!(again.detected, 1);
        assert_eq!(h.engine.breaches("t1", false, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn reports_use_wire_field_names() {
        let h = harness(false).await;
        seed_ar_overdue(&h.fixture, "t1", 25.0).await;
        activate(&h.engine, "t1", vec![ar_rule()]).await;

        let report = serde_json::to_value(h.engine.evaluate_all("t1").await.unwrap()).unwrap();
        let evaluation = &report["evaluations"][0];
        assert_eq!(evaluation["domain"], "collections");
        assert!(evaluation.get("riskDomain").is_none());

        let report =
            serde_json::to_value(h.engine.detect_and_enforce("t1").await.unwrap()).unwrap();
        let breach = &report["newBreaches"][0];
        for key in [
            "breachId",
            "ruleId",
            "metricCode",
            "value",
            "threshold",
            "severity",
            "action",
            "actionResult",
        ] {
            assert!(breach.get(key).is_some(), "missing {key}");
        }
        assert_eq!(breach["value"], 25.0);
        assert_eq!(breach["action"], "ALERT");
    }

    #[tokio::test]
    async fn breach_write_failure_does_not_stop_other_rules() {
        let storage = Arc::new(InMemoryStorage::new());
        let fixture = InMemoryCollaborators::new();
        let engine = RiskAppetiteEngine::new(
            storage.clone(),
            fixture.collaborators(),
            Arc::new(MetricRegistry::with_builtin()),
            EngineConfig {
                record_observations: false,
                ..EngineConfig::default()
            },
        );
        seed_ar_overdue(&fixture, "t1", 25.0).await;
        let appetite = activate(
            &engine,
            "t1",
            vec![
                ar_rule(),
                RuleDraft::new(
                    "ar_overdue_ratio",
                    ComparisonOperator::Gt,
                    10.0,
                    Severity::Critical,
                    BreachAction::BlockAutomation,
                ),
            ],
        )
        .await;
        let alert_rule = appetite
            .rules
            .iter()
            .find(|r| r.action_on_breach == BreachAction::Alert)
            .unwrap();
        let block_rule = appetite
            .rules
            .iter()
            .find(|r| r.action_on_breach == BreachAction::BlockAutomation)
            .unwrap();
        storage.fail_breach_writes_for(&alert_rule.id).await;

        let report = engine.detect_and_enforce("t1").await.unwrap();
        assert_eq!(report.detected, 1);
        assert_eq!(report.new_breaches[0].rule_id, block_rule.id);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].rule_id, alert_rule.id);
        assert!(report.failed[0].reason.contains("breach write"));

        let open = engine.breaches("t1", true, None).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].rule_id, block_rule.id);
        assert!(!fixture.flags.get_flags("t1").await.unwrap().auto_reconciliation_enabled);
    }

    #[tokio::test]
    async fn impact_preview_handles_unknown_metrics() {
        let h = harness(false).await;
        seed_ar_overdue(&h.fixture, "t1", 25.0).await;

        let known = h
            .engine
            .impact_preview("t1", "ar_overdue_ratio", 30.0, ComparisonOperator::Gt)
            .await
            .unwrap();
        assert_eq!(known.current_value, Some(25.0));
        assert!(!known.would_breach);

        let unknown = h
            .engine
            .impact_preview("t1", "nps", 30.0, ComparisonOperator::Gt)
            .await
            .unwrap();
        assert_eq!(unknown.current_value, None);
        assert!(!unknown.would_breach);
        assert_eq!(unknown.source, MetricSource::Unavailable);
    }
}
