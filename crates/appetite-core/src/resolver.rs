//! Metric resolution through a registry of typed recipes.
//!
//! Every rule names a metric code. The registry maps the code to a recipe that
//! either recomputes the value from operational data or reads the latest settled
//! value from the fact ledger. Unknown codes are a plain miss.

use crate::collaborators::{
    OperationalData, ReconciliationDecision, ReconciliationOutcome, AR_OVERDUE_EXCEPTION,
};
use crate::error::{AppetiteError, AppetiteResult};
use crate::ledger::FactLedger;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Trailing window for outcome-based metrics.
pub const LOOKBACK_DAYS: i64 = 30;

pub const AR_OVERDUE_RATIO: &str = "ar_overdue_ratio";
pub const FALSE_AUTO_RATE: &str = "false_auto_rate";
pub const AUTO_MATCH_RATE: &str = "auto_match_rate";
pub const OPEN_EXCEPTION_COUNT: &str = "open_exception_count";
pub const ML_ACCURACY: &str = "ml_accuracy";
pub const CASH_POSITION: &str = "cash_position";
pub const CASH_RUNWAY_DAYS: &str = "cash_runway_days";

/// `numerator / denominator * 100`, or 0 when the denominator is zero.
pub fn ratio_percent(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 || !denominator.is_finite() {
        return 0.0;
    }
    numerator / denominator * 100.0
}

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MetricSource {
    Computed,
    Ledger,
    Unavailable,
}

impl MetricSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Computed => "computed",
            Self::Ledger => "ledger",
            Self::Unavailable => "unavailable",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedMetric {
    pub metric_code: String,
    pub value: f64,
    pub source: MetricSource,
    pub formula: String,
    pub source_tables: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation_id: Option<String>,
}

/// Inputs available to a recipe.
pub struct MetricContext<'a> {
    pub tenant_id: &'a str,
    pub data: &'a dyn OperationalData,
    pub ledger: &'a FactLedger,
    pub now: DateTime<Utc>,
}

impl MetricContext<'_> {
    pub fn window_start(&self) -> DateTime<Utc> {
        self.now - ChronoDuration::days(LOOKBACK_DAYS)
    }

    async fn recent_outcomes(&self) -> AppetiteResult<Vec<ReconciliationOutcome>> {
        self.data
            .reconciliation_outcomes(self.tenant_id, self.window_start())
            .await
    }
}

/// Value of a recipe evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct RecipeValue {
    pub value: f64,
    pub observation_id: Option<String>,
}

impl From<f64> for RecipeValue {
    fn from(value: f64) -> Self {
        Self {
            value,
            observation_id: None,
        }
    }
}

#[async_trait]
pub trait MetricRecipe: Send + Sync {
    fn metric_code(&self) -> &str;

    fn formula(&self) -> &str;

    fn source_tables(&self) -> &[&'static str];

    fn source(&self) -> MetricSource {
        MetricSource::Computed
    }

    /// `Ok(None)` when there is nothing to compute from.
    async fn compute(&self, ctx: &MetricContext<'_>) -> AppetiteResult<Option<RecipeValue>>;
}

struct ArOverdueRatio;

#[async_trait]
impl MetricRecipe for ArOverdueRatio {
    fn metric_code(&self) -> &str {
        AR_OVERDUE_RATIO
    }

    fn formula(&self) -> &str {
        "sum(open AR_OVERDUE exception impact) / sum(open invoice total - paid) * 100"
    }

    fn source_tables(&self) -> &[&'static str] {
        &["operational_exceptions", "invoices"]
    }

    async fn compute(&self, ctx: &MetricContext<'_>) -> AppetiteResult<Option<RecipeValue>> {
        let outstanding: f64 = ctx
            .data
            .open_invoices(ctx.tenant_id)
            .await?
            .iter()
            .map(|invoice| invoice.outstanding())
            .sum();
        let overdue: f64 = ctx
            .data
            .open_exceptions(ctx.tenant_id)
            .await?
            .iter()
            .filter(|e| e.exception_type == AR_OVERDUE_EXCEPTION)
            .map(|e| e.impact_amount)
            .sum();
        Ok(Some(ratio_percent(overdue, outstanding).into()))
    }
}

struct FalseAutoRate;

#[async_trait]
impl MetricRecipe for FalseAutoRate {
    fn metric_code(&self) -> &str {
        FALSE_AUTO_RATE
    }

    fn formula(&self) -> &str {
        "false_auto / (auto_confirmed + false_auto) * 100 over trailing 30 days"
    }

    fn source_tables(&self) -> &[&'static str] {
        &["reconciliation_outcomes"]
    }

    async fn compute(&self, ctx: &MetricContext<'_>) -> AppetiteResult<Option<RecipeValue>> {
        let counts = count_decisions(&ctx.recent_outcomes().await?);
        let false_auto = counts.get(&ReconciliationDecision::FalseAuto).copied().unwrap_or(0);
        let auto = counts
            .get(&ReconciliationDecision::AutoConfirmed)
            .copied()
            .unwrap_or(0)
            + false_auto;
        Ok(Some(ratio_percent(false_auto as f64, auto as f64).into()))
    }
}

struct AutoMatchRate;

#[async_trait]
impl MetricRecipe for AutoMatchRate {
    fn metric_code(&self) -> &str {
        AUTO_MATCH_RATE
    }

    fn formula(&self) -> &str {
        "(auto_confirmed + false_auto) / all outcomes * 100 over trailing 30 days"
    }

    fn source_tables(&self) -> &[&'static str] {
        &["reconciliation_outcomes"]
    }

    async fn compute(&self, ctx: &MetricContext<'_>) -> AppetiteResult<Option<RecipeValue>> {
        let outcomes = ctx.recent_outcomes().await?;
        let counts = count_decisions(&outcomes);
        let automated = counts
            .get(&ReconciliationDecision::AutoConfirmed)
            .copied()
            .unwrap_or(0)
            + counts.get(&ReconciliationDecision::FalseAuto).copied().unwrap_or(0);
        Ok(Some(ratio_percent(automated as f64, outcomes.len() as f64).into()))
    }
}

struct OpenExceptionCount;

#[async_trait]
impl MetricRecipe for OpenExceptionCount {
    fn metric_code(&self) -> &str {
        OPEN_EXCEPTION_COUNT
    }

    fn formula(&self) -> &str {
        "count(open exceptions)"
    }

    fn source_tables(&self) -> &[&'static str] {
        &["operational_exceptions"]
    }

    async fn compute(&self, ctx: &MetricContext<'_>) -> AppetiteResult<Option<RecipeValue>> {
        let open = ctx.data.open_exceptions(ctx.tenant_id).await?;
        Ok(Some((open.len() as f64).into()))
    }
}

struct MlAccuracy;

#[async_trait]
impl MetricRecipe for MlAccuracy {
    fn metric_code(&self) -> &str {
        ML_ACCURACY
    }

    fn formula(&self) -> &str {
        "latest model accuracy * 100"
    }

    fn source_tables(&self) -> &[&'static str] {
        &["ml_model_performance"]
    }

    async fn compute(&self, ctx: &MetricContext<'_>) -> AppetiteResult<Option<RecipeValue>> {
        let latest = ctx.data.latest_ml_performance(ctx.tenant_id).await?;
        Ok(latest.map(|performance| (performance.accuracy * 100.0).into()))
    }
}

/// Reads the latest settled ledger value without recomputation.
struct SettledLedgerMetric {
    metric_code: &'static str,
}

#[async_trait]
impl MetricRecipe for SettledLedgerMetric {
    fn metric_code(&self) -> &str {
        self.metric_code
    }

    fn formula(&self) -> &str {
        "latest settled observation"
    }

    fn source_tables(&self) -> &[&'static str] {
        &["metric_observations"]
    }

    fn source(&self) -> MetricSource {
        MetricSource::Ledger
    }

    async fn compute(&self, ctx: &MetricContext<'_>) -> AppetiteResult<Option<RecipeValue>> {
        let latest = ctx
            .ledger
            .latest_settled(ctx.tenant_id, self.metric_code)
            .await?;
        Ok(latest.map(|observation| RecipeValue {
            value: observation.value,
            observation_id: Some(observation.id),
        }))
    }
}

fn count_decisions(outcomes: &[ReconciliationOutcome]) -> HashMap<ReconciliationDecision, usize> {
    let mut counts = HashMap::new();
    for outcome in outcomes {
        *counts.entry(outcome.outcome).or_insert(0) += 1;
    }
    counts
}

/// Metric code to recipe lookup.
#[derive(Clone, Default)]
pub struct MetricRegistry {
    recipes: BTreeMap<String, Arc<dyn MetricRecipe>>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ArOverdueRatio));
        registry.register(Arc::new(FalseAutoRate));
        registry.register(Arc::new(AutoMatchRate));
        registry.register(Arc::new(OpenExceptionCount));
        registry.register(Arc::new(MlAccuracy));
        registry.register(Arc::new(SettledLedgerMetric {
            metric_code: CASH_POSITION,
        }));
        registry.register(Arc::new(SettledLedgerMetric {
            metric_code: CASH_RUNWAY_DAYS,
        }));
        registry
    }

    pub fn register(&mut self, recipe: Arc<dyn MetricRecipe>) {
        self.recipes.insert(recipe.metric_code().to_string(), recipe);
    }

    pub fn get(&self, metric_code: &str) -> Option<Arc<dyn MetricRecipe>> {
        self.recipes.get(metric_code).cloned()
    }

    pub fn metric_codes(&self) -> Vec<String> {
        self.recipes.keys().cloned().collect()
    }
}

/// Resolves metric codes for a tenant, bounded by a timeout.
#[derive(Clone)]
pub struct MetricResolver {
    registry: Arc<MetricRegistry>,
    data: Arc<dyn OperationalData>,
    ledger: FactLedger,
    timeout: Duration,
}

impl MetricResolver {
    pub fn new(
        registry: Arc<MetricRegistry>,
        data: Arc<dyn OperationalData>,
        ledger: FactLedger,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            data,
            ledger,
            timeout,
        }
    }

    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    /// Resolve the current value. `Ok(None)` for unknown codes and recipes with no input.
    pub async fn resolve(
        &self,
        tenant_id: &str,
        metric_code: &str,
    ) -> AppetiteResult<Option<ResolvedMetric>> {
        let Some(recipe) = self.registry.get(metric_code) else {
            debug!(tenant_id, metric_code, "No recipe registered for metric");
            return Ok(None);
        };

        let ctx = MetricContext {
            tenant_id,
            data: self.data.as_ref(),
            ledger: &self.ledger,
            now: Utc::now(),
        };

        let computed = tokio::time::timeout(self.timeout, recipe.compute(&ctx))
            .await
            .map_err(|_| AppetiteError::timeout(format!("resolve {metric_code}"), self.timeout))?
            .map_err(|err| AppetiteError::resolution(metric_code, err.to_string()))?;

        Ok(computed.and_then(|computed| {
            if !computed.value.is_finite() {
                warn!(tenant_id, metric_code, "Recipe produced a non-finite value");
                return None;
            }
            Some(ResolvedMetric {
                metric_code: metric_code.to_string(),
                value: computed.value,
                source: recipe.source(),
                formula: recipe.formula().to_string(),
                source_tables: recipe
                    .source_tables()
                    .iter()
                    .map(|t| t.to_string())
                    .collect(),
                observation_id: computed.observation_id,
            })
        }))
    }

    /// Like [`resolve`](Self::resolve), but failures are logged and treated as a miss.
    pub async fn try_resolve(&self, tenant_id: &str, metric_code: &str) -> Option<ResolvedMetric> {
        match self.resolve(tenant_id, metric_code).await {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!(tenant_id, metric_code, error = %err, "Metric resolution failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        ExceptionStatus, InMemoryOperationalData, Invoice, InvoiceStatus, MlPerformance,
        OperationalException,
    };
    use crate::ledger::{DerivedFrom, ObservationDraft};
    use crate::storage::InMemoryStorage;
    use crate::types::Authority;
    use chrono::NaiveDate;

    fn resolver(data: Arc<InMemoryOperationalData>) -> (MetricResolver, FactLedger) {
        let ledger = FactLedger::new(Arc::new(InMemoryStorage::new()));
        let resolver = MetricResolver::new(
            Arc::new(MetricRegistry::with_builtin()),
            data,
            ledger.clone(),
            Duration::from_secs(2),
        );
        (resolver, ledger)
    }

    fn outcome(id: &str, outcome: ReconciliationDecision) -> ReconciliationOutcome {
        ReconciliationOutcome {
            id: id.to_string(),
            outcome,
            decided_at: Utc::now(),
        }
    }

    #[test]
    fn zero_denominator_is_zero() {
        assert_eq!(ratio_percent(10.0, 0.0), 0.0);
        assert_eq!(ratio_percent(25.0, 100.0), 25.0);
    }

    #[tokio::test]
    async fn ar_overdue_ratio_without_invoices_is_zero() {
        let data = Arc::new(InMemoryOperationalData::new());
        data.add_exception(
            "t1",
            OperationalException {
                id: "ex-1".to_string(),
                exception_type: AR_OVERDUE_EXCEPTION.to_string(),
                status: ExceptionStatus::Open,
                impact_amount: 500.0,
                created_at: Utc::now(),
            },
        )
        .await;
        let (resolver, _) = resolver(data);

        let resolved = resolver.resolve("t1", AR_OVERDUE_RATIO).await.unwrap().unwrap();
        assert_eq!(resolved.value, 0.0);
        assert_eq!(resolved.source, MetricSource::Computed);
    }

    #[tokio::test]
    async fn ar_overdue_ratio_uses_outstanding_balance() {
        let data = Arc::new(InMemoryOperationalData::new());
        data.add_invoice(
            "t1",
            Invoice {
                id: "inv-1".to_string(),
                total_amount: 1_200.0,
                paid_amount: 200.0,
                status: InvoiceStatus::Open,
                due_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            },
        )
        .await;
        data.add_exception(
            "t1",
            OperationalException {
                id: "ex-1".to_string(),
                exception_type: AR_OVERDUE_EXCEPTION.to_string(),
                status: ExceptionStatus::Open,
                impact_amount: 250.0,
                created_at: Utc::now(),
            },
        )
        .await;
        data.add_exception(
            "t1",
            OperationalException {
                id: "ex-2".to_string(),
                exception_type: "DUPLICATE_PAYMENT".to_string(),
                status: ExceptionStatus::Open,
                impact_amount: 999.0,
                created_at: Utc::now(),
            },
        )
        .await;
        let (resolver, _) = resolver(data);

        let resolved = resolver.resolve("t1", AR_OVERDUE_RATIO).await.unwrap().unwrap();
        assert!((resolved.value - 25.0).abs() < 1e-9);
        let count = resolver.resolve("t1", OPEN_EXCEPTION_COUNT).await.unwrap().unwrap();
        assert_eq!(count.value, 2.0);
    }

    #[tokio::test]
    async fn outcome_rates() {
        let data = Arc::new(InMemoryOperationalData::new());
        for (i, decision) in [
            ReconciliationDecision::AutoConfirmed,
            ReconciliationDecision::AutoConfirmed,
            ReconciliationDecision::AutoConfirmed,
            ReconciliationDecision::FalseAuto,
            ReconciliationDecision::ManualMatch,
        ]
        .into_iter()
        .enumerate()
        {
            data.add_outcome("t1", outcome(&format!("o{i}"), decision)).await;
        }
        let (resolver, _) = resolver(data);

        let false_auto = resolver.resolve("t1", FALSE_AUTO_RATE).await.unwrap().unwrap();
        assert!((false_auto.value - 25.0).abs() < 1e-9);
        let auto_match = resolver.resolve("t1", AUTO_MATCH_RATE).await.unwrap().unwrap();
        assert!((auto_match.value - 80.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn ml_accuracy_is_percent_of_latest() {
        let data = Arc::new(InMemoryOperationalData::new());
        data.add_ml_performance(
            "t1",
            MlPerformance {
                model_name: "matcher".to_string(),
                accuracy: 0.5,
                recorded_at: Utc::now() - ChronoDuration::days(1),
            },
        )
        .await;
        data.add_ml_performance(
            "t1",
            MlPerformance {
                model_name: "matcher".to_string(),
                accuracy: 0.92,
                recorded_at: Utc::now(),
            },
        )
        .await;
        let (resolver, _) = resolver(data);

        let resolved = resolver.resolve("t1", ML_ACCURACY).await.unwrap().unwrap();
        assert!((resolved.value - 92.0).abs() < 1e-9);
        assert!(resolver.resolve("t2", ML_ACCURACY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ledger_metrics_ignore_provisional_values() {
        let data = Arc::new(InMemoryOperationalData::new());
        let (resolver, ledger) = resolver(data);

        assert!(resolver.resolve("t1", CASH_POSITION).await.unwrap().is_none());

        ledger
            .append(
                "t1",
                ObservationDraft::settled(CASH_POSITION, 80_000.0, Authority::Bank)
                    .with_derived_from(DerivedFrom::default().with_evidence("stmt-7")),
            )
            .await
            .unwrap();
        ledger
            .append(
                "t1",
                ObservationDraft::provisional(CASH_POSITION, 1.0)
                    .with_derived_from(DerivedFrom::formula("estimate", &["forecast"])),
            )
            .await
            .unwrap();

        let resolved = resolver.resolve("t1", CASH_POSITION).await.unwrap().unwrap();
        assert_eq!(resolved.value, 80_000.0);
        assert_eq!(resolved.source, MetricSource::Ledger);
        assert!(resolved.observation_id.is_some());
    }

    #[tokio::test]
    async fn unknown_metric_is_a_miss_and_failures_are_errors() {
        let data = Arc::new(InMemoryOperationalData::new());
        let (resolver, _) = resolver(data.clone());
        assert!(resolver.resolve("t1", "churn_rate").await.unwrap().is_none());

        data.set_unavailable(true);
        let err = resolver.resolve("t1", FALSE_AUTO_RATE).await.unwrap_err();
        assert!(matches!(err, AppetiteError::MetricResolution { .. }));
        assert!(resolver.try_resolve("t1", FALSE_AUTO_RATE).await.is_none());
    }

    struct SlowRecipe;

    #[async_trait]
    impl MetricRecipe for SlowRecipe {
        fn metric_code(&self) -> &str {
            "slow_metric"
        }

        fn formula(&self) -> &str {
            "sleep"
        }

        fn source_tables(&self) -> &[&'static str] {
            &[]
        }

        async fn compute(&self, _ctx: &MetricContext<'_>) -> AppetiteResult<Option<RecipeValue>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Some(1.0.into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_recipe_times_out() {
        let mut registry = MetricRegistry::with_builtin();
        registry.register(Arc::new(SlowRecipe));
        let resolver = MetricResolver::new(
            Arc::new(registry),
            Arc::new(InMemoryOperationalData::new()),
            FactLedger::new(Arc::new(InMemoryStorage::new())),
            Duration::from_millis(50),
        );

        let err = resolver.resolve("t1", "slow_metric").await.unwrap_err();
        assert!(matches!(err, AppetiteError::Timeout { .. }));
    }
}
