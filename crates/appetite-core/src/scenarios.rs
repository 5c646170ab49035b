//! Board scenario projections.
//!
//! A scenario applies macro assumptions (revenue shock, collection delay, cost
//! inflation, automation pause) to a baseline built from live data, then checks
//! the projected metrics against the active appetite. Every output is tagged
//! `simulated` and stays out of the ledger and the breach table.

use crate::collaborators::{OperationalData, AR_OVERDUE_EXCEPTION};
use crate::engine::RiskAppetiteEngine;
use crate::error::{AppetiteError, AppetiteResult};
use crate::evaluator::evaluate;
use crate::resolver::{
    ratio_percent, AR_OVERDUE_RATIO, AUTO_MATCH_RATE, CASH_POSITION, CASH_RUNWAY_DAYS,
};
use crate::storage::Storage;
use crate::types::{BreachAction, ComparisonOperator, Severity, TruthLevel};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub const MAX_RUNWAY_DAYS: f64 = 999.0;
/// Delay, in days, after which all current receivables count as overdue.
pub const FULL_AR_SHIFT_DAYS: f64 = 30.0;
pub const AR_OUTSTANDING: &str = "ar_outstanding";
pub const AR_OVERDUE: &str = "ar_overdue";
pub const MONTHLY_REVENUE: &str = "monthly_revenue";
pub const MONTHLY_COSTS: &str = "monthly_costs";
pub const MONTHLY_NET_BURN: &str = "monthly_net_burn";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScenarioType {
    RevenueShock,
    ArDelay,
    CostInflation,
    AutomationPause,
    Custom,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioAssumptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revenue_change_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ar_delay_days: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_inflation_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automation_paused: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioRequest {
    pub scenario_name: String,
    pub scenario_type: ScenarioType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub assumptions: ScenarioAssumptions,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BaselineSnapshot {
    pub cash_position: f64,
    pub ar_outstanding: f64,
    pub ar_overdue: f64,
    pub monthly_revenue: f64,
    pub monthly_costs: f64,
    pub auto_reconciliation_rate: f64,
    pub captured_at: DateTime<Utc>,
}

/// One metric of a scenario, before and after the assumptions are applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectedOutcome {
    pub metric: String,
    pub baseline: f64,
    pub projected: f64,
    pub delta: f64,
    pub truth_level: TruthLevel,
}

/// Derived financial position, for the baseline or a projection.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Position {
    cash_position: f64,
    cash_runway_days: f64,
    ar_outstanding: f64,
    ar_overdue: f64,
    ar_overdue_ratio: f64,
    monthly_revenue: f64,
    monthly_costs: f64,
    monthly_net_burn: f64,
    auto_reconciliation_rate: f64,
}

impl Position {
    /// Values keyed by metric code, in reporting order.
    fn metric_values(&self) -> [(&'static str, f64); 9] {
        [
            (CASH_POSITION, self.cash_position),
            (CASH_RUNWAY_DAYS, self.cash_runway_days),
            (AR_OUTSTANDING, self.ar_outstanding),
            (AR_OVERDUE, self.ar_overdue),
            (AR_OVERDUE_RATIO, self.ar_overdue_ratio),
            (MONTHLY_REVENUE, self.monthly_revenue),
            (MONTHLY_COSTS, self.monthly_costs),
            (MONTHLY_NET_BURN, self.monthly_net_burn),
            (AUTO_MATCH_RATE, self.auto_reconciliation_rate),
        ]
    }

    fn value(&self, metric_code: &str) -> Option<f64> {
        self.metric_values()
            .into_iter()
            .find(|(code, _)| *code == metric_code)
            .map(|(_, value)| value)
    }
}

fn projected_outcomes(baseline: &Position, projected: &Position) -> Vec<ProjectedOutcome> {
    baseline
        .metric_values()
        .into_iter()
        .zip(projected.metric_values())
        .map(|((metric, before), (_, after))| ProjectedOutcome {
            metric: metric.to_string(),
            baseline: before,
            projected: after,
            delta: after - before,
            truth_level: TruthLevel::Simulated,
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SimulatedBreach {
    pub rule_id: String,
    pub metric_code: String,
    pub metric_label: String,
    pub projected_value: f64,
    pub threshold: f64,
    pub operator: ComparisonOperator,
    pub severity: Severity,
    pub action_on_breach: BreachAction,
    pub truth_level: TruthLevel,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControlImpacts {
    pub automation_paused: bool,
    pub ml_disabled: bool,
    pub approval_required_domains: Vec<String>,
    pub board_escalation: bool,
    pub actions_triggered: Vec<BreachAction>,
}

/// Persisted scenario.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BoardScenario {
    pub id: String,
    pub tenant_id: String,
    pub scenario_name: String,
    pub scenario_type: ScenarioType,
    pub description: Option<String>,
    pub assumptions: ScenarioAssumptions,
    pub projected_outcomes: Vec<ProjectedOutcome>,
    pub risk_breaches: Vec<SimulatedBreach>,
    pub control_impacts: ControlImpacts,
    pub baseline_snapshot: BaselineSnapshot,
    pub is_archived: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioResult {
    pub scenario_id: String,
    pub baseline: BaselineSnapshot,
    pub projected_outcomes: Vec<ProjectedOutcome>,
    pub risk_breaches: Vec<SimulatedBreach>,
    pub control_impacts: ControlImpacts,
    pub is_simulation: bool,
    pub truth_level: TruthLevel,
}

fn require(value: Option<f64>, field: &str, scenario: ScenarioType) -> AppetiteResult<f64> {
    let value = value.ok_or_else(|| {
        AppetiteError::validation(format!(
            "assumptions.{field} is required for {}",
            serde_json::to_value(scenario)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default()
        ))
    })?;
    if !value.is_finite() {
        return Err(AppetiteError::validation(format!(
            "assumptions.{field} must be a finite number"
        )));
    }
    Ok(value)
}

fn optional(value: Option<f64>, field: &str) -> AppetiteResult<Option<f64>> {
    match value {
        Some(v) if !v.is_finite() => Err(AppetiteError::validation(format!(
            "assumptions.{field} must be a finite number"
        ))),
        other => Ok(other),
    }
}

/// Assumptions that actually apply to a scenario type.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Adjustments {
    revenue_change_pct: f64,
    ar_delay_days: f64,
    cost_inflation_pct: f64,
    pause_automation: bool,
}

impl Adjustments {
    fn for_request(request: &ScenarioRequest) -> AppetiteResult<Self> {
        let a = &request.assumptions;
        let kind = request.scenario_type;
        let adjustments = match kind {
            ScenarioType::RevenueShock => Self {
                revenue_change_pct: require(a.revenue_change_pct, "revenueChangePct", kind)?,
                ..Self::default()
            },
            ScenarioType::ArDelay => Self {
                ar_delay_days: require(a.ar_delay_days, "arDelayDays", kind)?,
                ..Self::default()
            },
            ScenarioType::CostInflation => Self {
                cost_inflation_pct: require(a.cost_inflation_pct, "costInflationPct", kind)?,
                ..Self::default()
            },
            ScenarioType::AutomationPause => Self {
                pause_automation: true,
                ..Self::default()
            },
            ScenarioType::Custom => Self {
                revenue_change_pct: optional(a.revenue_change_pct, "revenueChangePct")?
                    .unwrap_or(0.0),
                ar_delay_days: optional(a.ar_delay_days, "arDelayDays")?.unwrap_or(0.0),
                cost_inflation_pct: optional(a.cost_inflation_pct, "costInflationPct")?
                    .unwrap_or(0.0),
                pause_automation: a.automation_paused.unwrap_or(false),
            },
        };
        if adjustments.ar_delay_days < 0.0 {
            return Err(AppetiteError::validation(
                "assumptions.arDelayDays must not be negative",
            ));
        }
        Ok(adjustments)
    }
}

/// Days of cash at the current monthly net burn, capped when not burning.
pub fn runway_days(cash: f64, monthly_net_burn: f64) -> f64 {
    if monthly_net_burn <= 0.0 {
        return MAX_RUNWAY_DAYS;
    }
    (cash / (monthly_net_burn / 30.0)).clamp(0.0, MAX_RUNWAY_DAYS)
}

fn project(baseline: &BaselineSnapshot, adjustments: Adjustments) -> Position {
    let monthly_revenue =
        (baseline.monthly_revenue * (1.0 + adjustments.revenue_change_pct / 100.0)).max(0.0);
    let monthly_costs =
        (baseline.monthly_costs * (1.0 + adjustments.cost_inflation_pct / 100.0)).max(0.0);

    let current_ar = (baseline.ar_outstanding - baseline.ar_overdue).max(0.0);
    let shift_fraction = (adjustments.ar_delay_days / FULL_AR_SHIFT_DAYS).min(1.0);
    let shifted = current_ar * shift_fraction;
    let ar_overdue = baseline.ar_overdue + shifted;
    let cash_position = baseline.cash_position - shifted;

    let monthly_net_burn = monthly_costs - monthly_revenue;
    Position {
        cash_position,
        cash_runway_days: runway_days(cash_position, monthly_net_burn),
        ar_outstanding: baseline.ar_outstanding,
        ar_overdue,
        ar_overdue_ratio: ratio_percent(ar_overdue, baseline.ar_outstanding),
        monthly_revenue,
        monthly_costs,
        monthly_net_burn,
        auto_reconciliation_rate: if adjustments.pause_automation {
            0.0
        } else {
            baseline.auto_reconciliation_rate
        },
    }
}

fn control_impacts(breaches: &[SimulatedBreach], automation_paused: bool) -> ControlImpacts {
    let mut impacts = ControlImpacts {
        automation_paused,
        ..ControlImpacts::default()
    };
    for breach in breaches {
        if !impacts.actions_triggered.contains(&breach.action_on_breach) {
            impacts.actions_triggered.push(breach.action_on_breach);
        }
        match breach.action_on_breach {
            BreachAction::BlockAutomation => impacts.automation_paused = true,
            BreachAction::DisableMl => impacts.ml_disabled = true,
            BreachAction::EscalateToBoard => impacts.board_escalation = true,
            BreachAction::RequireApproval | BreachAction::Alert => {}
        }
    }
    impacts
}

#[derive(Clone)]
pub struct ScenarioProjector {
    engine: RiskAppetiteEngine,
    data: Arc<dyn OperationalData>,
    storage: Arc<dyn Storage>,
}

impl ScenarioProjector {
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

    pub async fn baseline(&self, tenant_id: &str) -> AppetiteResult<BaselineSnapshot> {
        let now = Utc::now();

        let cash_position = self
            .engine
            .ledger()
            .latest_settled(tenant_id, CASH_POSITION)
            .await?
            .map(|o| o.value)
            .unwrap_or(0.0);

        let ar_outstanding = self
            .data
            .open_invoices(tenant_id)
            .await?
            .iter()
            .fold(0.0, |total, invoice| total + invoice.outstanding());
        // Same source as the live ar_overdue_ratio metric.
        let ar_overdue = self
            .data
            .open_exceptions(tenant_id)
            .await?
            .iter()
            .filter(|e| e.exception_type == AR_OVERDUE_EXCEPTION)
            .fold(0.0, |total, e| total + e.impact_amount);

        let financials = self.data.monthly_financials(tenant_id).await?;
        let auto_reconciliation_rate = self
            .engine
            .resolver()
            .try_resolve(tenant_id, AUTO_MATCH_RATE)
            .await
            .map(|m| m.value)
            .unwrap_or(0.0);

        Ok(BaselineSnapshot {
            cash_position,
            ar_outstanding,
            ar_overdue,
            monthly_revenue: financials.revenue,
            monthly_costs: financials.costs,
            auto_reconciliation_rate,
            captured_at: now.trunc_subsecs(6),
        })
    }

    /// Project the scenario, check it against the live appetite and save it.
    pub async fn simulate(
        &self,
        tenant_id: &str,
        request: ScenarioRequest,
        created_by: &str,
    ) -> AppetiteResult<ScenarioResult> {
        if request.scenario_name.trim().is_empty() {
            return Err(AppetiteError::validation("scenarioName is required"));
        }
        let adjustments = Adjustments::for_request(&request)?;

        let baseline = self.baseline(tenant_id).await?;
        let projected = project(&baseline, adjustments);
        let outcomes = projected_outcomes(&project(&baseline, Adjustments::default()), &projected);
        let risk_breaches = self.simulated_breaches(tenant_id, &projected).await?;
        let control_impacts = control_impacts(&risk_breaches, adjustments.pause_automation);

        let mut approval_domains = Vec::new();
        if let Some(appetite) = self.engine.appetites().active(tenant_id).await? {
            for breach in &risk_breaches {
                if breach.action_on_breach != BreachAction::RequireApproval {
                    continue;
                }
                if let Some(rule) = appetite.rules.iter().find(|r| r.id == breach.rule_id) {
                    if !approval_domains.contains(&rule.risk_domain) {
                        approval_domains.push(rule.risk_domain.clone());
                    }
                }
            }
        }
        let control_impacts = ControlImpacts {
            approval_required_domains: approval_domains,
            ..control_impacts
        };

        let scenario = BoardScenario {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            scenario_name: request.scenario_name.trim().to_string(),
            scenario_type: request.scenario_type,
            description: request.description,
            assumptions: request.assumptions,
            projected_outcomes: outcomes.clone(),
            risk_breaches: risk_breaches.clone(),
            control_impacts: control_impacts.clone(),
            baseline_snapshot: baseline.clone(),
            is_archived: false,
            created_by: created_by.to_string(),
            created_at: Utc::now().trunc_subsecs(6),
        };
        self.storage.insert_scenario(scenario.clone()).await?;

        info!(
            tenant_id,
            scenario_id = %scenario.id,
            simulated_breaches = risk_breaches.len(),
            "Saved board scenario"
        );

        Ok(ScenarioResult {
            scenario_id: scenario.id,
            baseline,
            projected_outcomes: outcomes,
            risk_breaches,
            control_impacts,
            is_simulation: true,
            truth_level: TruthLevel::Simulated,
        })
    }

    async fn simulated_breaches(
        &self,
        tenant_id: &str,
        projected: &Position,
    ) -> AppetiteResult<Vec<SimulatedBreach>> {
        let Some(appetite) = self.engine.appetites().active(tenant_id).await? else {
            return Ok(Vec::new());
        };

        Ok(appetite
            .enabled_rules()
            .filter_map(|rule| {
                let value = projected.value(&rule.metric_code)?;
                evaluate(value, rule.operator, rule.threshold).then(|| SimulatedBreach {
                    rule_id: rule.id.clone(),
                    metric_code: rule.metric_code.clone(),
                    metric_label: rule.metric_label.clone(),
                    projected_value: value,
                    threshold: rule.threshold,
                    operator: rule.operator,
                    severity: rule.severity,
                    action_on_breach: rule.action_on_breach,
                    truth_level: TruthLevel::Simulated,
                })
            })
            .collect())
    }

    pub async fn list(
        &self,
        tenant_id: &str,
        include_archived: bool,
    ) -> AppetiteResult<Vec<BoardScenario>> {
        self.storage.list_scenarios(tenant_id, include_archived).await
    }

    pub async fn get(&self, tenant_id: &str, id: &str) -> AppetiteResult<BoardScenario> {
        self.storage
            .get_scenario(tenant_id, id)
            .await?
            .ok_or_else(|| AppetiteError::NotFound(format!("board scenario '{id}'")))
    }

    pub async fn archive(&self, tenant_id: &str, id: &str) -> AppetiteResult<BoardScenario> {
        let archived = self.storage.archive_scenario(tenant_id, id).await?;
        info!(tenant_id, scenario_id = id, "Archived board scenario");
        Ok(archived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appetite::{AppetiteDraft, RuleDraft};
    use crate::collaborators::{
        ExceptionStatus, InMemoryCollaborators, Invoice, InvoiceStatus, MonthlyFinancials,
        OperationalException,
    };
    use crate::engine::EngineConfig;
    use crate::ledger::{DerivedFrom, ObservationDraft};
    use crate::resolver::MetricRegistry;
    use crate::storage::InMemoryStorage;
    use crate::types::Authority;
    use chrono::Duration;

    fn baseline() -> BaselineSnapshot {
        BaselineSnapshot {
            cash_position: 300_000.0,
            ar_outstanding: 100_000.0,
            ar_overdue: 20_000.0,
            monthly_revenue: 50_000.0,
            monthly_costs: 60_000.0,
            auto_reconciliation_rate: 80.0,
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn revenue_shock_scales_revenue_and_runway() {
        let projected = project(
            &baseline(),
            Adjustments {
                revenue_change_pct: -20.0,
                ..Adjustments::default()
            },
        );
        assert!((projected.monthly_revenue - 40_000.0).abs() < 1e-6);
        assert!((projected.monthly_net_burn - 20_000.0).abs() < 1e-6);
        assert!((projected.cash_runway_days - 450.0).abs() < 1e-6);
    }

    #[test]
    fn ar_delay_moves_current_receivables_to_overdue() {
        let projected = project(
            &baseline(),
            Adjustments {
                ar_delay_days: 15.0,
                ..Adjustments::default()
            },
        );
        assert!((projected.ar_overdue - 60_000.0).abs() < 1e-6);
        assert!((projected.cash_position - 260_000.0).abs() < 1e-6);
        assert!((projected.ar_overdue_ratio - 60.0).abs() < 1e-6);

        let capped = project(
            &baseline(),
            Adjustments {
                ar_delay_days: 90.0,
                ..Adjustments::default()
            },
        );
        assert!((capped.ar_overdue - 100_000.0).abs() < 1e-6);
    }

    #[test]
    fn outcomes_list_baseline_projection_and_delta() {
        let base = baseline();
        let outcomes = projected_outcomes(
            &project(&base, Adjustments::default()),
            &project(
                &base,
                Adjustments {
                    revenue_change_pct: -20.0,
                    ..Adjustments::default()
                },
            ),
        );

        let revenue = outcomes.iter().find(|o| o.metric == MONTHLY_REVENUE).unwrap();
        assert_eq!(revenue.baseline, 50_000.0);
        assert!((revenue.projected - 40_000.0).abs() < 1e-6);
        assert!((revenue.delta + 10_000.0).abs() < 1e-6);
        assert_eq!(revenue.truth_level, TruthLevel::Simulated);

        let runway = outcomes.iter().find(|o| o.metric == CASH_RUNWAY_DAYS).unwrap();
        assert!((runway.baseline - 900.0).abs() < 1e-6);
        assert!((runway.delta + 450.0).abs() < 1e-6);

        let costs = outcomes.iter().find(|o| o.metric == MONTHLY_COSTS).unwrap();
        assert_eq!(costs.delta, 0.0);

        let json = serde_json::to_value(&outcomes).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["metric"], CASH_POSITION);
    }

    #[test]
    fn runway_is_capped_when_not_burning() {
        assert_eq!(runway_days(10_000.0, 0.0), MAX_RUNWAY_DAYS);
        assert_eq!(runway_days(10_000.0, -5_000.0), MAX_RUNWAY_DAYS);
        assert_eq!(runway_days(1.0e12, 1.0), MAX_RUNWAY_DAYS);
        assert!((runway_days(30_000.0, 30_000.0) - 30.0).abs() < 1e-9);
    }

    #[test]
    fn typed_scenarios_require_their_assumption() {
        let request = ScenarioRequest {
            scenario_name: "Revenue drop".to_string(),
            scenario_type: ScenarioType::RevenueShock,
            description: None,
            assumptions: ScenarioAssumptions::default(),
        };
        assert!(Adjustments::for_request(&request).is_err());

        let pause = ScenarioRequest {
            scenario_type: ScenarioType::AutomationPause,
            ..request
        };
        assert!(Adjustments::for_request(&pause).unwrap().pause_automation);
    }

    #[test]
    fn typed_scenarios_ignore_unrelated_assumptions() {
        let request = ScenarioRequest {
            scenario_name: "Costs".to_string(),
            scenario_type: ScenarioType::CostInflation,
            description: None,
            assumptions: ScenarioAssumptions {
                cost_inflation_pct: Some(10.0),
                revenue_change_pct: Some(-50.0),
                ..ScenarioAssumptions::default()
            },
        };
        let adjustments = Adjustments::for_request(&request).unwrap();
        assert_eq!(adjustments.cost_inflation_pct, 10.0);
        assert_eq!(adjustments.revenue_change_pct, 0.0);
    }

    async fn projector() -> (ScenarioProjector, RiskAppetiteEngine, InMemoryCollaborators) {
        let fixture = InMemoryCollaborators::new();
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let engine = RiskAppetiteEngine::new(
            storage.clone(),
            fixture.collaborators(),
            Arc::new(MetricRegistry::with_builtin()),
            EngineConfig::default(),
        );
        let projector = ScenarioProjector::new(engine.clone(), fixture.data.clone(), storage);
        (projector, engine, fixture)
    }

    #[tokio::test]
    async fn scenario_breaches_are_simulated_and_isolated() {
        let (projector, engine, fixture) = projector().await;
        let today = Utc::now().date_naive();
        fixture
            .data
            .add_invoice(
                "t1",
                Invoice {
                    id: "inv-current".to_string(),
                    total_amount: 80_000.0,
                    paid_amount: 0.0,
                    status: InvoiceStatus::Open,
                    due_date: today + Duration::days(20),
                },
            )
            .await;
        fixture
            .data
            .add_invoice(
                "t1",
                Invoice {
                    id: "inv-late".to_string(),
                    total_amount: 20_000.0,
                    paid_amount: 0.0,
                    status: InvoiceStatus::Open,
                    due_date: today - Duration::days(10),
                },
            )
            .await;
        fixture
            .data
            .add_exception(
                "t1",
                OperationalException {
                    id: "ex-late".to_string(),
                    exception_type: AR_OVERDUE_EXCEPTION.to_string(),
                    status: ExceptionStatus::Open,
                    impact_amount: 20_000.0,
                    created_at: Utc::now(),
                },
            )
            .await;
        fixture
            .data
            .set_financials(
                "t1",
                MonthlyFinancials {
                    revenue: 50_000.0,
                    costs: 60_000.0,
                },
            )
            .await;
        engine
            .ledger()
            .append(
                "t1",
                ObservationDraft::settled(CASH_POSITION, 300_000.0, Authority::Bank)
                    .with_derived_from(DerivedFrom::default().with_evidence("stmt-2025-06")),
            )
            .await
            .unwrap();

        let draft = engine
            .appetites()
            .create_draft(
                "t1",
                AppetiteDraft {
                    name: "FY26".to_string(),
                    description: None,
                    rules: vec![
                        RuleDraft::new(
                            AR_OVERDUE_RATIO,
                            ComparisonOperator::Gt,
                            40.0,
                            Severity::High,
                            BreachAction::RequireApproval,
                        )
                        .in_domain("collections"),
                        RuleDraft::new(
                            CASH_RUNWAY_DAYS,
                            ComparisonOperator::Lt,
                            90.0,
                            Severity::Critical,
                            BreachAction::EscalateToBoard,
                        ),
                    ],
                },
            )
            .await
            .unwrap();
        engine.appetites().activate("t1", &draft.id, "board").await.unwrap();
        let observations_before = engine.ledger().count("t1").await.unwrap();

        let result = projector
            .simulate(
                "t1",
                ScenarioRequest {
                    scenario_name: "Collections slip".to_string(),
                    scenario_type: ScenarioType::ArDelay,
                    description: None,
                    assumptions: ScenarioAssumptions {
                        ar_delay_days: Some(30.0),
                        ..ScenarioAssumptions::default()
                    },
                },
                "cfo",
            )
            .await
            .unwrap();

        assert!(result.is_simulation);
        assert_eq!(result.truth_level, TruthLevel::Simulated);
        assert_eq!(result.baseline.ar_overdue, 20_000.0);
        let ratio = result
            .projected_outcomes
            .iter()
            .find(|o| o.metric == AR_OVERDUE_RATIO)
            .unwrap();
        assert!((ratio.baseline - 20.0).abs() < 1e-6);
        assert!((ratio.projected - 100.0).abs() < 1e-6);
        assert!((ratio.delta - 80.0).abs() < 1e-6);
        assert_eq!(result.risk_breaches.len(), 1);
        assert_eq!(result.risk_breaches[0].metric_code, AR_OVERDUE_RATIO);
        assert_eq!(result.risk_breaches[0].truth_level, TruthLevel::Simulated);
        assert_eq!(
            result.control_impacts.approval_required_domains,
            vec!["collections".to_string()]
        );
        assert!(!result.control_impacts.board_escalation);

        assert_eq!(engine.ledger().count("t1").await.unwrap(), observations_before);
        assert_eq!(engine.recorder().count("t1").await.unwrap(), 0);
        assert!(fixture.alerts.alerts("t1").await.is_empty());
    }

    #[tokio::test]
    async fn archive_hides_from_default_listing() {
        let (projector, _, _) = projector().await;
        let result = projector
            .simulate(
                "t1",
                ScenarioRequest {
                    scenario_name: "Pause".to_string(),
                    scenario_type: ScenarioType::AutomationPause,
                    description: None,
                    assumptions: ScenarioAssumptions::default(),
                },
                "cfo",
            )
            .await
            .unwrap();
        assert!(result.control_impacts.automation_paused);
        let auto = result
            .projected_outcomes
            .iter()
            .find(|o| o.metric == AUTO_MATCH_RATE)
            .unwrap();
        assert_eq!(auto.projected, 0.0);

        // Empty books project to positive zeros.
        let json = serde_json::to_string(&result.projected_outcomes).unwrap();
        assert!(!json.contains("-0.0"));

        let archived = projector.archive("t1", &result.scenario_id).await.unwrap();
        assert!(archived.is_archived);
        assert!(projector.list("t1", false).await.unwrap().is_empty());
        assert_eq!(projector.list("t1", true).await.unwrap().len(), 1);
        assert!(projector.archive("t2", &result.scenario_id).await.is_err());
    }

    #[tokio::test]
    async fn neutral_custom_scenario_matches_live_overdue_ratio() {
        let (projector, engine, fixture) = projector().await;
        let today = Utc::now().date_naive();
        for (id, amount, due) in [
            ("inv-a", 600.0, today - Duration::days(5)),
            ("inv-b", 400.0, today + Duration::days(5)),
        ] {
            fixture
                .data
                .add_invoice(
                    "t1",
                    Invoice {
                        id: id.to_string(),
                        total_amount: amount,
                        paid_amount: 0.0,
                        status: InvoiceStatus::Open,
                        due_date: due,
                    },
                )
                .await;
        }
        fixture
            .data
            .add_exception(
                "t1",
                OperationalException {
                    id: "ex-a".to_string(),
                    exception_type: AR_OVERDUE_EXCEPTION.to_string(),
                    status: ExceptionStatus::Open,
                    impact_amount: 150.0,
                    created_at: Utc::now(),
                },
            )
            .await;

        let live = engine
            .resolver()
            .try_resolve("t1", AR_OVERDUE_RATIO)
            .await
            .unwrap()
            .value;
        let result = projector
            .simulate(
                "t1",
                ScenarioRequest {
                    scenario_name: "Status quo".to_string(),
                    scenario_type: ScenarioType::Custom,
                    description: None,
                    assumptions: ScenarioAssumptions::default(),
                },
                "cfo",
            )
            .await
            .unwrap();

        let ratio = result
            .projected_outcomes
            .iter()
            .find(|o| o.metric == AR_OVERDUE_RATIO)
            .unwrap();
        assert!((live - 15.0).abs() < 1e-9);
        assert!((ratio.baseline - live).abs() < 1e-9);
        assert!((ratio.projected - live).abs() < 1e-9);
        assert!(result.projected_outcomes.iter().all(|o| o.delta == 0.0));
    }
}
