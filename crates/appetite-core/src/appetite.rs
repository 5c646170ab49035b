//! Board-approved risk appetites and their governance transitions.

use crate::error::{AppetiteError, AppetiteResult};
use crate::storage::Storage;
use crate::types::{AppetiteStatus, BreachAction, ComparisonOperator, Severity};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// One threshold rule of an appetite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RiskAppetiteRule {
    pub id: String,
    pub metric_code: String,
    pub metric_label: String,
    pub risk_domain: String,
    pub operator: ComparisonOperator,
    pub threshold: f64,
    pub unit: String,
    pub severity: Severity,
    pub action_on_breach: BreachAction,
    pub is_enabled: bool,
}

impl RiskAppetiteRule {
    pub fn describe(&self) -> String {
        format!(
            "{} {} {}{}",
            self.metric_label, self.operator, self.threshold, self.unit
        )
    }
}

/// Rule as submitted for a new draft.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDraft {
    pub metric_code: String,
    #[serde(default)]
    pub metric_label: Option<String>,
    #[serde(default = "default_risk_domain")]
    pub risk_domain: String,
    pub operator: ComparisonOperator,
    pub threshold: f64,
    #[serde(default)]
    pub unit: String,
    pub severity: Severity,
    pub action_on_breach: BreachAction,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
}

fn default_risk_domain() -> String {
    "general".to_string()
}

fn default_enabled() -> bool {
    true
}

impl RuleDraft {
    pub fn new(
        metric_code: impl Into<String>,
        operator: ComparisonOperator,
        threshold: f64,
        severity: Severity,
        action_on_breach: BreachAction,
    ) -> Self {
        Self {
            metric_code: metric_code.into(),
            metric_label: None,
            risk_domain: default_risk_domain(),
            operator,
            threshold,
            unit: String::new(),
            severity,
            action_on_breach,
            is_enabled: true,
        }
    }

    pub fn in_domain(mut self, risk_domain: impl Into<String>) -> Self {
        self.risk_domain = risk_domain.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.is_enabled = false;
        self
    }

    fn into_rule(self) -> AppetiteResult<RiskAppetiteRule> {
        let metric_code = self.metric_code.trim().to_string();
        if metric_code.is_empty() {
            return Err(AppetiteError::validation("rule metricCode is required"));
        }
        if !self.threshold.is_finite() {
            return Err(AppetiteError::validation(format!(
                "rule '{metric_code}' threshold must be a finite number"
            )));
        }
        if self.risk_domain.trim().is_empty() {
            return Err(AppetiteError::validation(format!(
                "rule '{metric_code}' riskDomain must not be empty"
            )));
        }

        Ok(RiskAppetiteRule {
            id: Uuid::new_v4().to_string(),
            metric_label: self
                .metric_label
                .filter(|label| !label.trim().is_empty())
                .unwrap_or_else(|| metric_code.clone()),
            metric_code,
            risk_domain: self.risk_domain,
            operator: self.operator,
            threshold: self.threshold,
            unit: self.unit,
            severity: self.severity,
            action_on_breach: self.action_on_breach,
            is_enabled: self.is_enabled,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppetiteDraft {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub rules: Vec<RuleDraft>,
}

/// A versioned set of rules. At most one is active per tenant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RiskAppetite {
    pub id: String,
    pub tenant_id: String,
    pub version: u32,
    pub name: String,
    pub description: Option<String>,
    pub status: AppetiteStatus,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub rules: Vec<RiskAppetiteRule>,
}

impl RiskAppetite {
    pub fn enabled_rules(&self) -> impl Iterator<Item = &RiskAppetiteRule> {
        self.rules.iter().filter(|rule| rule.is_enabled)
    }

    pub fn is_active(&self) -> bool {
        self.status == AppetiteStatus::Active
    }
}

/// Governance operations over stored appetites.
#[derive(Clone)]
pub struct AppetiteRegistry {
    storage: Arc<dyn Storage>,
}

impl AppetiteRegistry {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Create a draft. The storage layer assigns the next version for the tenant.
    pub async fn create_draft(
        &self,
        tenant_id: &str,
        draft: AppetiteDraft,
    ) -> AppetiteResult<RiskAppetite> {
        let name = draft.name.trim().to_string();
        if name.is_empty() {
            return Err(AppetiteError::validation("appetite name is required"));
        }
        let rules = draft
            .rules
            .into_iter()
            .map(RuleDraft::into_rule)
            .collect::<AppetiteResult<Vec<_>>>()?;

        let appetite = RiskAppetite {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            version: 0,
            name,
            description: draft.description,
            status: AppetiteStatus::Draft,
            approved_by: None,
            approved_at: None,
            created_at: Utc::now().trunc_subsecs(6),
            rules,
        };

        let stored = self.storage.insert_appetite(appetite).await?;
        info!(
            tenant_id,
            appetite_id = %stored.id,
            version = stored.version,
            rules = stored.rules.len(),
            "Created risk appetite draft"
        );
        Ok(stored)
    }

    /// Activate `appetite_id`, archiving the previously active appetite in the same step.
    pub async fn activate(
        &self,
        tenant_id: &str,
        appetite_id: &str,
        approved_by: &str,
    ) -> AppetiteResult<RiskAppetite> {
        let activated = self
            .storage
            .activate_appetite(tenant_id, appetite_id, approved_by, Utc::now().trunc_subsecs(6))
            .await?;
        info!(
            tenant_id,
            appetite_id,
            version = activated.version,
            approved_by,
            "Activated risk appetite"
        );
        Ok(activated)
    }

    pub async fn active(&self, tenant_id: &str) -> AppetiteResult<Option<RiskAppetite>> {
        self.storage.active_appetite(tenant_id).await
    }

    pub async fn get(&self, tenant_id: &str, appetite_id: &str) -> AppetiteResult<RiskAppetite> {
        self.storage
            .get_appetite(tenant_id, appetite_id)
            .await?
            .ok_or_else(|| AppetiteError::NotFound(format!("risk appetite '{appetite_id}'")))
    }

    pub async fn list(&self, tenant_id: &str) -> AppetiteResult<Vec<RiskAppetite>> {
        self.storage.list_appetites(tenant_id).await
    }

    /// Tenants that currently have an active appetite.
    pub async fn active_tenants(&self) -> AppetiteResult<Vec<String>> {
        self.storage.tenants_with_active_appetite().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;

    fn registry() -> AppetiteRegistry {
        AppetiteRegistry::new(Arc::new(InMemoryStorage::new()))
    }

    fn draft(name: &str) -> AppetiteDraft {
        AppetiteDraft {
            name: name.to_string(),
            description: None,
            rules: vec![RuleDraft::new(
                "ar_overdue_ratio",
                ComparisonOperator::Gt,
                20.0,
                Severity::High,
                BreachAction::Alert,
            )],
        }
    }

    #[tokio::test]
    async fn drafts_get_monotonic_versions() {
        let registry = registry();
        let first = registry.create_draft("t1", draft("FY25")).await.unwrap();
        let second = registry.create_draft("t1", draft("FY26")).await.unwrap();
        let other = registry.create_draft("t2", draft("FY26")).await.unwrap();

        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(other.version, 1);
        assert_eq!(first.status, AppetiteStatus::Draft);
        assert_eq!(first.rules[0].metric_label, "ar_overdue_ratio");
    }

    #[tokio::test]
    async fn activation_archives_previous_active() {
        let registry = registry();
        let first = registry.create_draft("t1", draft("FY25")).await.unwrap();
        let second = registry.create_draft("t1", draft("FY26")).await.unwrap();

        registry.activate("t1", &first.id, "cfo").await.unwrap();
        let activated = registry.activate("t1", &second.id, "board").await.unwrap();
        assert_eq!(activated.approved_by.as_deref(), Some("board"));

        let all = registry.list("t1").await.unwrap();
        let active: Vec<_> = all.iter().filter(|a| a.is_active()).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.id);
        assert_eq!(
            registry.get("t1", &first.id).await.unwrap().status,
            AppetiteStatus::Archived
        );
    }

    #[tokio::test]
    async fn archived_appetite_cannot_be_reactivated() {
        let registry = registry();
        let first = registry.create_draft("t1", draft("FY25")).await.unwrap();
        let second = registry.create_draft("t1", draft("FY26")).await.unwrap();
        registry.activate("t1", &first.id, "cfo").await.unwrap();
        registry.activate("t1", &second.id, "cfo").await.unwrap();

        let err = registry.activate("t1", &first.id, "cfo").await.unwrap_err();
        assert!(matches!(err, AppetiteError::Validation(_)));
    }

    #[tokio::test]
    async fn activation_is_tenant_scoped() {
        let registry = registry();
        let appetite = registry.create_draft("t1", draft("FY25")).await.unwrap();
        let err = registry.activate("t2", &appetite.id, "cfo").await.unwrap_err();
        assert!(matches!(err, AppetiteError::NotFound(_)));
        assert!(registry.active("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_blank_names_and_non_finite_thresholds() {
        let registry = registry();
        assert!(registry.create_draft("t1", draft("  ")).await.is_err());

        let mut bad = draft("FY25");
        bad.rules[0].threshold = f64::NAN;
        assert!(registry.create_draft("t1", bad).await.is_err());
        assert!(registry.list("t1").await.unwrap().is_empty());
    }
}
