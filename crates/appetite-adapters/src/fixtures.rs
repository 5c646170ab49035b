//! JSON fixtures that seed in-memory collaborators for local runs and demos.
//!
//! ```json
//! {
//!   "tenants": {
//!     "acme": {
//!       "invoices": [{"id": "inv-1", "totalAmount": 1000, "status": "open", "dueDate": "2025-07-01"}],
//!       "outcomes": [{"outcome": "auto_confirmed", "count": 90}, {"outcome": "false_auto", "count": 4}],
//!       "financials": {"revenue": 120000, "costs": 135000}
//!     }
//!   }
//! }
//! ```

use appetite_core::collaborators::{
    AutomationFlags, FlagStore, InMemoryCollaborators, Invoice, MlPerformance, MonthlyFinancials,
    OperationalException, ReconciliationDecision, ReconciliationOutcome,
};
use appetite_core::error::{AppetiteError, AppetiteResult};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

/// A batch of identical outcomes decided `days_ago` days before seeding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeBatch {
    pub outcome: ReconciliationDecision,
    #[serde(default = "default_count")]
    pub count: usize,
    #[serde(default)]
    pub days_ago: i64,
}

fn default_count() -> usize {
    1
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantFixture {
    #[serde(default)]
    pub invoices: Vec<Invoice>,
    #[serde(default)]
    pub exceptions: Vec<OperationalException>,
    #[serde(default)]
    pub outcomes: Vec<OutcomeBatch>,
    #[serde(default)]
    pub ml_performance: Vec<MlPerformance>,
    #[serde(default)]
    pub financials: Option<MonthlyFinancials>,
    #[serde(default)]
    pub flags: Option<AutomationFlags>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureSet {
    #[serde(default)]
    pub tenants: BTreeMap<String, TenantFixture>,
}

impl FixtureSet {
    pub fn from_json(raw: &str) -> AppetiteResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| AppetiteError::Serialization(format!("invalid fixture file: {e}")))
    }

    pub fn load(path: &std::path::Path) -> AppetiteResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppetiteError::Collaborator(format!("cannot read fixtures {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    /// Load every tenant's records into the in-memory collaborators.
    pub async fn seed(&self, target: &InMemoryCollaborators) -> AppetiteResult<()> {
        let now = Utc::now();
        for (tenant_id, fixture) in &self.tenants {
            for invoice in &fixture.invoices {
                target.data.add_invoice(tenant_id, invoice.clone()).await;
            }
            for exception in &fixture.exceptions {
                target.data.add_exception(tenant_id, exception.clone()).await;
            }
            for batch in &fixture.outcomes {
                let decided_at = now - Duration::days(batch.days_ago.max(0));
                for _ in 0..batch.count {
                    target
                        .data
                        .add_outcome(
                            tenant_id,
                            ReconciliationOutcome {
                                id: Uuid::new_v4().to_string(),
                                outcome: batch.outcome,
                                decided_at,
                            },
                        )
                        .await;
                }
            }
            for performance in &fixture.ml_performance {
                target
                    .data
                    .add_ml_performance(tenant_id, performance.clone())
                    .await;
            }
            if let Some(financials) = fixture.financials {
                target.data.set_financials(tenant_id, financials).await;
            }
            if let Some(flags) = &fixture.flags {
                target.flags.put_flags(tenant_id, flags.clone()).await?;
            }
            info!(
                tenant_id = %tenant_id,
                invoices = fixture.invoices.len(),
                exceptions = fixture.exceptions.len(),
                "Seeded collaborator fixtures"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appetite_core::collaborators::OperationalData;

    const FIXTURE: &str = r#"{
        "tenants": {
            "acme": {
                "invoices": [
                    {"id": "inv-1", "totalAmount": 1000, "paidAmount": 250, "status": "open", "dueDate": "2025-07-01"}
                ],
                "exceptions": [
                    {"id": "ex-1", "exceptionType": "AR_OVERDUE", "status": "open", "impactAmount": 300, "createdAt": "2025-07-10T00:00:00Z"}
                ],
                "outcomes": [
                    {"outcome": "auto_confirmed", "count": 9},
                    {"outcome": "false_auto", "count": 1, "daysAgo": 3},
                    {"outcome": "manual_match", "count": 5, "daysAgo": 90}
                ],
                "financials": {"revenue": 120000, "costs": 135000},
                "flags": {"autoReconciliationEnabled": false, "mlEnabled": true, "mlStatus": "ACTIVE"}
            }
        }
    }"#;

    #[tokio::test]
    async fn seeds_tenant_records() {
        let fixtures = FixtureSet::from_json(FIXTURE).unwrap();
        let target = InMemoryCollaborators::new();
        fixtures.seed(&target).await.unwrap();

        assert_eq!(target.data.open_invoices("acme").await.unwrap().len(), 1);
        assert_eq!(target.data.open_exceptions("acme").await.unwrap().len(), 1);
        let recent = target
            .data
            .reconciliation_outcomes("acme", Utc::now() - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(recent.len(), 10);
        assert_eq!(
            target.data.monthly_financials("acme").await.unwrap().costs,
            135_000.0
        );
        assert!(!target.flags.get_flags("acme").await.unwrap().auto_reconciliation_enabled);
    }

    #[test]
    fn rejects_malformed_fixture() {
        let err = FixtureSet::from_json(r#"{"tenants": {"acme": {"invoices": [{"id": 1}]}}}"#)
            .unwrap_err();
        assert!(matches!(err, AppetiteError::Serialization(_)));
    }
}
