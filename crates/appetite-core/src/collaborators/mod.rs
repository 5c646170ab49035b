//! Systems the engine reads from and acts on.
//!
//! These are consumed as plain data sources and sinks. The engine only depends
//! on the traits here; implementations live in [`memory`] and in the adapters crate.

pub mod memory;

use crate::error::AppetiteResult;
use crate::types::Severity;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub use memory::{
    InMemoryAlertSink, InMemoryAuditSink, InMemoryCollaborators, InMemoryFlagStore,
    InMemoryOperationalData,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Open,
    Paid,
    Void,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: String,
    pub total_amount: f64,
    #[serde(default)]
    pub paid_amount: f64,
    pub status: InvoiceStatus,
    pub due_date: NaiveDate,
}

impl Invoice {
    pub fn outstanding(&self) -> f64 {
        (self.total_amount - self.paid_amount).max(0.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExceptionStatus {
    Open,
    Resolved,
}

pub const AR_OVERDUE_EXCEPTION: &str = "AR_OVERDUE";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperationalException {
    pub id: String,
    pub exception_type: String,
    pub status: ExceptionStatus,
    #[serde(default)]
    pub impact_amount: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationDecision {
    AutoConfirmed,
    FalseAuto,
    ManualMatch,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationOutcome {
    pub id: String,
    pub outcome: ReconciliationDecision,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MlPerformance {
    pub model_name: String,
    /// Fraction in `0..=1`.
    pub accuracy: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyFinancials {
    pub revenue: f64,
    pub costs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub tenant_id: String,
    pub alert_type: String,
    pub severity: Severity,
    pub priority: u8,
    pub title: String,
    pub message: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: String,
    pub tenant_id: String,
    pub event_type: String,
    pub actor: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MlStatus {
    Active,
    Disabled,
}

/// Tenant automation switches the dispatcher flips.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutomationFlags {
    pub auto_reconciliation_enabled: bool,
    pub ml_enabled: bool,
    pub ml_status: MlStatus,
    #[serde(default)]
    pub fallback_reason: Option<String>,
    #[serde(default)]
    pub fallback_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub approval_gated_domains: Vec<String>,
}

impl Default for AutomationFlags {
    fn default() -> Self {
        Self {
            auto_reconciliation_enabled: true,
            ml_enabled: true,
            ml_status: MlStatus::Active,
            fallback_reason: None,
            fallback_at: None,
            approval_gated_domains: Vec::new(),
        }
    }
}

/// Read-only operational records used by metric recipes.
#[async_trait]
pub trait OperationalData: Send + Sync {
    async fn open_invoices(&self, tenant_id: &str) -> AppetiteResult<Vec<Invoice>>;

    async fn open_exceptions(&self, tenant_id: &str) -> AppetiteResult<Vec<OperationalException>>;

    async fn reconciliation_outcomes(
        &self,
        tenant_id: &str,
        since: DateTime<Utc>,
    ) -> AppetiteResult<Vec<ReconciliationOutcome>>;

    async fn latest_ml_performance(&self, tenant_id: &str)
        -> AppetiteResult<Option<MlPerformance>>;

    async fn monthly_financials(&self, tenant_id: &str) -> AppetiteResult<MonthlyFinancials>;
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn create_alert(&self, alert: Alert) -> AppetiteResult<()>;
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> AppetiteResult<()>;
}

#[async_trait]
pub trait FlagStore: Send + Sync {
    async fn get_flags(&self, tenant_id: &str) -> AppetiteResult<AutomationFlags>;

    async fn put_flags(&self, tenant_id: &str, flags: AutomationFlags) -> AppetiteResult<()>;
}

/// Handles to every external system, cloned into each component.
#[derive(Clone)]
pub struct Collaborators {
    pub data: Arc<dyn OperationalData>,
    pub alerts: Arc<dyn AlertSink>,
    pub audit: Arc<dyn AuditSink>,
    pub flags: Arc<dyn FlagStore>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outstanding_never_negative() {
        let invoice = Invoice {
            id: "inv-1".to_string(),
            total_amount: 100.0,
            paid_amount: 150.0,
            status: InvoiceStatus::Paid,
            due_date: NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
        };
        assert_eq!(invoice.outstanding(), 0.0);
    }

    #[test]
    fn flags_wire_format() {
        let value = serde_json::to_value(AutomationFlags::default()).unwrap();
        assert_eq!(value["mlStatus"], "ACTIVE");
        assert_eq!(value["autoReconciliationEnabled"], true);
        assert_eq!(
            serde_json::to_value(ReconciliationDecision::FalseAuto).unwrap(),
            "false_auto"
        );
    }
}
