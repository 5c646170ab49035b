use appetite_core::collaborators::{
    Alert, AlertSink, AuditEvent, AuditSink, AutomationFlags, FlagStore, Invoice, MlPerformance,
    MonthlyFinancials, OperationalData, OperationalException, ReconciliationOutcome,
};
use appetite_core::error::{AppetiteError, AppetiteResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Deterministic failing collaborator useful for chaos testing.
///
/// Implements every collaborator trait; each call fails with the configured reason.
#[derive(Debug, Clone)]
pub struct AlwaysFailCollaborator {
    name: &'static str,
    reason: String,
}

impl AlwaysFailCollaborator {
    pub fn new(name: &'static str, reason: impl Into<String>) -> Self {
        Self {
            name,
            reason: reason.into(),
        }
    }

    fn fail<T>(&self) -> AppetiteResult<T> {
        Err(AppetiteError::Collaborator(format!(
            "{}: {}",
            self.name, self.reason
        )))
    }
}

#[async_trait]
impl AlertSink for AlwaysFailCollaborator {
    async fn create_alert(&self, _alert: Alert) -> AppetiteResult<()> {
        self.fail()
    }
}

#[async_trait]
impl AuditSink for AlwaysFailCollaborator {
    async fn record(&self, _event: AuditEvent) -> AppetiteResult<()> {
        self.fail()
    }
}

#[async_trait]
impl FlagStore for AlwaysFailCollaborator {
    async fn get_flags(&self, _tenant_id: &str) -> AppetiteResult<AutomationFlags> {
        self.fail()
    }

    async fn put_flags(&self, _tenant_id: &str, _flags: AutomationFlags) -> AppetiteResult<()> {
        self.fail()
    }
}

#[async_trait]
impl OperationalData for AlwaysFailCollaborator {
    async fn open_invoices(&self, _tenant_id: &str) -> AppetiteResult<Vec<Invoice>> {
        self.fail()
    }

    async fn open_exceptions(&self, _tenant_id: &str) -> AppetiteResult<Vec<OperationalException>> {
        self.fail()
    }

    async fn reconciliation_outcomes(
        &self,
        _tenant_id: &str,
        _since: DateTime<Utc>,
    ) -> AppetiteResult<Vec<ReconciliationOutcome>> {
        self.fail()
    }

    async fn latest_ml_performance(
        &self,
        _tenant_id: &str,
    ) -> AppetiteResult<Option<MlPerformance>> {
        self.fail()
    }

    async fn monthly_financials(&self, _tenant_id: &str) -> AppetiteResult<MonthlyFinancials> {
        self.fail()
    }
}
