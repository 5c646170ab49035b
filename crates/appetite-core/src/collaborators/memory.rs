//! In-process collaborators for development, fixtures and tests.

use super::*;
use crate::error::AppetiteError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Default, Clone)]
struct TenantBook {
    invoices: Vec<Invoice>,
    exceptions: Vec<OperationalException>,
    outcomes: Vec<ReconciliationOutcome>,
    ml_performance: Vec<MlPerformance>,
    financials: MonthlyFinancials,
}

#[derive(Debug, Default)]
pub struct InMemoryOperationalData {
    books: RwLock<HashMap<String, TenantBook>>,
    unavailable: AtomicBool,
}

impl InMemoryOperationalData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every query fail, as an unreachable source system would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> AppetiteResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppetiteError::Collaborator(
                "operational data source unavailable".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn add_invoice(&self, tenant_id: &str, invoice: Invoice) {
        let mut books = self.books.write().await;
        books.entry(tenant_id.to_string()).or_default().invoices.push(invoice);
    }

    pub async fn add_exception(&self, tenant_id: &str, exception: OperationalException) {
        let mut books = self.books.write().await;
        books
            .entry(tenant_id.to_string())
            .or_default()
            .exceptions
            .push(exception);
    }

    pub async fn add_outcome(&self, tenant_id: &str, outcome: ReconciliationOutcome) {
        let mut books = self.books.write().await;
        books.entry(tenant_id.to_string()).or_default().outcomes.push(outcome);
    }

    pub async fn add_ml_performance(&self, tenant_id: &str, performance: MlPerformance) {
        let mut books = self.books.write().await;
        books
            .entry(tenant_id.to_string())
            .or_default()
            .ml_performance
            .push(performance);
    }

    pub async fn set_financials(&self, tenant_id: &str, financials: MonthlyFinancials) {
        let mut books = self.books.write().await;
        books.entry(tenant_id.to_string()).or_default().financials = financials;
    }

    async fn book(&self, tenant_id: &str) -> AppetiteResult<TenantBook> {
        self.check_available()?;
        let books = self.books.read().await;
        Ok(books.get(tenant_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl OperationalData for InMemoryOperationalData {
    async fn open_invoices(&self, tenant_id: &str) -> AppetiteResult<Vec<Invoice>> {
        let book = self.book(tenant_id).await?;
        Ok(book
            .invoices
            .into_iter()
            .filter(|i| i.status == InvoiceStatus::Open)
            .collect())
    }

    async fn open_exceptions(&self, tenant_id: &str) -> AppetiteResult<Vec<OperationalException>> {
        let book = self.book(tenant_id).await?;
        Ok(book
            .exceptions
            .into_iter()
            .filter(|e| e.status == ExceptionStatus::Open)
            .collect())
    }

    async fn reconciliation_outcomes(
        &self,
        tenant_id: &str,
        since: DateTime<Utc>,
    ) -> AppetiteResult<Vec<ReconciliationOutcome>> {
        let book = self.book(tenant_id).await?;
        Ok(book
            .outcomes
            .into_iter()
            .filter(|o| o.decided_at >= since)
            .collect())
    }

    async fn latest_ml_performance(
        &self,
        tenant_id: &str,
    ) -> AppetiteResult<Option<MlPerformance>> {
        let book = self.book(tenant_id).await?;
        Ok(book
            .ml_performance
            .into_iter()
            .max_by_key(|p| p.recorded_at))
    }

    async fn monthly_financials(&self, tenant_id: &str) -> AppetiteResult<MonthlyFinancials> {
        Ok(self.book(tenant_id).await?.financials)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryAlertSink {
    alerts: RwLock<Vec<Alert>>,
}

impl InMemoryAlertSink {
    pub async fn alerts(&self, tenant_id: &str) -> Vec<Alert> {
        let alerts = self.alerts.read().await;
        alerts.iter().filter(|a| a.tenant_id == tenant_id).cloned().collect()
    }
}

#[async_trait]
impl AlertSink for InMemoryAlertSink {
    async fn create_alert(&self, alert: Alert) -> AppetiteResult<()> {
        self.alerts.write().await.push(alert);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    events: RwLock<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub async fn events(&self, tenant_id: &str) -> Vec<AuditEvent> {
        let events = self.events.read().await;
        events.iter().filter(|e| e.tenant_id == tenant_id).cloned().collect()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, event: AuditEvent) -> AppetiteResult<()> {
        self.events.write().await.push(event);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryFlagStore {
    flags: RwLock<HashMap<String, AutomationFlags>>,
}

#[async_trait]
impl FlagStore for InMemoryFlagStore {
    async fn get_flags(&self, tenant_id: &str) -> AppetiteResult<AutomationFlags> {
        let flags = self.flags.read().await;
        Ok(flags.get(tenant_id).cloned().unwrap_or_default())
    }

    async fn put_flags(&self, tenant_id: &str, flags: AutomationFlags) -> AppetiteResult<()> {
        self.flags.write().await.insert(tenant_id.to_string(), flags);
        Ok(())
    }
}

/// Concrete in-memory collaborators, kept typed so callers can seed and inspect them.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCollaborators {
    pub data: Arc<InMemoryOperationalData>,
    pub alerts: Arc<InMemoryAlertSink>,
    pub audit: Arc<InMemoryAuditSink>,
    pub flags: Arc<InMemoryFlagStore>,
}

impl InMemoryCollaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            data: self.data.clone(),
            alerts: self.alerts.clone(),
            audit: self.audit.clone(),
            flags: self.flags.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn queries_are_tenant_scoped_and_filtered() {
        let data = InMemoryOperationalData::new();
        let now = Utc::now();
        data.add_outcome(
            "t1",
            ReconciliationOutcome {
                id: "o1".to_string(),
                outcome: ReconciliationDecision::AutoConfirmed,
                decided_at: now,
            },
        )
        .await;
        data.add_outcome(
            "t1",
            ReconciliationOutcome {
                id: "o2".to_string(),
                outcome: ReconciliationDecision::FalseAuto,
                decided_at: now - Duration::days(45),
            },
        )
        .await;

        let recent = data
            .reconciliation_outcomes("t1", now - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert!(data
            .reconciliation_outcomes("t2", now - Duration::days(30))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn unavailable_source_fails_queries() {
        let data = InMemoryOperationalData::new();
        data.set_unavailable(true);
        assert!(data.open_invoices("t1").await.is_err());
        data.set_unavailable(false);
        assert!(data.open_invoices("t1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn flags_default_until_written() {
        let store = InMemoryFlagStore::default();
        let mut flags = store.get_flags("t1").await.unwrap();
        assert!(flags.auto_reconciliation_enabled);
        flags.auto_reconciliation_enabled = false;
        store.put_flags("t1", flags).await.unwrap();
        assert!(!store.get_flags("t1").await.unwrap().auto_reconciliation_enabled);
        assert!(store.get_flags("t2").await.unwrap().auto_reconciliation_enabled);
    }
}
