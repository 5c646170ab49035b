//! PostgreSQL-backed collaborators.
//!
//! Operational tables are owned by upstream systems; `ensure_schema` only
//! creates them when missing so a fresh development database works.

use appetite_core::collaborators::{
    Alert, AlertSink, AuditEvent, AuditSink, AutomationFlags, ExceptionStatus, FlagStore, Invoice,
    InvoiceStatus, MlPerformance, MonthlyFinancials, OperationalData, OperationalException,
    ReconciliationDecision, ReconciliationOutcome,
};
use appetite_core::error::{AppetiteError, AppetiteResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

#[derive(Debug, Clone)]
pub struct PgCollaborators {
    pool: PgPool,
}

impl PgCollaborators {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> AppetiteResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| AppetiteError::Collaborator(format!("postgres connect failed: {e}")))?;
        Ok(Self { pool })
    }

    pub async fn ensure_schema(&self) -> AppetiteResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS invoices (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                total_amount DOUBLE PRECISION NOT NULL,
                paid_amount DOUBLE PRECISION NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                due_date DATE NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS operational_exceptions (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                exception_type TEXT NOT NULL,
                status TEXT NOT NULL,
                impact_amount DOUBLE PRECISION NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS reconciliation_outcomes (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                outcome TEXT NOT NULL,
                decided_at TIMESTAMPTZ NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS reconciliation_outcomes_recent ON reconciliation_outcomes(tenant_id, decided_at DESC);"#,
            r#"
            CREATE TABLE IF NOT EXISTS ml_model_performance (
                tenant_id TEXT NOT NULL,
                model_name TEXT NOT NULL,
                accuracy DOUBLE PRECISION NOT NULL,
                recorded_at TIMESTAMPTZ NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS monthly_financials (
                tenant_id TEXT NOT NULL,
                month DATE NOT NULL,
                revenue DOUBLE PRECISION NOT NULL,
                costs DOUBLE PRECISION NOT NULL,
                PRIMARY KEY (tenant_id, month)
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                alert_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                priority SMALLINT NOT NULL,
                title TEXT NOT NULL,
                message TEXT NOT NULL,
                metadata JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS audit_events (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                actor TEXT NOT NULL,
                payload JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS automation_flags (
                tenant_id TEXT PRIMARY KEY,
                data JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );
            "#,
        ];

        for stmt in statements {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
        }
        Ok(())
    }
}

fn db_error(e: sqlx::Error) -> AppetiteError {
    AppetiteError::Collaborator(e.to_string())
}

fn invoice_status(value: &str) -> AppetiteResult<InvoiceStatus> {
    match value {
        "open" => Ok(InvoiceStatus::Open),
        "paid" => Ok(InvoiceStatus::Paid),
        "void" => Ok(InvoiceStatus::Void),
        other => Err(AppetiteError::Collaborator(format!(
            "unknown invoice status '{other}'"
        ))),
    }
}

fn decision(value: &str) -> AppetiteResult<ReconciliationDecision> {
    match value {
        "auto_confirmed" => Ok(ReconciliationDecision::AutoConfirmed),
        "false_auto" => Ok(ReconciliationDecision::FalseAuto),
        "manual_match" => Ok(ReconciliationDecision::ManualMatch),
        "rejected" => Ok(ReconciliationDecision::Rejected),
        other => Err(AppetiteError::Collaborator(format!(
            "unknown reconciliation outcome '{other}'"
        ))),
    }
}

fn invoice_from_row(row: &PgRow) -> AppetiteResult<Invoice> {
    let status: String = row.try_get("status").map_err(db_error)?;
    Ok(Invoice {
        id: row.try_get("id").map_err(db_error)?,
        total_amount: row.try_get("total_amount").map_err(db_error)?,
        paid_amount: row.try_get("paid_amount").map_err(db_error)?,
        status: invoice_status(&status)?,
        due_date: row.try_get("due_date").map_err(db_error)?,
    })
}

#[async_trait]
impl OperationalData for PgCollaborators {
    async fn open_invoices(&self, tenant_id: &str) -> AppetiteResult<Vec<Invoice>> {
        let rows = sqlx::query(
            r#"
            SELECT id, total_amount, paid_amount, status, due_date
            FROM invoices
            WHERE tenant_id = $1 AND status = 'open'
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        rows.iter().map(invoice_from_row).collect()
    }

    async fn open_exceptions(&self, tenant_id: &str) -> AppetiteResult<Vec<OperationalException>> {
        let rows = sqlx::query(
            r#"
            SELECT id, exception_type, impact_amount, created_at
            FROM operational_exceptions
            WHERE tenant_id = $1 AND status = 'open'
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter()
            .map(|row| {
                Ok(OperationalException {
                    id: row.try_get("id").map_err(db_error)?,
                    exception_type: row.try_get("exception_type").map_err(db_error)?,
                    status: ExceptionStatus::Open,
                    impact_amount: row.try_get("impact_amount").map_err(db_error)?,
                    created_at: row.try_get("created_at").map_err(db_error)?,
                })
            })
            .collect()
    }

    async fn reconciliation_outcomes(
        &self,
        tenant_id: &str,
        since: DateTime<Utc>,
    ) -> AppetiteResult<Vec<ReconciliationOutcome>> {
        let rows = sqlx::query(
            r#"
            SELECT id, outcome, decided_at
            FROM reconciliation_outcomes
            WHERE tenant_id = $1 AND decided_at >= $2
            "#,
        )
        .bind(tenant_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter()
            .map(|row| {
                let outcome: String = row.try_get("outcome").map_err(db_error)?;
                Ok(ReconciliationOutcome {
                    id: row.try_get("id").map_err(db_error)?,
                    outcome: decision(&outcome)?,
                    decided_at: row.try_get("decided_at").map_err(db_error)?,
                })
            })
            .collect()
    }

    async fn latest_ml_performance(
        &self,
        tenant_id: &str,
    ) -> AppetiteResult<Option<MlPerformance>> {
        let row = sqlx::query(
            r#"
            SELECT model_name, accuracy, recorded_at
            FROM ml_model_performance
            WHERE tenant_id = $1
            ORDER BY recorded_at DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(|row| {
            Ok(MlPerformance {
                model_name: row.try_get("model_name").map_err(db_error)?,
                accuracy: row.try_get("accuracy").map_err(db_error)?,
                recorded_at: row.try_get("recorded_at").map_err(db_error)?,
            })
        })
        .transpose()
    }

    async fn monthly_financials(&self, tenant_id: &str) -> AppetiteResult<MonthlyFinancials> {
        let row = sqlx::query(
            r#"
            SELECT revenue, costs FROM monthly_financials
            WHERE tenant_id = $1
            ORDER BY month DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match row {
            Some(row) => Ok(MonthlyFinancials {
                revenue: row.try_get("revenue").map_err(db_error)?,
                costs: row.try_get("costs").map_err(db_error)?,
            }),
            None => Ok(MonthlyFinancials::default()),
        }
    }
}

#[async_trait]
impl AlertSink for PgCollaborators {
    async fn create_alert(&self, alert: Alert) -> AppetiteResult<()> {
        sqlx::query(
            r#"
            INSERT INTO alerts (id, tenant_id, alert_type, severity, priority, title, message, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&alert.id)
        .bind(&alert.tenant_id)
        .bind(&alert.alert_type)
        .bind(alert.severity.as_str())
        .bind(i16::from(alert.priority))
        .bind(&alert.title)
        .bind(&alert.message)
        .bind(&alert.metadata)
        .bind(alert.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for PgCollaborators {
    async fn record(&self, event: AuditEvent) -> AppetiteResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_events (id, tenant_id, event_type, actor, payload, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&event.id)
        .bind(&event.tenant_id)
        .bind(&event.event_type)
        .bind(&event.actor)
        .bind(&event.payload)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }
}

#[async_trait]
impl FlagStore for PgCollaborators {
    async fn get_flags(&self, tenant_id: &str) -> AppetiteResult<AutomationFlags> {
        let data: Option<Value> =
            sqlx::query_scalar("SELECT data FROM automation_flags WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;

        match data {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| AppetiteError::Serialization(format!("invalid automation flags: {e}"))),
            None => Ok(AutomationFlags::default()),
        }
    }

    async fn put_flags(&self, tenant_id: &str, flags: AutomationFlags) -> AppetiteResult<()> {
        let data = serde_json::to_value(&flags)?;
        sqlx::query(
            r#"
            INSERT INTO automation_flags (tenant_id, data, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (tenant_id) DO UPDATE SET data = EXCLUDED.data, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(data)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_status_strings() {
        assert_eq!(invoice_status("open").unwrap(), InvoiceStatus::Open);
        assert_eq!(decision("false_auto").unwrap(), ReconciliationDecision::FalseAuto);
        assert!(invoice_status("draft").is_err());
        assert!(decision("auto").is_err());
    }
}
