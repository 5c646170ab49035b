//! PostgreSQL storage implementation

use super::traits::*;
use crate::appetite::RiskAppetite;
use crate::breaches::BreachEvent;
use crate::error::{AppetiteError, AppetiteResult};
use crate::ledger::MetricObservation;
use crate::scenarios::BoardScenario;
use crate::stress::StressTest;
use crate::types::{AppetiteStatus, TruthLevel};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

/// PostgreSQL-backed storage. Records live in JSONB `data` columns next to the
/// indexed columns the queries filter on.
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub async fn connect(database_url: &str, max_connections: u32) -> AppetiteResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| AppetiteError::Storage(format!("postgres connect failed: {e}")))?;
        Ok(Self { pool })
    }

    pub async fn ensure_schema(&self) -> AppetiteResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS metric_observations (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                metric_code TEXT NOT NULL,
                entity_id TEXT,
                truth_level TEXT NOT NULL,
                as_of TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS metric_observations_current ON metric_observations(tenant_id, metric_code, as_of DESC, created_at DESC);"#,
            r#"
            CREATE TABLE IF NOT EXISTS risk_appetites (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                version INTEGER NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL,
                UNIQUE (tenant_id, version)
            );
            "#,
            r#"CREATE UNIQUE INDEX IF NOT EXISTS risk_appetites_one_active ON risk_appetites(tenant_id) WHERE status = 'active';"#,
            r#"
            CREATE TABLE IF NOT EXISTS risk_breach_events (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                rule_id TEXT NOT NULL,
                is_resolved BOOLEAN NOT NULL DEFAULT FALSE,
                breached_at TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL
            );
            "#,
            r#"CREATE UNIQUE INDEX IF NOT EXISTS risk_breach_events_one_open ON risk_breach_events(tenant_id, rule_id) WHERE NOT is_resolved;"#,
            r#"CREATE INDEX IF NOT EXISTS risk_breach_events_recent ON risk_breach_events(tenant_id, breached_at DESC);"#,
            r#"
            CREATE TABLE IF NOT EXISTS risk_stress_tests (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS board_scenarios (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                is_archived BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL
            );
            "#,
        ];

        for stmt in statements {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| AppetiteError::Storage(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }

    fn to_json<T: serde::Serialize>(value: &T) -> AppetiteResult<Value> {
        serde_json::to_value(value)
            .map_err(|e| AppetiteError::Serialization(format!("json serialize error: {e}")))
    }

    fn from_row<T: serde::de::DeserializeOwned>(row: &PgRow) -> AppetiteResult<T> {
        let data: Value = row.try_get("data").map_err(db_error)?;
        serde_json::from_value(data)
            .map_err(|e| AppetiteError::Serialization(format!("json deserialize error: {e}")))
    }

    fn from_rows<T: serde::de::DeserializeOwned>(rows: Vec<PgRow>) -> AppetiteResult<Vec<T>> {
        rows.iter().map(Self::from_row).collect()
    }
}

fn db_error(e: sqlx::Error) -> AppetiteError {
    AppetiteError::Storage(e.to_string())
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

impl Storage for PostgresStorage {}

#[async_trait]
impl ObservationStorage for PostgresStorage {
    async fn insert_observation(&self, observation: MetricObservation) -> AppetiteResult<()> {
        let data = Self::to_json(&observation)?;
        sqlx::query(
            r#"
            INSERT INTO metric_observations (id, tenant_id, metric_code, entity_id, truth_level, as_of, created_at, data)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&observation.id)
        .bind(&observation.tenant_id)
        .bind(&observation.metric_code)
        .bind(&observation.entity_id)
        .bind(observation.truth_level.as_str())
        .bind(observation.as_of)
        .bind(observation.created_at)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn get_observation(
        &self,
        tenant_id: &str,
        id: &str,
    ) -> AppetiteResult<Option<MetricObservation>> {
        let row = sqlx::query("SELECT data FROM metric_observations WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn latest_observation(
        &self,
        tenant_id: &str,
        metric_code: &str,
        entity_id: Option<&str>,
        truth_level: Option<TruthLevel>,
    ) -> AppetiteResult<Option<MetricObservation>> {
        let row = sqlx::query(
            r#"
            SELECT data FROM metric_observations
            WHERE tenant_id = $1
              AND metric_code = $2
              AND entity_id IS NOT DISTINCT FROM $3
              AND ($4::TEXT IS NULL OR truth_level = $4)
            ORDER BY as_of DESC, created_at DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(metric_code)
        .bind(entity_id)
        .bind(truth_level.map(|level| level.as_str()))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_observations(
        &self,
        tenant_id: &str,
        metric_code: Option<&str>,
        limit: usize,
    ) -> AppetiteResult<Vec<MetricObservation>> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM metric_observations
            WHERE tenant_id = $1 AND ($2::TEXT IS NULL OR metric_code = $2)
            ORDER BY as_of DESC, created_at DESC
            LIMIT $3
            "#,
        )
        .bind(tenant_id)
        .bind(metric_code)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Self::from_rows(rows)
    }

    async fn count_observations(&self, tenant_id: &str) -> AppetiteResult<usize> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM metric_observations WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_error)?;
        Ok(count.max(0) as usize)
    }
}

#[async_trait]
impl AppetiteStorage for PostgresStorage {
    async fn insert_appetite(&self, mut appetite: RiskAppetite) -> AppetiteResult<RiskAppetite> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&appetite.tenant_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        let latest: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) FROM risk_appetites WHERE tenant_id = $1",
        )
        .bind(&appetite.tenant_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;
        appetite.version = u32::try_from(latest).unwrap_or(0) + 1;

        let data = Self::to_json(&appetite)?;
        sqlx::query(
            r#"
            INSERT INTO risk_appetites (id, tenant_id, version, status, created_at, data)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&appetite.id)
        .bind(&appetite.tenant_id)
        .bind(appetite.version as i32)
        .bind(appetite.status.as_str())
        .bind(appetite.created_at)
        .bind(data)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(appetite)
    }

    async fn get_appetite(
        &self,
        tenant_id: &str,
        id: &str,
    ) -> AppetiteResult<Option<RiskAppetite>> {
        let row = sqlx::query("SELECT data FROM risk_appetites WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn active_appetite(&self, tenant_id: &str) -> AppetiteResult<Option<RiskAppetite>> {
        let row = sqlx::query(
            "SELECT data FROM risk_appetites WHERE tenant_id = $1 AND status = 'active'",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_appetites(&self, tenant_id: &str) -> AppetiteResult<Vec<RiskAppetite>> {
        let rows = sqlx::query(
            "SELECT data FROM risk_appetites WHERE tenant_id = $1 ORDER BY version DESC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Self::from_rows(rows)
    }

    async fn activate_appetite(
        &self,
        tenant_id: &str,
        id: &str,
        approved_by: &str,
        approved_at: DateTime<Utc>,
    ) -> AppetiteResult<RiskAppetite> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let row = sqlx::query(
            "SELECT data FROM risk_appetites WHERE tenant_id = $1 AND id = $2 FOR UPDATE",
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?
        .ok_or_else(|| AppetiteError::NotFound(format!("risk appetite '{id}'")))?;
        let mut target: RiskAppetite = Self::from_row(&row)?;

        match target.status {
            AppetiteStatus::Archived => {
                return Err(AppetiteError::validation(format!(
                    "risk appetite '{id}' is archived and cannot be activated"
                )))
            }
            AppetiteStatus::Active => return Ok(target),
            AppetiteStatus::Draft => {}
        }

        let previous = sqlx::query(
            "SELECT data FROM risk_appetites WHERE tenant_id = $1 AND status = 'active' FOR UPDATE",
        )
        .bind(tenant_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_error)?;

        for row in previous {
            let mut archived: RiskAppetite = Self::from_row(&row)?;
            archived.status = AppetiteStatus::Archived;
            sqlx::query("UPDATE risk_appetites SET status = $1, data = $2 WHERE id = $3")
                .bind(archived.status.as_str())
                .bind(Self::to_json(&archived)?)
                .bind(&archived.id)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        }

        target.status = AppetiteStatus::Active;
        target.approved_by = Some(approved_by.to_string());
        target.approved_at = Some(approved_at);
        sqlx::query("UPDATE risk_appetites SET status = $1, data = $2 WHERE id = $3")
            .bind(target.status.as_str())
            .bind(Self::to_json(&target)?)
            .bind(&target.id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(target)
    }

    async fn tenants_with_active_appetite(&self) -> AppetiteResult<Vec<String>> {
        sqlx::query_scalar(
            "SELECT DISTINCT tenant_id FROM risk_appetites WHERE status = 'active' ORDER BY tenant_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)
    }
}

#[async_trait]
impl BreachStorage for PostgresStorage {
    async fn insert_breach_if_absent(&self, breach: BreachEvent) -> AppetiteResult<()> {
        let data = Self::to_json(&breach)?;
        let inserted: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO risk_breach_events (id, tenant_id, rule_id, is_resolved, breached_at, data)
            VALUES ($1, $2, $3, FALSE, $4, $5)
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&breach.id)
        .bind(&breach.tenant_id)
        .bind(&breach.rule_id)
        .bind(breach.breached_at)
        .bind(data)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match inserted {
            Some(_) => Ok(()),
            None => Err(AppetiteError::DuplicateBreach {
                rule_id: breach.rule_id,
            }),
        }
    }

    async fn has_open_breach(&self, tenant_id: &str, rule_id: &str) -> AppetiteResult<bool> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM risk_breach_events
                WHERE tenant_id = $1 AND rule_id = $2 AND NOT is_resolved
            )
            "#,
        )
        .bind(tenant_id)
        .bind(rule_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)
    }

    async fn resolve_breach(
        &self,
        tenant_id: &str,
        id: &str,
        notes: Option<String>,
        resolved_at: DateTime<Utc>,
    ) -> AppetiteResult<BreachEvent> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let row = sqlx::query(
            "SELECT data FROM risk_breach_events WHERE tenant_id = $1 AND id = $2 FOR UPDATE",
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?
        .ok_or_else(|| AppetiteError::NotFound(format!("breach '{id}'")))?;
        let mut breach: BreachEvent = Self::from_row(&row)?;

        if breach.is_resolved {
            return Err(AppetiteError::validation(format!(
                "breach '{id}' is already resolved"
            )));
        }
        breach.is_resolved = true;
        breach.resolved_at = Some(resolved_at);
        breach.resolution_notes = notes;

        sqlx::query("UPDATE risk_breach_events SET is_resolved = TRUE, data = $1 WHERE id = $2")
            .bind(Self::to_json(&breach)?)
            .bind(&breach.id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(breach)
    }

    async fn list_breaches(
        &self,
        tenant_id: &str,
        unresolved_only: bool,
        limit: usize,
    ) -> AppetiteResult<Vec<BreachEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM risk_breach_events
            WHERE tenant_id = $1 AND (NOT $2 OR NOT is_resolved)
            ORDER BY breached_at DESC
            LIMIT $3
            "#,
        )
        .bind(tenant_id)
        .bind(unresolved_only)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Self::from_rows(rows)
    }

    async fn count_breaches(&self, tenant_id: &str) -> AppetiteResult<usize> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM risk_breach_events WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_error)?;
        Ok(count.max(0) as usize)
    }
}

#[async_trait]
impl StressTestStorage for PostgresStorage {
    async fn insert_stress_test(&self, test: StressTest) -> AppetiteResult<()> {
        sqlx::query(
            "INSERT INTO risk_stress_tests (id, tenant_id, created_at, data) VALUES ($1, $2, $3, $4)",
        )
        .bind(&test.id)
        .bind(&test.tenant_id)
        .bind(test.created_at)
        .bind(Self::to_json(&test)?)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn get_stress_test(
        &self,
        tenant_id: &str,
        id: &str,
    ) -> AppetiteResult<Option<StressTest>> {
        let row = sqlx::query("SELECT data FROM risk_stress_tests WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_stress_tests(&self, tenant_id: &str) -> AppetiteResult<Vec<StressTest>> {
        let rows = sqlx::query(
            "SELECT data FROM risk_stress_tests WHERE tenant_id = $1 ORDER BY created_at DESC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Self::from_rows(rows)
    }
}

#[async_trait]
impl ScenarioStorage for PostgresStorage {
    async fn insert_scenario(&self, scenario: BoardScenario) -> AppetiteResult<()> {
        sqlx::query(
            r#"
            INSERT INTO board_scenarios (id, tenant_id, is_archived, created_at, data)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&scenario.id)
        .bind(&scenario.tenant_id)
        .bind(scenario.is_archived)
        .bind(scenario.created_at)
        .bind(Self::to_json(&scenario)?)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn get_scenario(
        &self,
        tenant_id: &str,
        id: &str,
    ) -> AppetiteResult<Option<BoardScenario>> {
        let row = sqlx::query("SELECT data FROM board_scenarios WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_scenarios(
        &self,
        tenant_id: &str,
        include_archived: bool,
    ) -> AppetiteResult<Vec<BoardScenario>> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM board_scenarios
            WHERE tenant_id = $1 AND ($2 OR NOT is_archived)
            ORDER BY created_at DESC
            "#,
        )
        .bind(tenant_id)
        .bind(include_archived)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Self::from_rows(rows)
    }

    async fn archive_scenario(&self, tenant_id: &str, id: &str) -> AppetiteResult<BoardScenario> {
        let row = sqlx::query(
            r#"
            UPDATE board_scenarios
            SET is_archived = TRUE, data = jsonb_set(data, '{isArchived}', 'true'::jsonb)
            WHERE tenant_id = $1 AND id = $2
            RETURNING data
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .ok_or_else(|| AppetiteError::NotFound(format!("board scenario '{id}'")))?;
        Self::from_row(&row)
    }
}
