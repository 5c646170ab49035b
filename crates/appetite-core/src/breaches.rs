//! Breach event recording with open-event deduplication.

use crate::appetite::RiskAppetiteRule;
use crate::error::{AppetiteError, AppetiteResult};
use crate::storage::Storage;
use crate::types::{BreachAction, ComparisonOperator, Severity};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub const DEFAULT_BREACH_LIMIT: usize = 50;
pub const MAX_BREACH_LIMIT: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BreachEvent {
    pub id: String,
    pub tenant_id: String,
    pub rule_id: String,
    pub appetite_id: String,
    pub metric_code: String,
    pub metric_value: f64,
    pub threshold: f64,
    pub operator: ComparisonOperator,
    pub action_taken: BreachAction,
    pub action_result: Value,
    pub severity: Severity,
    pub breached_at: DateTime<Utc>,
    pub is_resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
}

/// Clamp a caller-supplied page size.
pub fn breach_limit(requested: Option<usize>) -> usize {
    requested
        .unwrap_or(DEFAULT_BREACH_LIMIT)
        .clamp(1, MAX_BREACH_LIMIT)
}

#[derive(Clone)]
pub struct BreachRecorder {
    storage: Arc<dyn Storage>,
}

impl BreachRecorder {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Insert a breach unless the rule already has an open one.
    ///
    /// Returns `None` when the conditional insert loses to an existing open event.
    pub async fn record_if_new(
        &self,
        tenant_id: &str,
        appetite_id: &str,
        rule: &RiskAppetiteRule,
        metric_value: f64,
        action_result: Value,
    ) -> AppetiteResult<Option<BreachEvent>> {
        let event = BreachEvent {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            rule_id: rule.id.clone(),
            appetite_id: appetite_id.to_string(),
            metric_code: rule.metric_code.clone(),
            metric_value,
            threshold: rule.threshold,
            operator: rule.operator,
            action_taken: rule.action_on_breach,
            action_result,
            severity: rule.severity,
            breached_at: Utc::now().trunc_subsecs(6),
            is_resolved: false,
            resolved_at: None,
            resolution_notes: None,
        };

        match self.storage.insert_breach_if_absent(event.clone()).await {
            Ok(()) => {
                info!(
                    tenant_id,
                    breach_id = %event.id,
                    rule_id = %rule.id,
                    metric_code = %rule.metric_code,
                    metric_value,
                    severity = rule.severity.as_str(),
                    "Recorded risk appetite breach"
                );
                Ok(Some(event))
            }
            Err(AppetiteError::DuplicateBreach { rule_id }) => {
                debug!(tenant_id, rule_id = %rule_id, "Open breach already exists; skipping");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn has_open(&self, tenant_id: &str, rule_id: &str) -> AppetiteResult<bool> {
        self.storage.has_open_breach(tenant_id, rule_id).await
    }

    /// Mark a breach resolved. Resolving twice is rejected.
    pub async fn resolve(
        &self,
        tenant_id: &str,
        breach_id: &str,
        notes: Option<String>,
    ) -> AppetiteResult<BreachEvent> {
        let resolved = self
            .storage
            .resolve_breach(tenant_id, breach_id, notes, Utc::now().trunc_subsecs(6))
            .await?;
        info!(tenant_id, breach_id, rule_id = %resolved.rule_id, "Resolved risk appetite breach");
        Ok(resolved)
    }

    pub async fn list(
        &self,
        tenant_id: &str,
        unresolved_only: bool,
        limit: Option<usize>,
    ) -> AppetiteResult<Vec<BreachEvent>> {
        self.storage
            .list_breaches(tenant_id, unresolved_only, breach_limit(limit))
            .await
    }

    pub async fn count(&self, tenant_id: &str) -> AppetiteResult<usize> {
        self.storage.count_breaches(tenant_id).await
    }
}
