//! Enforcement of breach actions with a mandatory audit trail.

use crate::appetite::RiskAppetiteRule;
use crate::collaborators::{Alert, AuditEvent, AutomationFlags, Collaborators, MlStatus};
use crate::error::{AppetiteError, AppetiteResult};
use crate::types::{BreachAction, Severity};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const ENFORCEMENT_EVENT_TYPE: &str = "RISK_BREACH_ENFORCEMENT";
pub const ENGINE_ACTOR: &str = "system:risk-appetite-engine";
pub const BREACH_ALERT_TYPE: &str = "RISK_APPETITE_BREACH";
pub const BOARD_ESCALATION_ALERT_TYPE: &str = "RISK_APPETITE_BOARD_ESCALATION";

/// Result of one enforcement attempt. Stored as the breach event's `actionResult`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnforcementOutcome {
    pub action: BreachAction,
    pub success: bool,
    pub details: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub audit_recorded: bool,
}

#[derive(Clone)]
pub struct EnforcementDispatcher {
    collaborators: Collaborators,
    timeout: Duration,
}

impl EnforcementDispatcher {
    pub fn new(collaborators: Collaborators, timeout: Duration) -> Self {
        Self {
            collaborators,
            timeout,
        }
    }

    /// Apply `action` for a breached rule. Never fails: action errors are
    /// reported in the outcome and an audit event is always attempted.
    pub async fn execute(
        &self,
        tenant_id: &str,
        action: BreachAction,
        rule: &RiskAppetiteRule,
        metric_value: f64,
    ) -> EnforcementOutcome {
        let flags_before = self.read_flags(tenant_id).await;

        let result = self
            .bounded(action, self.apply(tenant_id, action, rule, metric_value))
            .await;

        let flags_after = self.read_flags(tenant_id).await;
        let (success, details, error_text) = match result {
            Ok(details) => (true, details, None),
            Err(err) => {
                warn!(
                    tenant_id,
                    rule_id = %rule.id,
                    action = action.as_str(),
                    error = %err,
                    "Enforcement action failed"
                );
                (false, json!({}), Some(err.to_string()))
            }
        };

        let audit = AuditEvent {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            event_type: ENFORCEMENT_EVENT_TYPE.to_string(),
            actor: ENGINE_ACTOR.to_string(),
            payload: json!({
                "action": action,
                "ruleId": rule.id,
                "metricCode": rule.metric_code,
                "metricValue": metric_value,
                "threshold": rule.threshold,
                "operator": rule.operator,
                "severity": rule.severity,
                "riskDomain": rule.risk_domain,
                "success": success,
                "error": error_text,
                "details": details,
                "flagsBefore": flags_before,
                "flagsAfter": flags_after,
            }),
            created_at: Utc::now(),
        };

        let audit_recorded = match self
            .bounded("audit", self.collaborators.audit.record(audit))
            .await
        {
            Ok(()) => true,
            Err(err) => {
                error!(tenant_id, rule_id = %rule.id, error = %err, "Failed to record enforcement audit event");
                false
            }
        };

        info!(
            tenant_id,
            rule_id = %rule.id,
            action = action.as_str(),
            success,
            audit_recorded,
            "Executed enforcement action"
        );

        EnforcementOutcome {
            action,
            success,
            details,
            error: error_text,
            audit_recorded,
        }
    }

    async fn bounded<T>(
        &self,
        operation: impl std::fmt::Display,
        future: impl Future<Output = AppetiteResult<T>>,
    ) -> AppetiteResult<T> {
        tokio::time::timeout(self.timeout, future)
            .await
            .map_err(|_| AppetiteError::timeout(operation.to_string(), self.timeout))?
    }

    async fn read_flags(&self, tenant_id: &str) -> Option<AutomationFlags> {
        match self
            .bounded("read flags", self.collaborators.flags.get_flags(tenant_id))
            .await
        {
            Ok(flags) => Some(flags),
            Err(err) => {
                warn!(tenant_id, error = %err, "Could not read automation flags");
                None
            }
        }
    }

    async fn apply(
        &self,
        tenant_id: &str,
        action: BreachAction,
        rule: &RiskAppetiteRule,
        metric_value: f64,
    ) -> AppetiteResult<Value> {
        match action {
            BreachAction::Alert => {
                let alert = breach_alert(tenant_id, rule, metric_value, rule.severity, BREACH_ALERT_TYPE);
                let alert_id = alert.id.clone();
                self.collaborators
                    .alerts
                    .create_alert(alert)
                    .await
                    .map_err(|e| AppetiteError::enforcement(action, e.to_string()))?;
                Ok(json!({ "alertId": alert_id, "priority": rule.severity.alert_priority() }))
            }
            BreachAction::EscalateToBoard => {
                let alert = breach_alert(
                    tenant_id,
                    rule,
                    metric_value,
                    Severity::Critical,
                    BOARD_ESCALATION_ALERT_TYPE,
                );
                let alert_id = alert.id.clone();
                self.collaborators
                    .alerts
                    .create_alert(alert)
                    .await
                    .map_err(|e| AppetiteError::enforcement(action, e.to_string()))?;
                Ok(json!({ "alertId": alert_id, "priority": 1, "escalated": true }))
            }
            BreachAction::RequireApproval => {
                let domain = rule.risk_domain.clone();
                self.update_flags(tenant_id, action, |flags| {
                    if flags.approval_gated_domains.contains(&domain) {
                        return false;
                    }
                    flags.approval_gated_domains.push(domain.clone());
                    true
                })
                .await
                .map(|changed| json!({ "riskDomain": rule.risk_domain, "changed": changed }))
            }
            BreachAction::BlockAutomation => {
                let reason = fallback_reason(rule, metric_value);
                self.update_flags(tenant_id, action, |flags| {
                    if !flags.auto_reconciliation_enabled {
                        return false;
                    }
                    flags.auto_reconciliation_enabled = false;
                    flags.fallback_reason = Some(reason.clone());
                    flags.fallback_at = Some(Utc::now());
                    true
                })
                .await
                .map(|changed| json!({ "autoReconciliationEnabled": false, "changed": changed }))
            }
            BreachAction::DisableMl => {
                let reason = fallback_reason(rule, metric_value);
                self.update_flags(tenant_id, action, |flags| {
                    if !flags.ml_enabled && flags.ml_status == MlStatus::Disabled {
                        return false;
                    }
                    flags.ml_enabled = false;
                    flags.ml_status = MlStatus::Disabled;
                    flags.fallback_reason = Some(reason.clone());
                    flags.fallback_at = Some(Utc::now());
                    true
                })
                .await
                .map(|changed| json!({ "mlEnabled": false, "mlStatus": MlStatus::Disabled, "changed": changed }))
            }
        }
    }

    /// Read-modify-write the tenant flags. Skips the write when `mutate` reports no change.
    async fn update_flags(
        &self,
        tenant_id: &str,
        action: BreachAction,
        mutate: impl FnOnce(&mut AutomationFlags) -> bool,
    ) -> AppetiteResult<bool> {
        let mut flags = self
            .collaborators
            .flags
            .get_flags(tenant_id)
            .await
            .map_err(|e| AppetiteError::enforcement(action, e.to_string()))?;
        if !mutate(&mut flags) {
            return Ok(false);
        }
        self.collaborators
            .flags
            .put_flags(tenant_id, flags)
            .await
            .map_err(|e| AppetiteError::enforcement(action, e.to_string()))?;
        Ok(true)
    }
}

fn fallback_reason(rule: &RiskAppetiteRule, metric_value: f64) -> String {
    format!(
        "Risk appetite breach: {} (current {metric_value})",
        rule.describe()
    )
}

fn breach_alert(
    tenant_id: &str,
    rule: &RiskAppetiteRule,
    metric_value: f64,
    severity: Severity,
    alert_type: &str,
) -> Alert {
    let title = if alert_type == BOARD_ESCALATION_ALERT_TYPE {
        format!("Board escalation: {}", rule.metric_label)
    } else {
        format!("Risk appetite breach: {}", rule.metric_label)
    };
    Alert {
        id: Uuid::new_v4().to_string(),
        tenant_id: tenant_id.to_string(),
        alert_type: alert_type.to_string(),
        severity,
        priority: severity.alert_priority(),
        title,
        message: format!(
            "{} is {metric_value}{}; rule {}",
            rule.metric_label,
            rule.unit,
            rule.describe()
        ),
        metadata: json!({
            "ruleId": rule.id,
            "metricCode": rule.metric_code,
            "metricValue": metric_value,
            "threshold": rule.threshold,
            "operator": rule.operator,
            "riskDomain": rule.risk_domain,
        }),
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{AlertSink, AuditSink, InMemoryCollaborators};
    use crate::types::ComparisonOperator;
    use async_trait::async_trait;
    use std::sync::Arc;

    fn rule(action: BreachAction, severity: Severity) -> RiskAppetiteRule {
        RiskAppetiteRule {
            id: "rule-1".to_string(),
            metric_code: "false_auto_rate".to_string(),
            metric_label: "False auto rate".to_string(),
            risk_domain: "reconciliation".to_string(),
            operator: ComparisonOperator::Gt,
            threshold: 5.0,
            unit: "%".to_string(),
            severity,
            action_on_breach: action,
            is_enabled: true,
        }
    }

    fn dispatcher(fixture: &InMemoryCollaborators) -> EnforcementDispatcher {
        EnforcementDispatcher::new(fixture.collaborators(), Duration::from_secs(2))
    }

    #[tokio::test]
    async fn alert_priority_follows_severity() {
        let fixture = InMemoryCollaborators::new();
        let outcome = dispatcher(&fixture)
            .execute("t1", BreachAction::Alert, &rule(BreachAction::Alert, Severity::Medium), 7.0)
            .await;

        assert!(outcome.success);
        assert!(outcome.audit_recorded);
        let alerts = fixture.alerts.alerts("t1").await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].priority, 3);
        assert_eq!(alerts[0].severity, Severity::Medium);
    }

    #[tokio::test]
    async fn escalation_is_critical_priority_one() {
        let fixture = InMemoryCollaborators::new();
        dispatcher(&fixture)
            .execute(
                "t1",
                BreachAction::EscalateToBoard,
                &rule(BreachAction::EscalateToBoard, Severity::Low),
                7.0,
            )
            .await;

        let alerts = fixture.alerts.alerts("t1").await;
        assert_eq!(alerts[0].priority, 1);
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert_eq!(alerts[0].alert_type, BOARD_ESCALATION_ALERT_TYPE);
    }

    #[tokio::test]
    async fn block_automation_is_idempotent_and_audited_with_flag_states() {
        let fixture = InMemoryCollaborators::new();
        let dispatcher = dispatcher(&fixture);
        let rule = rule(BreachAction::BlockAutomation, Severity::High);

        let first = dispatcher.execute("t1", BreachAction::BlockAutomation, &rule, 9.0).await;
        let second = dispatcher.execute("t1", BreachAction::BlockAutomation, &rule, 9.0).await;
        assert_eq!(first.details["changed"], true);
        assert_eq!(second.details["changed"], false);

        let flags = crate::collaborators::FlagStore::get_flags(fixture.flags.as_ref(), "t1")
            .await
            .unwrap();
        assert!(!flags.auto_reconciliation_enabled);
        assert!(flags.fallback_reason.is_some());
        assert!(flags.fallback_at.is_some());

        let events = fixture.audit.events("t1").await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, ENFORCEMENT_EVENT_TYPE);
        assert_eq!(events[0].payload["flagsBefore"]["autoReconciliationEnabled"], true);
        assert_eq!(events[0].payload["flagsAfter"]["autoReconciliationEnabled"], false);
    }

    #[tokio::test]
    async fn require_approval_and_disable_ml_flip_flags() {
        let fixture = InMemoryCollaborators::new();
        let dispatcher = dispatcher(&fixture);
        dispatcher
            .execute(
                "t1",
                BreachAction::RequireApproval,
                &rule(BreachAction::RequireApproval, Severity::High),
                9.0,
            )
            .await;
        dispatcher
            .execute("t1", BreachAction::DisableMl, &rule(BreachAction::DisableMl, Severity::High), 9.0)
            .await;

        let flags = crate::collaborators::FlagStore::get_flags(fixture.flags.as_ref(), "t1")
            .await
            .unwrap();
        assert_eq!(flags.approval_gated_domains, vec!["reconciliation".to_string()]);
        assert!(!flags.ml_enabled);
        assert_eq!(flags.ml_status, MlStatus::Disabled);
        assert!(flags.auto_reconciliation_enabled);
    }

    struct BrokenSink;

    #[async_trait]
    impl AlertSink for BrokenSink {
        async fn create_alert(&self, _alert: Alert) -> AppetiteResult<()> {
            Err(AppetiteError::Collaborator("alert service down".to_string()))
        }
    }

    #[async_trait]
    impl AuditSink for BrokenSink {
        async fn record(&self, _event: AuditEvent) -> AppetiteResult<()> {
            Err(AppetiteError::Collaborator("audit log down".to_string()))
        }
    }

    #[tokio::test]
    async fn action_failure_is_reported_and_still_audited() {
        let fixture = InMemoryCollaborators::new();
        let mut collaborators = fixture.collaborators();
        collaborators.alerts = Arc::new(BrokenSink);
        let dispatcher = EnforcementDispatcher::new(collaborators, Duration::from_secs(2));

        let outcome = dispatcher
            .execute("t1", BreachAction::Alert, &rule(BreachAction::Alert, Severity::High), 9.0)
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("alert service down"));
        assert!(outcome.audit_recorded);

        let events = fixture.audit.events("t1").await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["success"], false);
    }

    #[tokio::test]
    async fn audit_failure_sets_flag_without_failing_action() {
        let fixture = InMemoryCollaborators::new();
        let mut collaborators = fixture.collaborators();
        collaborators.audit = Arc::new(BrokenSink);
        let dispatcher = EnforcementDispatcher::new(collaborators, Duration::from_secs(2));

        let outcome = dispatcher
            .execute("t1", BreachAction::Alert, &rule(BreachAction::Alert, Severity::High), 9.0)
            .await;
        assert!(outcome.success);
        assert!(!outcome.audit_recorded);
        assert_eq!(fixture.alerts.alerts("t1").await.len(), 1);
    }
}
