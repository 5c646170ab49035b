//! Shared vocabulary for rules, observations and enforcement.

use crate::error::AppetiteError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Whether a value comes from a system of record or from derivation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TruthLevel {
    Settled,
    Provisional,
    /// Output of a simulator. Never accepted by the fact ledger.
    Simulated,
}

impl TruthLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Settled => "settled",
            Self::Provisional => "provisional",
            Self::Simulated => "simulated",
        }
    }
}

impl FromStr for TruthLevel {
    type Err = AppetiteError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "settled" => Ok(Self::Settled),
            "provisional" => Ok(Self::Provisional),
            "simulated" => Ok(Self::Simulated),
            other => Err(AppetiteError::validation(format!(
                "unknown truth level '{other}'"
            ))),
        }
    }
}

/// Originating system class of an observation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Authority {
    Bank,
    Manual,
    Rule,
    Accounting,
    Gateway,
    Carrier,
}

impl Authority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bank => "BANK",
            Self::Manual => "MANUAL",
            Self::Rule => "RULE",
            Self::Accounting => "ACCOUNTING",
            Self::Gateway => "GATEWAY",
            Self::Carrier => "CARRIER",
        }
    }

    /// Truth level this authority is allowed to write.
    pub fn required_truth_level(&self) -> TruthLevel {
        match self {
            Self::Rule => TruthLevel::Provisional,
            _ => TruthLevel::Settled,
        }
    }
}

impl FromStr for Authority {
    type Err = AppetiteError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "BANK" => Ok(Self::Bank),
            "MANUAL" => Ok(Self::Manual),
            "RULE" => Ok(Self::Rule),
            "ACCOUNTING" => Ok(Self::Accounting),
            "GATEWAY" => Ok(Self::Gateway),
            "CARRIER" => Ok(Self::Carrier),
            other => Err(AppetiteError::validation(format!(
                "unknown authority '{other}'"
            ))),
        }
    }
}

/// Threshold comparison operator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ComparisonOperator {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "=")]
    Eq,
}

impl ComparisonOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "=",
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComparisonOperator {
    type Err = AppetiteError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "<" | "lt" => Ok(Self::Lt),
            "<=" | "lte" => Ok(Self::Le),
            ">" | "gt" => Ok(Self::Gt),
            ">=" | "gte" => Ok(Self::Ge),
            "=" | "==" | "eq" => Ok(Self::Eq),
            other => Err(AppetiteError::validation(format!(
                "invalid operator '{other}'; expected one of <, <=, >, >=, ="
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Alert priority, 1 being the most urgent.
    pub fn alert_priority(&self) -> u8 {
        match self {
            Self::Critical => 1,
            Self::High => 2,
            Self::Medium => 3,
            Self::Low => 4,
        }
    }
}

impl FromStr for Severity {
    type Err = AppetiteError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(AppetiteError::validation(format!(
                "unknown severity '{other}'"
            ))),
        }
    }
}

/// Automated response attached to a rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreachAction {
    Alert,
    RequireApproval,
    BlockAutomation,
    DisableMl,
    EscalateToBoard,
}

impl BreachAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alert => "ALERT",
            Self::RequireApproval => "REQUIRE_APPROVAL",
            Self::BlockAutomation => "BLOCK_AUTOMATION",
            Self::DisableMl => "DISABLE_ML",
            Self::EscalateToBoard => "ESCALATE_TO_BOARD",
        }
    }
}

impl fmt::Display for BreachAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BreachAction {
    type Err = AppetiteError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ALERT" => Ok(Self::Alert),
            "REQUIRE_APPROVAL" => Ok(Self::RequireApproval),
            "BLOCK_AUTOMATION" => Ok(Self::BlockAutomation),
            "DISABLE_ML" => Ok(Self::DisableMl),
            "ESCALATE_TO_BOARD" => Ok(Self::EscalateToBoard),
            other => Err(AppetiteError::validation(format!(
                "unknown breach action '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AppetiteStatus {
    Active,
    Draft,
    Archived,
}

impl AppetiteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Draft => "draft",
            Self::Archived => "archived",
        }
    }
}

impl FromStr for AppetiteStatus {
    type Err = AppetiteError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(Self::Active),
            "draft" => Ok(Self::Draft),
            "archived" => Ok(Self::Archived),
            other => Err(AppetiteError::validation(format!(
                "unknown appetite status '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_parses_symbols_and_aliases() {
        assert_eq!("<=".parse::<ComparisonOperator>().unwrap(), ComparisonOperator::Le);
        assert_eq!("gte".parse::<ComparisonOperator>().unwrap(), ComparisonOperator::Ge);
        assert!("!=".parse::<ComparisonOperator>().is_err());
    }

    #[test]
    fn wire_names_match_contract() {
        assert_eq!(
            serde_json::to_value(BreachAction::EscalateToBoard).unwrap(),
            serde_json::json!("ESCALATE_TO_BOARD")
        );
        assert_eq!(
            serde_json::to_value(ComparisonOperator::Ge).unwrap(),
            serde_json::json!(">=")
        );
        assert_eq!(
            serde_json::to_value(TruthLevel::Provisional).unwrap(),
            serde_json::json!("provisional")
        );
        assert_eq!(
            serde_json::to_value(Authority::Accounting).unwrap(),
            serde_json::json!("ACCOUNTING")
        );
    }

    #[test]
    fn only_rule_authority_writes_provisional() {
        assert_eq!(Authority::Rule.required_truth_level(), TruthLevel::Provisional);
        for authority in [
            Authority::Bank,
            Authority::Manual,
            Authority::Accounting,
            Authority::Gateway,
            Authority::Carrier,
        ] {
            assert_eq!(authority.required_truth_level(), TruthLevel::Settled);
        }
    }
}
