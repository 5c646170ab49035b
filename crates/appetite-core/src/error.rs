use thiserror::Error;

/// Risk appetite engine errors.
#[derive(Debug, Error)]
pub enum AppetiteError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Metric '{metric_code}' could not be resolved: {reason}")]
    MetricResolution { metric_code: String, reason: String },

    #[error("No active risk appetite configured for tenant '{0}'")]
    NoActiveAppetite(String),

    #[error("Open breach already recorded for rule '{rule_id}'")]
    DuplicateBreach { rule_id: String },

    #[error("Tenant '{claimed}' may not access resources of tenant '{requested}'")]
    CrossTenant { claimed: String, requested: String },

    #[error("Enforcement action {action} failed: {message}")]
    Enforcement { action: String, message: String },

    #[error("{operation} timed out after {millis}ms")]
    Timeout { operation: String, millis: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppetiteError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn resolution(metric_code: &str, reason: impl Into<String>) -> Self {
        Self::MetricResolution {
            metric_code: metric_code.to_string(),
            reason: reason.into(),
        }
    }

    pub fn enforcement(action: impl std::fmt::Display, message: impl Into<String>) -> Self {
        Self::Enforcement {
            action: action.to_string(),
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, duration: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            millis: duration.as_millis() as u64,
        }
    }
}

impl From<serde_json::Error> for AppetiteError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type AppetiteResult<T> = Result<T, AppetiteError>;
