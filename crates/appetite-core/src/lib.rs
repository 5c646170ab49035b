//! Risk appetite evaluation and enforcement.
//!
//! This crate evaluates Board-approved threshold rules against live metrics,
//! enforces breach actions with a mandatory audit trail, keeps an append-only
//! ledger of decision snapshots, and runs stress tests and board scenarios
//! that never touch the ledger or the breach table.

#![deny(unsafe_code)]

pub mod appetite;
pub mod breaches;
pub mod collaborators;
pub mod enforcement;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod ledger;
pub mod resolver;
pub mod scenarios;
pub mod storage;
pub mod stress;
pub mod types;

pub use appetite::{AppetiteDraft, AppetiteRegistry, RiskAppetite, RiskAppetiteRule, RuleDraft};
pub use breaches::{BreachEvent, BreachRecorder};
pub use collaborators::{
    Alert, AlertSink, AuditEvent, AuditSink, AutomationFlags, Collaborators, FlagStore,
    InMemoryCollaborators, OperationalData,
};
pub use enforcement::{EnforcementDispatcher, EnforcementOutcome};
pub use engine::{
    DetectionReport, EngineConfig, EvaluationReport, FailedRule, ImpactPreview, NewBreach,
    RiskAppetiteEngine, RuleEvaluation,
};
pub use error::{AppetiteError, AppetiteResult};
pub use evaluator::evaluate;
pub use ledger::{DerivedFrom, FactLedger, MetricObservation, ObservationDraft};
pub use resolver::{MetricRecipe, MetricRegistry, MetricResolver, ResolvedMetric};
pub use scenarios::{BoardScenario, ScenarioProjector, ScenarioRequest, ScenarioResult};
pub use storage::{InMemoryStorage, PostgresStorage, Storage, StorageConfig};
pub use stress::{StressTest, StressTestRequest, StressTestResult, StressTestSimulator};
pub use types::{
    AppetiteStatus, Authority, BreachAction, ComparisonOperator, Severity, TruthLevel,
};
