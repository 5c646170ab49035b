//! Fact ledger of decision snapshots.
//!
//! Observations are append-only: nothing is updated or deleted, corrections are
//! new observations linked through `supersedes_id`, and the "current" value of a
//! metric is always a derived read over the log.

use crate::error::{AppetiteError, AppetiteResult};
use crate::storage::Storage;
use crate::types::{Authority, TruthLevel};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const SETTLED_DEFAULT_CONFIDENCE: u8 = 100;
pub const PROVISIONAL_DEFAULT_CONFIDENCE: u8 = 70;
const MAX_CHAIN_LENGTH: usize = 1024;

/// Provenance of an observation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DerivedFrom {
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub formula: Option<String>,
    #[serde(default)]
    pub source_tables: Vec<String>,
    #[serde(default)]
    pub assumptions: Vec<String>,
}

impl DerivedFrom {
    pub fn formula(formula: impl Into<String>, source_tables: &[&str]) -> Self {
        Self {
            formula: Some(formula.into()),
            source_tables: source_tables.iter().map(|t| t.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_evidence(mut self, pointer: impl Into<String>) -> Self {
        self.evidence.push(pointer.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.evidence.is_empty()
            && self.source_tables.is_empty()
            && self
                .formula
                .as_deref()
                .map(|f| f.trim().is_empty())
                .unwrap_or(true)
    }
}

/// A write request for the fact ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationDraft {
    #[serde(default)]
    pub tenant_id: Option<String>,
    pub metric_code: String,
    #[serde(default = "default_metric_version")]
    pub metric_version: u32,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
    pub value: f64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub dimensions: BTreeMap<String, String>,
    pub truth_level: TruthLevel,
    pub authority: Authority,
    #[serde(default)]
    pub confidence: Option<u8>,
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
    #[serde(default)]
    pub derived_from: Option<DerivedFrom>,
    #[serde(default)]
    pub supersedes_id: Option<String>,
}

fn default_metric_version() -> u32 {
    1
}

impl ObservationDraft {
    pub fn settled(metric_code: impl Into<String>, value: f64, authority: Authority) -> Self {
        Self::new(metric_code, value, TruthLevel::Settled, authority)
    }

    pub fn provisional(metric_code: impl Into<String>, value: f64) -> Self {
        Self::new(metric_code, value, TruthLevel::Provisional, Authority::Rule)
    }

    fn new(
        metric_code: impl Into<String>,
        value: f64,
        truth_level: TruthLevel,
        authority: Authority,
    ) -> Self {
        Self {
            tenant_id: None,
            metric_code: metric_code.into(),
            metric_version: default_metric_version(),
            entity_type: None,
            entity_id: None,
            value,
            currency: None,
            dimensions: BTreeMap::new(),
            truth_level,
            authority,
            confidence: None,
            as_of: None,
            derived_from: None,
            supersedes_id: None,
        }
    }

    pub fn with_derived_from(mut self, derived_from: DerivedFrom) -> Self {
        self.derived_from = Some(derived_from);
        self
    }

    pub fn with_as_of(mut self, as_of: DateTime<Utc>) -> Self {
        self.as_of = Some(as_of);
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    pub fn superseding(mut self, previous_id: impl Into<String>) -> Self {
        self.supersedes_id = Some(previous_id.into());
        self
    }

    /// Check every ledger write invariant that does not need storage access.
    pub fn validate(&self) -> AppetiteResult<()> {
        if self.metric_code.trim().is_empty() {
            return Err(AppetiteError::validation("metricCode is required"));
        }
        if self.metric_version == 0 {
            return Err(AppetiteError::validation("metricVersion must be >= 1"));
        }
        if !self.value.is_finite() {
            return Err(AppetiteError::validation("value must be a finite number"));
        }
        if self.truth_level == TruthLevel::Simulated {
            return Err(AppetiteError::validation(
                "simulated values cannot be written to the fact ledger",
            ));
        }
        let required = self.authority.required_truth_level();
        if self.truth_level != required {
            return Err(AppetiteError::validation(format!(
                "truthLevel '{}' is not allowed for authority '{}' (requires '{}')",
                self.truth_level.as_str(),
                self.authority.as_str(),
                required.as_str()
            )));
        }
        if let Some(confidence) = self.confidence {
            if confidence > 100 {
                return Err(AppetiteError::validation(
                    "confidence must be between 0 and 100",
                ));
            }
        }
        match &self.derived_from {
            Some(derived) if !derived.is_empty() => Ok(()),
            _ => Err(AppetiteError::validation(
                "derivedFrom must name evidence, a formula or source tables",
            )),
        }
    }
}

/// Immutable, hashed ledger record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricObservation {
    pub id: String,
    pub tenant_id: String,
    pub metric_code: String,
    pub metric_version: u32,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub value: f64,
    pub currency: Option<String>,
    pub dimensions: BTreeMap<String, String>,
    pub truth_level: TruthLevel,
    pub authority: Authority,
    pub confidence: u8,
    pub as_of: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub derived_from: DerivedFrom,
    pub supersedes_id: Option<String>,
    pub content_hash: String,
}

impl MetricObservation {
    /// Materialize a validated draft. Timestamps are truncated to microseconds
    /// so the content hash survives a round trip through PostgreSQL.
    fn from_draft(tenant_id: &str, draft: ObservationDraft) -> Self {
        let now = Utc::now().trunc_subsecs(6);
        let confidence = draft.confidence.unwrap_or(match draft.truth_level {
            TruthLevel::Settled => SETTLED_DEFAULT_CONFIDENCE,
            _ => PROVISIONAL_DEFAULT_CONFIDENCE,
        });

        let mut observation = Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            metric_code: draft.metric_code,
            metric_version: draft.metric_version,
            entity_type: draft.entity_type,
            entity_id: draft.entity_id,
            value: draft.value,
            currency: draft.currency,
            dimensions: draft.dimensions,
            truth_level: draft.truth_level,
            authority: draft.authority,
            confidence,
            as_of: draft.as_of.map(|t| t.trunc_subsecs(6)).unwrap_or(now),
            created_at: now,
            derived_from: draft.derived_from.unwrap_or_default(),
            supersedes_id: draft.supersedes_id,
            content_hash: String::new(),
        };
        observation.content_hash = observation.compute_hash();
        observation
    }

    pub fn compute_hash(&self) -> String {
        let canonical = serde_json::json!({
            "id": self.id,
            "tenant_id": self.tenant_id,
            "metric_code": self.metric_code,
            "metric_version": self.metric_version,
            "entity_type": self.entity_type,
            "entity_id": self.entity_id,
            "value": self.value,
            "currency": self.currency,
            "dimensions": self.dimensions,
            "truth_level": self.truth_level.as_str(),
            "authority": self.authority.as_str(),
            "confidence": self.confidence,
            "as_of": self.as_of.to_rfc3339(),
            "created_at": self.created_at.to_rfc3339(),
            "derived_from": self.derived_from,
            "supersedes_id": self.supersedes_id,
        });
        blake3::hash(canonical.to_string().as_bytes())
            .to_hex()
            .to_string()
    }

    pub fn verify_hash(&self) -> bool {
        self.content_hash == self.compute_hash()
    }

    pub fn is_settled(&self) -> bool {
        self.truth_level == TruthLevel::Settled
    }
}

/// Append-only decision snapshot store.
#[derive(Clone)]
pub struct FactLedger {
    storage: Arc<dyn Storage>,
}

impl FactLedger {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Validate and append a new observation. Invalid drafts never reach storage.
    pub async fn append(
        &self,
        tenant_id: &str,
        draft: ObservationDraft,
    ) -> AppetiteResult<MetricObservation> {
        if let Some(claimed) = draft.tenant_id.as_deref() {
            if claimed != tenant_id {
                return Err(AppetiteError::CrossTenant {
                    claimed: tenant_id.to_string(),
                    requested: claimed.to_string(),
                });
            }
        }

        if let Err(err) = draft.validate() {
            warn!(tenant_id, metric_code = %draft.metric_code, error = %err, "Rejected ledger write");
            return Err(err);
        }

        if let Some(previous_id) = draft.supersedes_id.as_deref() {
            let previous = self
                .storage
                .get_observation(tenant_id, previous_id)
                .await?
                .ok_or_else(|| {
                    AppetiteError::validation(format!(
                        "supersedesId '{previous_id}' does not reference an existing observation"
                    ))
                })?;
            if previous.metric_code != draft.metric_code {
                return Err(AppetiteError::validation(format!(
                    "supersedesId '{previous_id}' belongs to metric '{}', not '{}'",
                    previous.metric_code, draft.metric_code
                )));
            }
        }

        let observation = MetricObservation::from_draft(tenant_id, draft);
        self.storage.insert_observation(observation.clone()).await?;

        info!(
            tenant_id,
            observation_id = %observation.id,
            metric_code = %observation.metric_code,
            truth_level = observation.truth_level.as_str(),
            authority = observation.authority.as_str(),
            "Appended ledger observation"
        );

        Ok(observation)
    }

    /// Latest observation by `as_of` for `(tenant, metric, entity)`.
    pub async fn current(
        &self,
        tenant_id: &str,
        metric_code: &str,
        entity_id: Option<&str>,
    ) -> AppetiteResult<Option<MetricObservation>> {
        self.storage
            .latest_observation(tenant_id, metric_code, entity_id, None)
            .await
    }

    /// Latest settled, tenant-wide observation. Provisional values are ignored.
    pub async fn latest_settled(
        &self,
        tenant_id: &str,
        metric_code: &str,
    ) -> AppetiteResult<Option<MetricObservation>> {
        self.storage
            .latest_observation(tenant_id, metric_code, None, Some(TruthLevel::Settled))
            .await
    }

    pub async fn history(
        &self,
        tenant_id: &str,
        metric_code: Option<&str>,
        limit: usize,
    ) -> AppetiteResult<Vec<MetricObservation>> {
        self.storage
            .list_observations(tenant_id, metric_code, limit)
            .await
    }

    /// Follow the supersedes chain from `observation_id` back to its root.
    pub async fn chain(
        &self,
        tenant_id: &str,
        observation_id: &str,
    ) -> AppetiteResult<Vec<MetricObservation>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(observation_id.to_string());

        while let Some(id) = next.take() {
            if !seen.insert(id.clone()) || chain.len() >= MAX_CHAIN_LENGTH {
                return Err(AppetiteError::Storage(format!(
                    "supersedes chain starting at '{observation_id}' is cyclic or too long"
                )));
            }
            let observation = self
                .storage
                .get_observation(tenant_id, &id)
                .await?
                .ok_or_else(|| AppetiteError::NotFound(format!("observation '{id}'")))?;
            next = observation.supersedes_id.clone();
            chain.push(observation);
        }

        Ok(chain)
    }

    pub async fn count(&self, tenant_id: &str) -> AppetiteResult<usize> {
        self.storage.count_observations(tenant_id).await
    }
}
