//! Append-only audit trail for scoring and allocation decisions.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::domain::{Actor, AllocationId, ApplicationId, RunId};
use super::features::{FeatureSchema, FeatureVector};
use super::scoring::{PredictionResult, ScoringMethod};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    PriorityCalculated,
    AllocationCreated,
    AllocationCancelled,
    AllocationConfirmed,
    ManualOverride,
    Waitlisted,
    BatchAllocationRun,
}

/// Entities an audit event concerns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSubject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_id: Option<ApplicationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocation_id: Option<AllocationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
}

impl AuditSubject {
    pub fn application(id: &ApplicationId) -> Self {
        Self {
            application_id: Some(id.clone()),
            ..Self::default()
        }
    }

    pub fn run(id: &RunId) -> Self {
        Self {
            run_id: Some(id.clone()),
            ..Self::default()
        }
    }

    pub fn with_allocation(mut self, id: &AllocationId) -> Self {
        self.allocation_id = Some(id.clone());
        self
    }

    pub fn with_run(mut self, id: Option<&RunId>) -> Self {
        self.run_id = id.cloned();
        self
    }
}

/// Exact inputs and outputs of a scoring decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringPayload {
    pub feature_schema: FeatureSchema,
    pub input_features: BTreeMap<String, f64>,
    pub seniority_score: f64,
    pub model_version: String,
    pub scoring_method: ScoringMethod,
    pub raw_score: f64,
    pub final_score: f64,
}

impl ScoringPayload {
    pub fn new(features: &FeatureVector, prediction: &PredictionResult, final_score: f64) -> Self {
        Self {
            feature_schema: features.schema,
            input_features: features.to_named(),
            seniority_score: features.derived.seniority_score,
            model_version: prediction.model_version.clone(),
            scoring_method: prediction.scoring_method,
            raw_score: prediction.raw_score,
            final_score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub actor: Actor,
    #[serde(flatten)]
    pub subject: AuditSubject,
    pub timestamp: DateTime<Utc>,
    pub details: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scoring: Option<ScoringPayload>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

/// Filter for reading the trail back; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    pub application_id: Option<ApplicationId>,
    #[serde(default)]
    pub action: Option<AuditAction>,
}

impl AuditQuery {
    pub fn matches(&self, event: &AuditEvent) -> bool {
        let application_matches = self.application_id.is_none()
            || event.subject.application_id == self.application_id;
        let action_matches = self.action.map_or(true, |action| event.action == action);
        application_matches && action_matches
    }
}

/// Durable destination for audit events. Implementations must never mutate or drop events.
pub trait AuditSink: Send + Sync {
    fn append(&self, event: AuditEvent) -> Result<(), AuditError>;

    /// Matching events, newest first.
    fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>, AuditError>;
}

/// Builds and synchronously writes audit events.
pub struct AuditRecorder<A> {
    sink: Arc<A>,
}

impl<A> Clone for AuditRecorder<A> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
        }
    }
}

impl<A: AuditSink> AuditRecorder<A> {
    pub fn new(sink: Arc<A>) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &Arc<A> {
        &self.sink
    }

    pub fn record(
        &self,
        action: AuditAction,
        actor: &Actor,
        subject: AuditSubject,
        details: Value,
        scoring: Option<ScoringPayload>,
    ) -> Result<(), AuditError> {
        self.sink.append(AuditEvent {
            action,
            actor: actor.clone(),
            subject,
            timestamp: Utc::now(),
            details,
            scoring,
        })
    }
}
