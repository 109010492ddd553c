//! Domain entities and enums.
//!
//! Everything here is the in-memory shape; JSON columns and status strings
//! exist only at the persistence boundary in `store`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};
use crate::targeting::Targeting;

/// Canonical lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    Draft,
    Running,
    Paused,
    Stopped,
}

impl ExperimentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExperimentStatus::Draft => "draft",
            ExperimentStatus::Running => "running",
            ExperimentStatus::Paused => "paused",
            ExperimentStatus::Stopped => "stopped",
        }
    }
}

/// Companion outcome carried alongside STOPPED; `None` everywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    #[default]
    None,
    Passed,
    Failed,
    Inconclusive,
    TerminatedWithoutCause,
}

impl Outcome {
    pub fn parse(token: &str) -> CoreResult<Outcome> {
        match token {
            "none" => Ok(Outcome::None),
            "passed" => Ok(Outcome::Passed),
            "failed" => Ok(Outcome::Failed),
            "inconclusive" => Ok(Outcome::Inconclusive),
            "terminated_without_cause" => Ok(Outcome::TerminatedWithoutCause),
            other => Err(CoreError::invalid(format!("unknown outcome: {other}"))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::None => "none",
            Outcome::Passed => "passed",
            Outcome::Failed => "failed",
            Outcome::Inconclusive => "inconclusive",
            Outcome::TerminatedWithoutCause => "terminated_without_cause",
        }
    }
}

/// A requested status change, accepting both the canonical vocabulary and
/// the legacy outcome-overloaded tokens (`passed`, `failed`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub status: ExperimentStatus,
    pub outcome: Outcome,
}

impl StatusChange {
    pub fn parse(token: &str) -> CoreResult<StatusChange> {
        let (status, outcome) = match token {
            "draft" => (ExperimentStatus::Draft, Outcome::None),
            "running" => (ExperimentStatus::Running, Outcome::None),
            "paused" => (ExperimentStatus::Paused, Outcome::None),
            "stopped" => (ExperimentStatus::Stopped, Outcome::None),
            "passed" => (ExperimentStatus::Stopped, Outcome::Passed),
            "failed" => (ExperimentStatus::Stopped, Outcome::Failed),
            "inconclusive" => (ExperimentStatus::Stopped, Outcome::Inconclusive),
            "terminated_without_cause" => {
                (ExperimentStatus::Stopped, Outcome::TerminatedWithoutCause)
            }
            other => {
                return Err(CoreError::invalid(format!("unknown status: {other}")));
            }
        };
        Ok(StatusChange { status, outcome })
    }

    /// Audit-trail token: the outcome when one is set, else the status.
    pub fn effective_token(self) -> &'static str {
        match self.outcome {
            Outcome::None => self.status.as_str(),
            outcome => outcome.as_str(),
        }
    }
}

/// How a fresh unit is mapped to a variant. One policy per experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentPolicy {
    #[default]
    WeightedBucket,
    ThompsonSampling,
}

impl AssignmentPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            AssignmentPolicy::WeightedBucket => "weighted_bucket",
            AssignmentPolicy::ThompsonSampling => "thompson_sampling",
        }
    }

    pub fn parse(token: &str) -> CoreResult<AssignmentPolicy> {
        match token {
            "weighted_bucket" => Ok(AssignmentPolicy::WeightedBucket),
            "thompson_sampling" => Ok(AssignmentPolicy::ThompsonSampling),
            other => Err(CoreError::invalid(format!(
                "unknown assignment policy: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub id: String,
    pub experiment_id: String,
    pub key: String,
    pub name: String,
    pub weight: f64,
    /// Opaque payload handed to callers with the assignment.
    pub config: Value,
    /// Insertion ordinal; selection order and control fallback depend on it.
    pub ordinal: i64,
    pub created_at: DateTime<Utc>,
}

impl Variant {
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "key": self.key,
            "name": self.name,
            "weight": self.weight,
            "config_json": self.config,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Experiment {
    pub id: String,
    pub name: String,
    pub description: String,
    pub hypothesis: Option<String>,
    pub owner: String,
    pub created_by: String,
    pub unit_type: String,
    pub tags: Vec<String>,
    pub targeting: Targeting,
    pub ramp_pct: i64,
    /// Fixed at creation; folded into every bucket hash.
    pub assignment_salt: String,
    pub policy: AssignmentPolicy,
    pub version: i64,
    pub mde: f64,
    pub baseline_rate: f64,
    pub alpha: f64,
    pub power: f64,
    pub sample_size_required: i64,
    pub status: ExperimentStatus,
    pub outcome: Outcome,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub termination_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub variants: Vec<Variant>,
}

impl Experiment {
    /// The variant keyed `control`, falling back to the first by ordinal.
    pub fn control_variant(&self) -> Option<&Variant> {
        self.variants
            .iter()
            .find(|variant| variant.key == "control")
            .or_else(|| self.variants.first())
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "name": self.name,
            "description": self.description,
            "hypothesis": self.hypothesis,
            "owner": self.owner,
            "created_by": self.created_by,
            "unit_type": self.unit_type,
            "tags": self.tags,
            "targeting": self.targeting.to_value(),
            "ramp_pct": self.ramp_pct,
            "assignment_policy": self.policy,
            "version": self.version,
            "mde": self.mde,
            "baseline_rate": self.baseline_rate,
            "alpha": self.alpha,
            "power": self.power,
            "sample_size_required": self.sample_size_required,
            "status": self.status,
            "outcome": self.outcome,
            "started_at": self.started_at,
            "ended_at": self.ended_at,
            "termination_reason": self.termination_reason,
            "created_at": self.created_at,
            "updated_at": self.updated_at,
            "variants": self.variants.iter().map(Variant::to_value).collect::<Vec<_>>(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub id: String,
    pub experiment_id: String,
    pub unit_id: String,
    pub variant_id: String,
    pub assigned_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

/// Pre-period events calibrate diff-in-diff; everything else is post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Pre,
    #[default]
    Post,
}

impl Period {
    pub fn as_str(self) -> &'static str {
        match self {
            Period::Pre => "pre",
            Period::Post => "post",
        }
    }

    pub fn parse(token: &str) -> CoreResult<Period> {
        match token {
            "pre" => Ok(Period::Pre),
            "post" => Ok(Period::Post),
            other => Err(CoreError::invalid(format!("unknown period: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Exposure,
    Conversion,
    Metric { name: String },
}

impl EventKind {
    pub fn type_str(&self) -> &'static str {
        match self {
            EventKind::Exposure => "exposure",
            EventKind::Conversion => "conversion",
            EventKind::Metric { .. } => "metric",
        }
    }

    pub fn metric_name(&self) -> Option<&str> {
        match self {
            EventKind::Metric { name } => Some(name),
            _ => None,
        }
    }

    pub fn parse(event_type: &str, metric_name: Option<&str>) -> CoreResult<EventKind> {
        match event_type {
            "exposure" => Ok(EventKind::Exposure),
            "conversion" => Ok(EventKind::Conversion),
            "metric" => match metric_name {
                Some(name) if !name.trim().is_empty() => Ok(EventKind::Metric {
                    name: name.to_string(),
                }),
                _ => Err(CoreError::invalid(
                    "metric events require a non-empty metric_name".to_string(),
                )),
            },
            other => Err(CoreError::invalid(format!("unknown event_type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: String,
    pub experiment_id: String,
    pub unit_id: String,
    pub variant_id: Option<String>,
    pub kind: EventKind,
    pub period: Period,
    pub value: f64,
    pub context: Value,
    pub observed_at: DateTime<Utc>,
}

impl Event {
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "experiment_id": self.experiment_id,
            "unit_id": self.unit_id,
            "variant_id": self.variant_id,
            "event_type": self.kind.type_str(),
            "metric_name": self.kind.metric_name(),
            "period": self.period,
            "value": self.value,
            "context_json": self.context,
            "observed_at": self.observed_at,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardrailDirection {
    Max,
    Min,
}

impl GuardrailDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            GuardrailDirection::Max => "max",
            GuardrailDirection::Min => "min",
        }
    }

    pub fn parse(token: &str) -> CoreResult<GuardrailDirection> {
        match token {
            "max" => Ok(GuardrailDirection::Max),
            "min" => Ok(GuardrailDirection::Min),
            other => Err(CoreError::invalid(format!(
                "unknown guardrail direction: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardrailStatus {
    Healthy,
    Breached,
}

impl GuardrailStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GuardrailStatus::Healthy => "healthy",
            GuardrailStatus::Breached => "breached",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuardrailObservation {
    pub id: String,
    pub experiment_id: String,
    pub name: String,
    pub value: f64,
    pub threshold: f64,
    pub direction: GuardrailDirection,
    pub status: GuardrailStatus,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionSource {
    Auto,
    Manual,
}

impl DecisionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionSource::Auto => "auto",
            DecisionSource::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionAudit {
    pub id: String,
    pub experiment_id: String,
    pub previous_status: String,
    pub new_status: String,
    pub reason: Option<String>,
    pub source: DecisionSource,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportSnapshot {
    pub id: String,
    pub experiment_id: String,
    pub snapshot_json: String,
    pub created_at: DateTime<Utc>,
}

impl ReportSnapshot {
    /// Stored documents that fail to parse degrade to an empty object.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "experiment_id": self.experiment_id,
            "report": serde_json::from_str::<Value>(&self.snapshot_json)
                .unwrap_or_else(|_| Value::Object(Map::new())),
            "created_at": self.created_at,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    ContinueCollecting,
    Pass,
    Fail,
    Inconclusive,
}

impl Recommendation {
    pub fn as_str(self) -> &'static str {
        match self {
            Recommendation::ContinueCollecting => "continue_collecting",
            Recommendation::Pass => "pass",
            Recommendation::Fail => "fail",
            Recommendation::Inconclusive => "inconclusive",
        }
    }
}

/// Per-variant pre/post counters inside a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantPerformance {
    pub variant_id: String,
    pub variant_name: String,
    pub post_exposures: u64,
    pub post_conversions: u64,
    pub post_conversion_rate: f64,
    pub pre_exposures: u64,
    pub pre_conversions: u64,
    pub pre_conversion_rate: f64,
}

/// Beta posterior summary for one variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanditArm {
    pub variant_id: String,
    pub variant_name: String,
    pub exposures: u64,
    pub conversions: u64,
    pub alpha: f64,
    pub beta: f64,
    pub expected_rate: f64,
    pub win_probability: f64,
}

/// Guardrail entry surfaced in a report: latest observation per name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailSummary {
    pub name: String,
    pub value: f64,
    pub threshold: f64,
    pub direction: GuardrailDirection,
    pub status: GuardrailStatus,
    pub observed_at: DateTime<Utc>,
}

impl From<&GuardrailObservation> for GuardrailSummary {
    fn from(observation: &GuardrailObservation) -> GuardrailSummary {
        GuardrailSummary {
            name: observation.name.clone(),
            value: observation.value,
            threshold: observation.threshold,
            direction: observation.direction,
            status: observation.status,
            observed_at: observation.observed_at,
        }
    }
}

/// The full analysis document returned by the report builder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub experiment_id: String,
    pub status: ExperimentStatus,
    pub outcome: Outcome,
    pub mde: f64,
    pub sample_size_required: i64,
    pub exposures: u64,
    pub conversions: u64,
    pub sample_progress: f64,
    pub control_conversion_rate: f64,
    pub treatment_conversion_rate: f64,
    pub uplift_vs_control: f64,
    pub uplift_ci_lower: f64,
    pub uplift_ci_upper: f64,
    pub p_value: f64,
    pub confidence: f64,
    pub recommendation: Recommendation,
    pub guardrails_breached: u64,
    pub guardrails: Vec<GuardrailSummary>,
    pub estimated_days_to_decision: Option<i64>,
    pub diff_in_diff_delta: Option<f64>,
    pub variant_performance: Vec<VariantPerformance>,
    pub assignment_policy: AssignmentPolicy,
    pub bandit_state: Vec<BanditArm>,
    pub last_updated_at: DateTime<Utc>,
}
