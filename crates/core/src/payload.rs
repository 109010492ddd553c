//! Request and response payloads for the public operations.
//!
//! These are the wire shapes; validation happens in [`ExperimentCreate::validate`]
//! and the ingest service, before anything touches the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};
use crate::model::AssignmentPolicy;
use crate::targeting::Targeting;

/// Tolerance on the variant weight sum.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-3;

#[derive(Debug, Clone, Deserialize)]
pub struct VariantCreate {
    #[serde(default)]
    pub key: Option<String>,
    pub name: String,
    pub weight: f64,
    #[serde(default = "empty_object")]
    pub config: Value,
}

impl VariantCreate {
    /// Explicit key, or the name lowercased with spaces collapsed to '_'.
    pub fn resolved_key(&self) -> String {
        match &self.key {
            Some(key) if !key.trim().is_empty() => key.clone(),
            _ => self.name.to_lowercase().replace(' ', "_"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentCreate {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub hypothesis: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default = "default_unit_type")]
    pub unit_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "empty_object")]
    pub targeting: Value,
    #[serde(default)]
    pub ramp_pct: i64,
    #[serde(default)]
    pub assignment_policy: AssignmentPolicy,
    #[serde(default = "default_mde")]
    pub mde: f64,
    #[serde(default = "default_baseline_rate")]
    pub baseline_rate: f64,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_power")]
    pub power: f64,
    pub variants: Vec<VariantCreate>,
}

impl ExperimentCreate {
    /// Full create-time validation; returns the parsed targeting so the
    /// caller does not re-parse.
    pub fn validate(&self) -> CoreResult<Targeting> {
        if self.name.trim().len() < 3 {
            return Err(CoreError::invalid("name must be at least 3 characters"));
        }
        for (field, value) in [
            ("mde", self.mde),
            ("baseline_rate", self.baseline_rate),
            ("alpha", self.alpha),
            ("power", self.power),
        ] {
            if !(value > 0.0 && value < 1.0) {
                return Err(CoreError::invalid(format!(
                    "{field} must be in the open interval (0, 1)"
                )));
            }
        }
        if !(0..=100).contains(&self.ramp_pct) {
            return Err(CoreError::invalid("ramp_pct must be between 0 and 100"));
        }
        validate_variants(&self.variants)?;
        Targeting::parse(&self.targeting)
    }
}

pub fn validate_variants(variants: &[VariantCreate]) -> CoreResult<()> {
    if variants.len() < 2 {
        return Err(CoreError::invalid("at least two variants are required"));
    }
    if variants.iter().any(|variant| variant.weight <= 0.0) {
        return Err(CoreError::invalid("variant weights must be positive"));
    }
    let total: f64 = variants.iter().map(|variant| variant.weight).sum();
    if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(CoreError::invalid("variant weights must sum to 1.0"));
    }
    let mut keys = std::collections::HashSet::new();
    for variant in variants {
        if !keys.insert(variant.resolved_key()) {
            return Err(CoreError::invalid(format!(
                "duplicate variant key: {}",
                variant.resolved_key()
            )));
        }
    }
    Ok(())
}

/// Partial update; absent fields keep their current values. Supplying
/// variants replaces the whole set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExperimentPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub targeting: Option<Value>,
    #[serde(default)]
    pub ramp_pct: Option<i64>,
    #[serde(default)]
    pub variants: Option<Vec<VariantCreate>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventCreate {
    pub experiment_id: String,
    pub unit_id: String,
    #[serde(default)]
    pub variant_id: Option<String>,
    pub event_type: String,
    #[serde(default)]
    pub metric_name: Option<String>,
    #[serde(default = "default_period")]
    pub period: String,
    #[serde(default = "default_value")]
    pub value: f64,
    #[serde(default = "empty_object")]
    pub context: Value,
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExposureIngest {
    pub experiment_id: String,
    pub unit_id: String,
    pub variant_key: String,
    #[serde(default)]
    pub ts: Option<DateTime<Utc>>,
    #[serde(default)]
    pub context: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricIngest {
    pub experiment_id: String,
    pub unit_id: String,
    pub variant_key: String,
    pub metric_name: String,
    pub value: f64,
    #[serde(default)]
    pub ts: Option<DateTime<Utc>>,
    #[serde(default)]
    pub context: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuardrailCreate {
    pub experiment_id: String,
    pub name: String,
    pub value: f64,
    pub threshold: f64,
    pub direction: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignmentRequest {
    pub experiment_id: String,
    pub unit_id: String,
    #[serde(default = "empty_map")]
    pub attributes: Map<String, Value>,
}

/// What a caller needs to act on an assignment.
#[derive(Debug, Clone, Serialize)]
pub struct AssignmentResponse {
    pub experiment_id: String,
    pub assignment_id: String,
    pub unit_id: String,
    pub variant_key: String,
    pub config_json: Value,
    pub experiment_version: i64,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn empty_map() -> Map<String, Value> {
    Map::new()
}

fn default_unit_type() -> String {
    "user_id".to_string()
}

fn default_period() -> String {
    "post".to_string()
}

fn default_value() -> f64 {
    1.0
}

fn default_mde() -> f64 {
    0.05
}

fn default_baseline_rate() -> f64 {
    0.1
}

fn default_alpha() -> f64 {
    0.05
}

fn default_power() -> f64 {
    0.8
}
