//! Sticky variant assignment.
//!
//! A unit entering a running experiment is gated by targeting and ramp, then
//! mapped to a variant by the experiment's policy. The decision is persisted
//! and never recomputed while the assignment stays active; stickiness comes
//! from the store, not from any in-process cache.

use chrono::Utc;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::model::{Assignment, AssignmentPolicy, Experiment, ExperimentStatus, Variant};
use crate::policies::{thompson, weighted};
use crate::rng::{get_rng, seed_from_key};
use crate::stats::{deterministic_bucket, unit_bucket};
use crate::store::Session;

/// Resolve the sticky assignment for (experiment, unit).
///
/// Returns the assignment together with the experiment version the decision
/// was made under. Outside-ramp, targeting-miss and zero-weight cases all
/// land on the control variant.
pub fn assign(
    session: &mut Session<'_>,
    experiment_id: &str,
    unit_id: &str,
    attributes: &Map<String, Value>,
) -> CoreResult<(Assignment, i64)> {
    let experiment = session.get_experiment(experiment_id)?;
    if experiment.status != ExperimentStatus::Running {
        return Err(CoreError::InvalidState(
            "Experiment is not running".to_string(),
        ));
    }

    if let Some(existing) = session.active_assignment(experiment_id, unit_id)? {
        return Ok((existing, experiment.version));
    }

    if experiment.variants.is_empty() {
        return Err(CoreError::Misconfigured(
            "Experiment has no variants configured".to_string(),
        ));
    }
    let control = experiment
        .control_variant()
        .ok_or_else(|| CoreError::Misconfigured("no control variant".to_string()))?;

    let mut chosen = control;
    if experiment.targeting.matches(attributes) && experiment.ramp_pct > 0 {
        let ramp = unit_bucket(
            &experiment.id,
            unit_id,
            &experiment.assignment_salt,
            "ramp",
        );
        if ramp * 100.0 < experiment.ramp_pct as f64 {
            chosen = match experiment.policy {
                AssignmentPolicy::WeightedBucket => {
                    let bucket = unit_bucket(
                        &experiment.id,
                        unit_id,
                        &experiment.assignment_salt,
                        "variant",
                    );
                    weighted::select(&experiment.variants, bucket).unwrap_or(control)
                }
                AssignmentPolicy::ThompsonSampling => {
                    select_thompson(session, &experiment, unit_id)?.unwrap_or(control)
                }
            };
        }
    }

    let assignment = Assignment {
        id: Uuid::new_v4().to_string(),
        experiment_id: experiment.id.clone(),
        unit_id: unit_id.to_string(),
        variant_id: chosen.id.clone(),
        assigned_at: Utc::now(),
        released_at: None,
    };
    if session.try_insert_assignment(&assignment)? {
        tracing::debug!(
            experiment_id = %experiment.id,
            unit_id,
            variant_key = %chosen.key,
            "assignment created"
        );
        return Ok((assignment, experiment.version));
    }

    // Lost the uniqueness race: a concurrent handler assigned this unit
    // first. Their row is the sticky one.
    let winner = session
        .active_assignment(experiment_id, unit_id)?
        .ok_or_else(|| {
            CoreError::Conflict("assignment race lost and winner row missing".to_string())
        })?;
    Ok((winner, experiment.version))
}

/// Thompson selection, seeded per (experiment, unit) so a retry before any
/// posterior update reproduces the same draw.
fn select_thompson<'a>(
    session: &Session<'_>,
    experiment: &'a Experiment,
    unit_id: &str,
) -> CoreResult<Option<&'a Variant>> {
    let counts = session.variant_event_counts(&experiment.id)?;
    let posteriors = thompson::build_posteriors(&experiment.variants, &counts);
    let unit_hash = deterministic_bucket(&format!("{}:{}", experiment.id, unit_id));
    let seed = seed_from_key(&format!("{}:{}:{}", experiment.id, unit_id, unit_hash));
    let mut rng = get_rng(seed);
    Ok(thompson::choose(&posteriors, &mut rng).and_then(|posterior| {
        experiment
            .variants
            .iter()
            .find(|variant| variant.id == posterior.variant_id)
    }))
}
