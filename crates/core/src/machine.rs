//! Experiment lifecycle state machine.
//!
//! ```text
//!   create            launch(ramp>0)
//!  [none] --> DRAFT ----------------> RUNNING <--> PAUSED
//!               |                        |            |
//!               +--------- stop ---------+------------+--> STOPPED (terminal)
//! ```
//!
//! Every status-changing transition bumps the experiment version through a
//! compare-and-set write and appends exactly one decision-audit row. STOPPED
//! is terminal: stop is idempotent and relaunch is rejected.

use chrono::Utc;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::model::{
    DecisionAudit, DecisionSource, Experiment, ExperimentStatus, Outcome, Recommendation,
    Report, StatusChange, Variant,
};
use crate::payload::{validate_variants, ExperimentPatch};
use crate::store::Session;
use crate::targeting::Targeting;

const DEFAULT_STOP_REASON: &str = "Stopped manually";

/// Move a DRAFT or PAUSED experiment to RUNNING.
///
/// An explicit `ramp_pct` overrides the stored one; the effective ramp must
/// be positive or the launch is rejected with `ValidationFailed`.
pub fn launch(
    session: &mut Session<'_>,
    experiment_id: &str,
    ramp_pct: Option<i64>,
) -> CoreResult<Experiment> {
    let mut experiment = session.get_experiment(experiment_id)?;
    if experiment.status == ExperimentStatus::Stopped {
        return Err(CoreError::Conflict(
            "Stopped experiment cannot be relaunched".to_string(),
        ));
    }
    if let Some(ramp_pct) = ramp_pct {
        if !(0..=100).contains(&ramp_pct) {
            return Err(CoreError::invalid("ramp_pct must be between 0 and 100"));
        }
        experiment.ramp_pct = ramp_pct;
    }
    if experiment.ramp_pct <= 0 {
        return Err(CoreError::ValidationFailed(
            "Launch requires ramp_pct greater than 0".to_string(),
        ));
    }

    let expected_version = experiment.version;
    let previous = experiment.status;
    let now = Utc::now();
    if experiment.status != ExperimentStatus::Running {
        experiment.status = ExperimentStatus::Running;
        experiment.outcome = Outcome::None;
        if experiment.started_at.is_none() {
            experiment.started_at = Some(now);
        }
        experiment.ended_at = None;
        experiment.termination_reason = None;
    }
    experiment.version += 1;
    experiment.updated_at = now;
    session.update_experiment(&experiment, expected_version, false)?;
    if previous != ExperimentStatus::Running {
        write_audit(
            session,
            &experiment.id,
            previous.as_str(),
            experiment.status.as_str(),
            None,
            DecisionSource::Manual,
            "system",
        )?;
    }
    tracing::info!(
        experiment_id = %experiment.id,
        ramp_pct = experiment.ramp_pct,
        "experiment launched"
    );
    Ok(experiment)
}

/// RUNNING -> PAUSED; anything else is a conflict.
pub fn pause(session: &mut Session<'_>, experiment_id: &str) -> CoreResult<Experiment> {
    let mut experiment = session.get_experiment(experiment_id)?;
    if experiment.status == ExperimentStatus::Stopped {
        return Err(CoreError::Conflict(
            "Stopped experiment cannot be paused".to_string(),
        ));
    }
    if experiment.status != ExperimentStatus::Running {
        return Err(CoreError::Conflict(
            "Only running experiment can be paused".to_string(),
        ));
    }

    let expected_version = experiment.version;
    let previous = experiment.status;
    experiment.status = ExperimentStatus::Paused;
    experiment.version += 1;
    experiment.updated_at = Utc::now();
    session.update_experiment(&experiment, expected_version, false)?;
    write_audit(
        session,
        &experiment.id,
        previous.as_str(),
        experiment.status.as_str(),
        None,
        DecisionSource::Manual,
        "system",
    )?;
    Ok(experiment)
}

/// Terminal transition. Idempotent: stopping a stopped experiment returns it
/// unchanged. Zeroes the ramp and releases every active assignment.
pub fn stop(
    session: &mut Session<'_>,
    experiment_id: &str,
    reason: Option<String>,
) -> CoreResult<Experiment> {
    let mut experiment = session.get_experiment(experiment_id)?;
    if experiment.status == ExperimentStatus::Stopped {
        return Ok(experiment);
    }

    let expected_version = experiment.version;
    let previous = experiment.status;
    let now = Utc::now();
    let reason = reason.unwrap_or_else(|| DEFAULT_STOP_REASON.to_string());
    experiment.status = ExperimentStatus::Stopped;
    experiment.ended_at = Some(now);
    experiment.termination_reason = Some(reason.clone());
    experiment.ramp_pct = 0;
    experiment.version += 1;
    experiment.updated_at = now;
    session.update_experiment(&experiment, expected_version, false)?;
    let released = session.release_active_assignments(&experiment.id, now)?;
    write_audit(
        session,
        &experiment.id,
        previous.as_str(),
        experiment.status.as_str(),
        Some(reason),
        DecisionSource::Manual,
        "system",
    )?;
    tracing::info!(experiment_id = %experiment.id, released, "experiment stopped");
    Ok(experiment)
}

/// Apply a partial update; supplying variants replaces the whole set.
pub fn patch(
    session: &mut Session<'_>,
    experiment_id: &str,
    payload: &ExperimentPatch,
) -> CoreResult<Experiment> {
    let mut experiment = session.get_experiment(experiment_id)?;
    let expected_version = experiment.version;
    let now = Utc::now();

    if let Some(name) = &payload.name {
        experiment.name = name.clone();
    }
    if let Some(description) = &payload.description {
        experiment.description = description.clone();
        experiment.hypothesis = Some(description.clone());
    }
    if let Some(owner) = &payload.owner {
        experiment.owner = owner.clone();
    }
    if let Some(tags) = &payload.tags {
        experiment.tags = tags.clone();
    }
    if let Some(targeting) = &payload.targeting {
        experiment.targeting = Targeting::parse(targeting)?;
    }
    if let Some(ramp_pct) = payload.ramp_pct {
        if !(0..=100).contains(&ramp_pct) {
            return Err(CoreError::invalid("ramp_pct must be between 0 and 100"));
        }
        experiment.ramp_pct = ramp_pct;
    }
    let replace_variants = if let Some(variants) = &payload.variants {
        validate_variants(variants)?;
        experiment.variants = variants
            .iter()
            .enumerate()
            .map(|(ordinal, variant)| Variant {
                id: Uuid::new_v4().to_string(),
                experiment_id: experiment.id.clone(),
                key: variant.resolved_key(),
                name: variant.name.clone(),
                weight: variant.weight,
                config: variant.config.clone(),
                ordinal: ordinal as i64,
                created_at: now,
            })
            .collect();
        true
    } else {
        false
    };

    experiment.version += 1;
    experiment.updated_at = now;
    session.update_experiment(&experiment, expected_version, replace_variants)?;
    Ok(experiment)
}

/// Forced transition from the decision endpoint. No-op when the experiment
/// is already at the requested status/outcome pair.
pub fn override_status(
    session: &mut Session<'_>,
    experiment_id: &str,
    change: StatusChange,
    reason: Option<String>,
    actor: &str,
) -> CoreResult<Experiment> {
    let mut experiment = session.get_experiment(experiment_id)?;
    if experiment.status == change.status && experiment.outcome == change.outcome {
        return Ok(experiment);
    }

    let expected_version = experiment.version;
    let previous = effective_token(&experiment);
    let now = Utc::now();
    experiment.status = change.status;
    experiment.outcome = change.outcome;
    if change.status != ExperimentStatus::Running {
        experiment.ended_at = Some(now);
    }
    experiment.version += 1;
    experiment.updated_at = now;
    session.update_experiment(&experiment, expected_version, false)?;
    write_audit(
        session,
        &experiment.id,
        previous,
        change.effective_token(),
        reason,
        DecisionSource::Manual,
        actor,
    )?;
    Ok(experiment)
}

/// Auto-transition fired by the report coordinator.
///
/// Only a RUNNING experiment whose sample is complete moves; the
/// recommendation picks the outcome and the audit row records it.
pub fn apply_auto_transition(
    session: &mut Session<'_>,
    experiment: Experiment,
    report: &Report,
) -> CoreResult<Experiment> {
    if experiment.status != ExperimentStatus::Running || report.sample_progress < 1.0 {
        return Ok(experiment);
    }

    let outcome = match report.recommendation {
        Recommendation::Pass => Outcome::Passed,
        Recommendation::Fail => Outcome::Failed,
        _ => Outcome::Inconclusive,
    };
    let mut experiment = experiment;
    let expected_version = experiment.version;
    let previous = effective_token(&experiment);
    let now = Utc::now();
    experiment.status = ExperimentStatus::Stopped;
    experiment.outcome = outcome;
    experiment.ended_at = Some(now);
    experiment.version += 1;
    experiment.updated_at = now;
    session.update_experiment(&experiment, expected_version, false)?;
    write_audit(
        session,
        &experiment.id,
        previous,
        outcome.as_str(),
        Some(format!(
            "Auto transition from recommendation={}",
            report.recommendation.as_str()
        )),
        DecisionSource::Auto,
        "system",
    )?;
    tracing::info!(
        experiment_id = %experiment.id,
        outcome = outcome.as_str(),
        "auto transition applied"
    );
    Ok(experiment)
}

fn effective_token(experiment: &Experiment) -> &'static str {
    StatusChange {
        status: experiment.status,
        outcome: experiment.outcome,
    }
    .effective_token()
}

fn write_audit(
    session: &mut Session<'_>,
    experiment_id: &str,
    previous_status: &str,
    new_status: &str,
    reason: Option<String>,
    source: DecisionSource,
    actor: &str,
) -> CoreResult<()> {
    session.insert_audit(&DecisionAudit {
        id: Uuid::new_v4().to_string(),
        experiment_id: experiment_id.to_string(),
        previous_status: previous_status.to_string(),
        new_status: new_status.to_string(),
        reason,
        source,
        actor: actor.to_string(),
        created_at: Utc::now(),
    })
}
