//! Guardrail evaluation.
//!
//! A guardrail is a secondary KPI with a one-sided threshold. Observations
//! are classified on write; the report consumes the latest observation per
//! name, so a recovered guardrail stops vetoing as soon as a healthy
//! observation lands.

use chrono::Utc;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::model::{GuardrailDirection, GuardrailObservation, GuardrailStatus};
use crate::payload::GuardrailCreate;
use crate::store::Session;

/// Classify a single observation against its threshold.
pub fn evaluate(direction: GuardrailDirection, value: f64, threshold: f64) -> GuardrailStatus {
    let breached = match direction {
        GuardrailDirection::Max => value > threshold,
        GuardrailDirection::Min => value < threshold,
    };
    if breached {
        GuardrailStatus::Breached
    } else {
        GuardrailStatus::Healthy
    }
}

/// Validate, classify and append one observation.
pub fn create_observation(
    session: &mut Session<'_>,
    payload: &GuardrailCreate,
) -> CoreResult<GuardrailObservation> {
    if payload.name.trim().len() < 2 {
        return Err(CoreError::invalid(
            "guardrail name must be at least 2 characters",
        ));
    }
    let direction = GuardrailDirection::parse(&payload.direction)?;
    if !session.experiment_exists(&payload.experiment_id)? {
        return Err(CoreError::not_found("Experiment not found"));
    }

    let observation = GuardrailObservation {
        id: Uuid::new_v4().to_string(),
        experiment_id: payload.experiment_id.clone(),
        name: payload.name.clone(),
        value: payload.value,
        threshold: payload.threshold,
        direction,
        status: evaluate(direction, payload.value, payload.threshold),
        observed_at: Utc::now(),
    };
    session.insert_guardrail(&observation)?;
    if observation.status == GuardrailStatus::Breached {
        tracing::warn!(
            experiment_id = %observation.experiment_id,
            name = %observation.name,
            value = observation.value,
            threshold = observation.threshold,
            "guardrail breached"
        );
    }
    Ok(observation)
}

/// Reduce a newest-first history to the latest observation per name.
pub fn latest_per_name(observations: &[GuardrailObservation]) -> Vec<GuardrailObservation> {
    let mut seen = std::collections::HashSet::new();
    observations
        .iter()
        .filter(|observation| seen.insert(observation.name.clone()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn observation(name: &str, status: GuardrailStatus, age_minutes: i64) -> GuardrailObservation {
        GuardrailObservation {
            id: format!("obs-{name}-{age_minutes}"),
            experiment_id: "exp".to_string(),
            name: name.to_string(),
            value: 1.0,
            threshold: 2.0,
            direction: GuardrailDirection::Max,
            status,
            observed_at: Utc::now() - Duration::minutes(age_minutes),
        }
    }

    #[test]
    fn test_evaluate_max_direction() {
        assert_eq!(
            evaluate(GuardrailDirection::Max, 460.0, 350.0),
            GuardrailStatus::Breached
        );
        assert_eq!(
            evaluate(GuardrailDirection::Max, 350.0, 350.0),
            GuardrailStatus::Healthy
        );
    }

    #[test]
    fn test_evaluate_min_direction() {
        assert_eq!(
            evaluate(GuardrailDirection::Min, 0.90, 0.95),
            GuardrailStatus::Breached
        );
        assert_eq!(
            evaluate(GuardrailDirection::Min, 0.99, 0.95),
            GuardrailStatus::Healthy
        );
    }

    #[test]
    fn test_latest_per_name_keeps_first_occurrence() {
        // Newest-first input: the recovered (healthy) observation shadows
        // the older breach of the same name.
        let history = vec![
            observation("p95_latency_ms", GuardrailStatus::Healthy, 0),
            observation("p95_latency_ms", GuardrailStatus::Breached, 10),
            observation("error_rate", GuardrailStatus::Breached, 5),
        ];
        let latest = latest_per_name(&history);
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].name, "p95_latency_ms");
        assert_eq!(latest[0].status, GuardrailStatus::Healthy);
        assert_eq!(latest[1].name, "error_rate");
    }
}
