//! Lifecycle state machine tests.

use serde_json::json;

use super::{checkout_experiment, experiment_payload, memory_platform};
use crate::error::CoreError;
use crate::model::{DecisionSource, ExperimentStatus, Outcome};
use crate::payload::ExperimentPatch;

#[test]
fn test_lifecycle_guards_end_to_end() {
    let platform = memory_platform();
    let experiment = platform.create_experiment(&checkout_experiment()).unwrap();
    assert_eq!(experiment.status, ExperimentStatus::Draft);
    assert_eq!(experiment.version, 1);

    // DRAFT cannot pause.
    assert!(matches!(
        platform.pause(&experiment.id),
        Err(CoreError::Conflict(_))
    ));

    // Launch with ramp 0 is rejected.
    assert!(matches!(
        platform.launch(&experiment.id, Some(0)),
        Err(CoreError::ValidationFailed(_))
    ));

    let running = platform.launch(&experiment.id, Some(10)).unwrap();
    assert_eq!(running.status, ExperimentStatus::Running);
    assert_eq!(running.ramp_pct, 10);
    assert!(running.started_at.is_some());
    assert!(running.version > experiment.version);

    let paused = platform.pause(&experiment.id).unwrap();
    assert_eq!(paused.status, ExperimentStatus::Paused);

    let relaunched = platform.launch(&experiment.id, Some(30)).unwrap();
    assert_eq!(relaunched.status, ExperimentStatus::Running);
    assert_eq!(relaunched.ramp_pct, 30);

    let stopped = platform.stop(&experiment.id, None).unwrap();
    assert_eq!(stopped.status, ExperimentStatus::Stopped);
    assert_eq!(stopped.ramp_pct, 0);
    assert!(stopped.ended_at.is_some());
    assert_eq!(stopped.termination_reason.as_deref(), Some("Stopped manually"));

    // Terminal: relaunch is a conflict.
    assert!(matches!(
        platform.launch(&experiment.id, Some(50)),
        Err(CoreError::Conflict(_))
    ));
}

#[test]
fn test_stop_is_idempotent() {
    let platform = memory_platform();
    let experiment = platform.create_experiment(&checkout_experiment()).unwrap();
    platform.launch(&experiment.id, Some(100)).unwrap();

    let first = platform
        .stop(&experiment.id, Some("rollout done".to_string()))
        .unwrap();
    let second = platform.stop(&experiment.id, Some("again".to_string())).unwrap();
    assert_eq!(second.status, ExperimentStatus::Stopped);
    // The second stop is a no-op: no version bump, reason unchanged.
    assert_eq!(second.version, first.version);
    assert_eq!(second.termination_reason.as_deref(), Some("rollout done"));
}

#[test]
fn test_version_strictly_increases_across_transitions() {
    let platform = memory_platform();
    let experiment = platform.create_experiment(&checkout_experiment()).unwrap();

    let mut last_version = experiment.version;
    for current in [
        platform.launch(&experiment.id, Some(20)).unwrap(),
        platform.pause(&experiment.id).unwrap(),
        platform.launch(&experiment.id, None).unwrap(),
        platform.stop(&experiment.id, None).unwrap(),
    ] {
        assert!(current.version > last_version);
        last_version = current.version;
    }
}

#[test]
fn test_every_transition_writes_one_audit_row() {
    let platform = memory_platform();
    let experiment = platform.create_experiment(&checkout_experiment()).unwrap();
    platform.launch(&experiment.id, Some(10)).unwrap();
    platform.pause(&experiment.id).unwrap();
    platform.launch(&experiment.id, Some(30)).unwrap();
    platform.stop(&experiment.id, None).unwrap();

    let history = platform.decision_history(&experiment.id).unwrap();
    assert_eq!(history.len(), 4);
    // Newest first.
    assert_eq!(history[0].new_status, "stopped");
    assert_eq!(history[0].previous_status, "running");
    assert_eq!(history[3].new_status, "running");
    assert_eq!(history[3].previous_status, "draft");
    assert!(history.iter().all(|audit| audit.source == DecisionSource::Manual));
}

#[test]
fn test_patch_bumps_version_and_replaces_variants() {
    let platform = memory_platform();
    let experiment = platform.create_experiment(&checkout_experiment()).unwrap();

    let patch = ExperimentPatch {
        name: Some("checkout-cta-v2".to_string()),
        ramp_pct: Some(50),
        variants: Some(
            serde_json::from_value(json!([
                {"key": "control", "name": "Control", "weight": 0.5},
                {"key": "blue", "name": "Blue CTA", "weight": 0.25},
                {"key": "green", "name": "Green CTA", "weight": 0.25}
            ]))
            .unwrap(),
        ),
        ..ExperimentPatch::default()
    };
    let patched = platform.patch_experiment(&experiment.id, &patch).unwrap();
    assert_eq!(patched.name, "checkout-cta-v2");
    assert_eq!(patched.ramp_pct, 50);
    assert_eq!(patched.variants.len(), 3);
    assert_eq!(patched.version, experiment.version + 1);

    let reread = platform.get_experiment(&experiment.id).unwrap();
    assert_eq!(reread.variants.len(), 3);
    assert_eq!(reread.variants[1].key, "blue");
}

#[test]
fn test_patch_rejects_bad_variant_weights() {
    let platform = memory_platform();
    let experiment = platform.create_experiment(&checkout_experiment()).unwrap();

    let patch = ExperimentPatch {
        variants: Some(
            serde_json::from_value(json!([
                {"key": "control", "name": "Control", "weight": 0.9},
                {"key": "treatment", "name": "Treatment", "weight": 0.2}
            ]))
            .unwrap(),
        ),
        ..ExperimentPatch::default()
    };
    assert!(matches!(
        platform.patch_experiment(&experiment.id, &patch),
        Err(CoreError::InvalidArgument(_))
    ));
}

#[test]
fn test_override_status_maps_legacy_tokens() {
    let platform = memory_platform();
    let experiment = platform.create_experiment(&checkout_experiment()).unwrap();
    platform.launch(&experiment.id, Some(100)).unwrap();

    let overridden = platform
        .override_status(
            &experiment.id,
            "passed",
            Some("manual call".to_string()),
            "alice",
        )
        .unwrap();
    assert_eq!(overridden.status, ExperimentStatus::Stopped);
    assert_eq!(overridden.outcome, Outcome::Passed);
    assert!(overridden.ended_at.is_some());

    let history = platform.decision_history(&experiment.id).unwrap();
    assert_eq!(history[0].new_status, "passed");
    assert_eq!(history[0].actor, "alice");
    assert_eq!(history[0].source, DecisionSource::Manual);
}

#[test]
fn test_override_status_is_a_noop_at_target() {
    let platform = memory_platform();
    let experiment = platform.create_experiment(&checkout_experiment()).unwrap();
    platform.launch(&experiment.id, Some(100)).unwrap();
    platform
        .override_status(&experiment.id, "failed", None, "alice")
        .unwrap();
    let before = platform.decision_history(&experiment.id).unwrap().len();

    let again = platform
        .override_status(&experiment.id, "failed", None, "alice")
        .unwrap();
    assert_eq!(again.outcome, Outcome::Failed);
    assert_eq!(platform.decision_history(&experiment.id).unwrap().len(), before);
}

#[test]
fn test_override_status_rejects_unknown_token() {
    let platform = memory_platform();
    let experiment = platform.create_experiment(&checkout_experiment()).unwrap();
    assert!(matches!(
        platform.override_status(&experiment.id, "archived", None, "alice"),
        Err(CoreError::InvalidArgument(_))
    ));
}

#[test]
fn test_create_rejects_invalid_payloads() {
    let platform = memory_platform();

    // Weight sum off by more than the tolerance.
    let payload = experiment_payload(json!({
        "name": "bad-weights",
        "variants": [
            {"key": "control", "name": "Control", "weight": 0.9},
            {"key": "treatment", "name": "Treatment", "weight": 0.2}
        ]
    }));
    assert!(platform.create_experiment(&payload).is_err());

    // Fewer than two variants.
    let payload = experiment_payload(json!({
        "name": "one-armed",
        "variants": [{"key": "control", "name": "Control", "weight": 1.0}]
    }));
    assert!(platform.create_experiment(&payload).is_err());

    // Statistical inputs outside (0, 1).
    let payload = experiment_payload(json!({
        "name": "bad-alpha",
        "alpha": 1.5,
        "variants": [
            {"key": "control", "name": "Control", "weight": 0.5},
            {"key": "treatment", "name": "Treatment", "weight": 0.5}
        ]
    }));
    assert!(platform.create_experiment(&payload).is_err());

    // Unknown targeting operator.
    let payload = experiment_payload(json!({
        "name": "bad-operator",
        "targeting": {"country": {"matches": "US"}},
        "variants": [
            {"key": "control", "name": "Control", "weight": 0.5},
            {"key": "treatment", "name": "Treatment", "weight": 0.5}
        ]
    }));
    assert!(platform.create_experiment(&payload).is_err());
}

#[test]
fn test_sample_size_derived_on_create() {
    let platform = memory_platform();
    let experiment = platform.create_experiment(&checkout_experiment()).unwrap();
    // Defaults: baseline 0.1, mde 0.05, alpha 0.05, power 0.8.
    assert_eq!(experiment.sample_size_required, 1370);
}

#[test]
fn test_list_experiments_newest_first() {
    let platform = memory_platform();
    let first = platform.create_experiment(&checkout_experiment()).unwrap();
    let second = platform
        .create_experiment(&experiment_payload(json!({
            "name": "second-experiment",
            "variants": [
                {"key": "control", "name": "Control", "weight": 0.5},
                {"key": "treatment", "name": "Treatment", "weight": 0.5}
            ]
        })))
        .unwrap();

    let listed = platform.list_experiments().unwrap();
    assert_eq!(listed.len(), 2);
    let ids: Vec<&str> = listed.iter().map(|experiment| experiment.id.as_str()).collect();
    assert!(ids.contains(&first.id.as_str()));
    assert_eq!(ids[0], second.id);
}
