//! Report builder and auto-transition tests.

use serde_json::json;

use super::{checkout_experiment, memory_platform};
use crate::error::CoreError;
use crate::model::{
    DecisionSource, Experiment, ExperimentStatus, Outcome, Recommendation,
};
use crate::payload::{EventCreate, ExposureIngest, GuardrailCreate};
use crate::platform::Platform;

fn exposures(experiment_id: &str, variant_key: &str, count: usize, tag: &str) -> Vec<ExposureIngest> {
    (0..count)
        .map(|i| ExposureIngest {
            experiment_id: experiment_id.to_string(),
            unit_id: format!("{tag}-{variant_key}-{i}"),
            variant_key: variant_key.to_string(),
            ts: None,
            context: None,
        })
        .collect()
}

fn conversions(experiment: &Experiment, variant_key: &str, count: usize, period: &str) -> Vec<EventCreate> {
    let variant_id = experiment
        .variants
        .iter()
        .find(|variant| variant.key == variant_key)
        .map(|variant| variant.id.clone())
        .expect("variant");
    (0..count)
        .map(|i| EventCreate {
            experiment_id: experiment.id.clone(),
            unit_id: format!("conv-{variant_key}-{i}"),
            variant_id: Some(variant_id.clone()),
            event_type: "conversion".to_string(),
            metric_name: None,
            period: period.to_string(),
            value: 1.0,
            context: json!({}),
            observed_at: None,
        })
        .collect()
}

/// Running experiment with 800/800 exposures and the given conversions.
fn seeded_experiment(
    platform: &Platform,
    control_conversions: usize,
    treatment_conversions: usize,
) -> Experiment {
    let experiment = platform.create_experiment(&checkout_experiment()).unwrap();
    platform.launch(&experiment.id, Some(100)).unwrap();
    let experiment = platform.get_experiment(&experiment.id).unwrap();

    platform
        .ingest_exposures(&exposures(&experiment.id, "control", 800, "e"))
        .unwrap();
    platform
        .ingest_exposures(&exposures(&experiment.id, "treatment", 800, "e"))
        .unwrap();
    platform
        .ingest_events(&conversions(&experiment, "control", control_conversions, "post"))
        .unwrap();
    platform
        .ingest_events(&conversions(&experiment, "treatment", treatment_conversions, "post"))
        .unwrap();
    experiment
}

#[test]
fn test_report_before_any_data() {
    let platform = memory_platform();
    let experiment = platform.create_experiment(&checkout_experiment()).unwrap();
    platform.launch(&experiment.id, Some(100)).unwrap();

    let report = platform.report(&experiment.id).unwrap();
    assert_eq!(report.exposures, 0);
    assert_eq!(report.conversions, 0);
    assert_eq!(report.sample_progress, 0.0);
    assert_eq!(report.recommendation, Recommendation::ContinueCollecting);
    assert_eq!(report.estimated_days_to_decision, None);
    assert_eq!(report.p_value, 1.0);
    assert_eq!(report.confidence, 0.0);
    // Bare priors in the bandit state.
    assert_eq!(report.bandit_state.len(), 2);
    assert_eq!(report.bandit_state[0].alpha, 1.0);

    // No transition fires below full sample.
    let reread = platform.get_experiment(&experiment.id).unwrap();
    assert_eq!(reread.status, ExperimentStatus::Running);
}

#[test]
fn test_report_sample_progress_caps_at_one() {
    let platform = memory_platform();
    let experiment = seeded_experiment(&platform, 100, 130);
    let report = platform.report(&experiment.id).unwrap();
    // 1600 exposures against 1370 required.
    assert_eq!(report.exposures, 1600);
    assert_eq!(report.sample_progress, 1.0);
    assert_eq!(report.estimated_days_to_decision, Some(0));
}

#[test]
fn test_guardrail_breach_forces_fail_and_auto_stop() {
    let platform = memory_platform();
    let experiment = seeded_experiment(&platform, 100, 130);
    platform
        .create_guardrail(&GuardrailCreate {
            experiment_id: experiment.id.clone(),
            name: "p95_latency_ms".to_string(),
            value: 460.0,
            threshold: 350.0,
            direction: "max".to_string(),
        })
        .unwrap();

    let report = platform.report(&experiment.id).unwrap();
    assert_eq!(report.guardrails_breached, 1);
    assert_eq!(report.recommendation, Recommendation::Fail);

    let stopped = platform.get_experiment(&experiment.id).unwrap();
    assert_eq!(stopped.status, ExperimentStatus::Stopped);
    assert_eq!(stopped.outcome, Outcome::Failed);
    assert!(stopped.ended_at.is_some());

    let history = platform.decision_history(&experiment.id).unwrap();
    assert_eq!(history[0].source, DecisionSource::Auto);
    assert_eq!(history[0].new_status, "failed");
    assert_eq!(
        history[0].reason.as_deref(),
        Some("Auto transition from recommendation=fail")
    );
}

#[test]
fn test_clear_winner_passes_and_auto_stops() {
    let platform = memory_platform();
    // 10% control vs 25% treatment: uplift 0.15 >= mde 0.05, tiny p.
    let experiment = seeded_experiment(&platform, 80, 200);

    let report = platform.report(&experiment.id).unwrap();
    assert_eq!(report.recommendation, Recommendation::Pass);
    assert!(report.p_value <= 0.05);
    assert!(report.uplift_vs_control >= 0.05);

    let stopped = platform.get_experiment(&experiment.id).unwrap();
    assert_eq!(stopped.status, ExperimentStatus::Stopped);
    assert_eq!(stopped.outcome, Outcome::Passed);
}

#[test]
fn test_small_insignificant_uplift_is_inconclusive() {
    let platform = memory_platform();
    let experiment = seeded_experiment(&platform, 100, 104);

    let report = platform.report(&experiment.id).unwrap();
    assert_eq!(report.recommendation, Recommendation::Inconclusive);

    let stopped = platform.get_experiment(&experiment.id).unwrap();
    assert_eq!(stopped.status, ExperimentStatus::Stopped);
    assert_eq!(stopped.outcome, Outcome::Inconclusive);
}

#[test]
fn test_significant_negative_uplift_fails() {
    let platform = memory_platform();
    // Treatment clearly worse: 12.5% vs 6%.
    let experiment = seeded_experiment(&platform, 100, 48);

    let report = platform.report(&experiment.id).unwrap();
    assert!(report.uplift_vs_control < 0.0);
    assert_eq!(report.recommendation, Recommendation::Fail);
}

#[test]
fn test_auto_transition_only_fires_from_running() {
    let platform = memory_platform();
    let experiment = seeded_experiment(&platform, 100, 130);
    platform.pause(&experiment.id).unwrap();

    let report = platform.report(&experiment.id).unwrap();
    assert_eq!(report.sample_progress, 1.0);
    let reread = platform.get_experiment(&experiment.id).unwrap();
    assert_eq!(reread.status, ExperimentStatus::Paused);
}

#[test]
fn test_estimated_days_projection() {
    let platform = memory_platform();
    let experiment = platform.create_experiment(&checkout_experiment()).unwrap();
    platform.launch(&experiment.id, Some(100)).unwrap();
    platform
        .ingest_exposures(&exposures(&experiment.id, "control", 200, "e"))
        .unwrap();

    let report = platform.report(&experiment.id).unwrap();
    // (1370 - 200) / 200 exposures per day.
    assert_eq!(report.estimated_days_to_decision, Some(5));
    assert_eq!(report.recommendation, Recommendation::ContinueCollecting);
}

#[test]
fn test_diff_in_diff_requires_pre_period_on_both_sides() {
    let platform = memory_platform();
    let experiment = seeded_experiment(&platform, 100, 130);

    let report = platform.report(&experiment.id).unwrap();
    assert_eq!(report.diff_in_diff_delta, None);

    // Add pre-period exposures for both pools.
    let experiment_full = platform.get_experiment(&experiment.id).unwrap();
    for key in ["control", "treatment"] {
        let variant_id = experiment_full
            .variants
            .iter()
            .find(|variant| variant.key == key)
            .unwrap()
            .id
            .clone();
        let events: Vec<EventCreate> = (0..50)
            .map(|i| EventCreate {
                experiment_id: experiment.id.clone(),
                unit_id: format!("pre-{key}-{i}"),
                variant_id: Some(variant_id.clone()),
                event_type: "exposure".to_string(),
                metric_name: None,
                period: "pre".to_string(),
                value: 1.0,
                context: json!({}),
                observed_at: None,
            })
            .collect();
        platform.ingest_events(&events).unwrap();
    }

    let report = platform.report(&experiment.id).unwrap();
    assert!(report.diff_in_diff_delta.is_some());
}

#[test]
fn test_report_snapshot_round_trip_preserves_key_set() {
    let platform = memory_platform();
    let experiment = seeded_experiment(&platform, 100, 130);
    let report = platform.report(&experiment.id).unwrap();

    let snapshots = platform.list_snapshots(&experiment.id).unwrap();
    assert_eq!(snapshots.len(), 1);

    let report_value = serde_json::to_value(&report).unwrap();
    let report_keys: Vec<&String> = report_value.as_object().unwrap().keys().collect();
    let snapshot_keys: Vec<&String> = snapshots[0]["report"].as_object().unwrap().keys().collect();
    assert_eq!(report_keys, snapshot_keys);
}

#[test]
fn test_snapshots_accumulate_newest_first() {
    let platform = memory_platform();
    let experiment = platform.create_experiment(&checkout_experiment()).unwrap();
    platform.launch(&experiment.id, Some(100)).unwrap();

    platform.report(&experiment.id).unwrap();
    platform.report(&experiment.id).unwrap();
    platform.report(&experiment.id).unwrap();

    let snapshots = platform.list_snapshots(&experiment.id).unwrap();
    assert_eq!(snapshots.len(), 3);
    let newest = snapshots[0]["created_at"].as_str().unwrap().to_string();
    let oldest = snapshots[2]["created_at"].as_str().unwrap().to_string();
    assert!(newest >= oldest);
}

#[test]
fn test_bandit_state_reflects_counts() {
    let platform = memory_platform();
    let experiment = seeded_experiment(&platform, 100, 130);
    let report = platform.report(&experiment.id).unwrap();

    let control = report
        .bandit_state
        .iter()
        .find(|arm| arm.variant_name == "Control")
        .unwrap();
    assert_eq!(control.exposures, 800);
    assert_eq!(control.conversions, 100);
    assert_eq!(control.alpha, 101.0);
    assert_eq!(control.beta, 701.0);

    let win_total: f64 = report
        .bandit_state
        .iter()
        .map(|arm| arm.win_probability)
        .sum();
    assert!((win_total - 1.0).abs() < 0.01);
}

#[test]
fn test_export_formats() {
    let platform = memory_platform();
    let experiment = seeded_experiment(&platform, 100, 130);

    let json_export = platform.export_report(&experiment.id, "json").unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json_export).unwrap();
    assert_eq!(parsed["experiment_id"], experiment.id);

    let csv_export = platform.export_report(&experiment.id, "csv").unwrap();
    let mut lines = csv_export.lines();
    assert!(lines.next().unwrap().starts_with("experiment_id,status,recommendation"));
    assert!(lines.next().unwrap().starts_with(&experiment.id));

    assert!(matches!(
        platform.export_report(&experiment.id, "xml"),
        Err(CoreError::InvalidArgument(_))
    ));
}

#[test]
fn test_condensed_running_reports() {
    let platform = memory_platform();
    let experiment = platform.create_experiment(&checkout_experiment()).unwrap();
    platform.launch(&experiment.id, Some(100)).unwrap();
    platform
        .ingest_exposures(&exposures(&experiment.id, "control", 10, "e"))
        .unwrap();

    let cards = platform.condensed_running_reports().unwrap();
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].experiment_id, experiment.id);
    assert_eq!(cards[0].exposures, 10);

    platform.stop(&experiment.id, None).unwrap();
    assert!(platform.condensed_running_reports().unwrap().is_empty());
}

#[test]
fn test_executive_summary_counts_by_status() {
    let platform = memory_platform();
    let first = platform.create_experiment(&checkout_experiment()).unwrap();
    platform.create_experiment(&checkout_experiment()).unwrap();
    platform.launch(&first.id, Some(100)).unwrap();

    let summary = platform.executive_summary().unwrap();
    assert_eq!(summary["draft"], 1);
    assert_eq!(summary["running"], 1);
    assert_eq!(summary["paused"], 0);
    assert_eq!(summary["stopped"], 0);
}
