//! Ingest validation and batch atomicity tests.

use serde_json::json;

use super::{checkout_experiment, memory_platform};
use crate::error::CoreError;
use crate::model::{Experiment, Period};
use crate::payload::{EventCreate, ExposureIngest, MetricIngest};
use crate::platform::Platform;

fn created(platform: &Platform) -> Experiment {
    let experiment = platform.create_experiment(&checkout_experiment()).unwrap();
    platform.launch(&experiment.id, Some(100)).unwrap();
    platform.get_experiment(&experiment.id).unwrap()
}

fn event(experiment: &Experiment, event_type: &str) -> EventCreate {
    EventCreate {
        experiment_id: experiment.id.clone(),
        unit_id: "u-1".to_string(),
        variant_id: Some(experiment.variants[0].id.clone()),
        event_type: event_type.to_string(),
        metric_name: None,
        period: "post".to_string(),
        value: 1.0,
        context: json!({}),
        observed_at: None,
    }
}

#[test]
fn test_ingest_event_round_trips() {
    let platform = memory_platform();
    let experiment = created(&platform);

    let stored = platform.ingest_event(&event(&experiment, "exposure")).unwrap();
    assert_eq!(stored.kind.type_str(), "exposure");
    assert_eq!(stored.period, Period::Post);
    assert_eq!(stored.value, 1.0);
}

#[test]
fn test_unknown_event_type_is_rejected() {
    let platform = memory_platform();
    let experiment = created(&platform);

    let result = platform.ingest_event(&event(&experiment, "pageview"));
    assert!(matches!(result, Err(CoreError::InvalidArgument(_))));
}

#[test]
fn test_metric_event_requires_name() {
    let platform = memory_platform();
    let experiment = created(&platform);

    let mut payload = event(&experiment, "metric");
    assert!(matches!(
        platform.ingest_event(&payload),
        Err(CoreError::InvalidArgument(_))
    ));

    payload.metric_name = Some("  ".to_string());
    assert!(platform.ingest_event(&payload).is_err());

    payload.metric_name = Some("basket_value".to_string());
    let stored = platform.ingest_event(&payload).unwrap();
    assert_eq!(stored.kind.metric_name(), Some("basket_value"));
}

#[test]
fn test_bad_period_is_rejected() {
    let platform = memory_platform();
    let experiment = created(&platform);

    let mut payload = event(&experiment, "exposure");
    payload.period = "mid".to_string();
    assert!(matches!(
        platform.ingest_event(&payload),
        Err(CoreError::InvalidArgument(_))
    ));
}

#[test]
fn test_ingest_event_unknown_experiment() {
    let platform = memory_platform();
    let payload = EventCreate {
        experiment_id: "missing".to_string(),
        unit_id: "u-1".to_string(),
        variant_id: None,
        event_type: "exposure".to_string(),
        metric_name: None,
        period: "post".to_string(),
        value: 1.0,
        context: json!({}),
        observed_at: None,
    };
    assert!(matches!(
        platform.ingest_event(&payload),
        Err(CoreError::NotFound(_))
    ));
}

#[test]
fn test_exposure_batch_resolves_variant_keys() {
    let platform = memory_platform();
    let experiment = created(&platform);

    let batch: Vec<ExposureIngest> = (0..5)
        .map(|i| ExposureIngest {
            experiment_id: experiment.id.clone(),
            unit_id: format!("u-{i}"),
            variant_key: "treatment".to_string(),
            ts: None,
            context: None,
        })
        .collect();
    assert_eq!(platform.ingest_exposures(&batch).unwrap(), 5);

    let report = platform.report(&experiment.id).unwrap();
    assert_eq!(report.exposures, 5);
}

#[test]
fn test_exposure_batch_is_all_or_nothing() {
    let platform = memory_platform();
    let experiment = created(&platform);

    let batch = vec![
        ExposureIngest {
            experiment_id: experiment.id.clone(),
            unit_id: "u-1".to_string(),
            variant_key: "control".to_string(),
            ts: None,
            context: None,
        },
        ExposureIngest {
            experiment_id: experiment.id.clone(),
            unit_id: "u-2".to_string(),
            variant_key: "no-such-variant".to_string(),
            ts: None,
            context: None,
        },
    ];
    assert!(matches!(
        platform.ingest_exposures(&batch),
        Err(CoreError::NotFound(_))
    ));

    // The valid first item must not have been committed.
    let report = platform.report(&experiment.id).unwrap();
    assert_eq!(report.exposures, 0);
}

#[test]
fn test_metric_batch_carries_values() {
    let platform = memory_platform();
    let experiment = created(&platform);

    let batch = vec![
        MetricIngest {
            experiment_id: experiment.id.clone(),
            unit_id: "u-1".to_string(),
            variant_key: "control".to_string(),
            metric_name: "basket_value".to_string(),
            value: 25.0,
            ts: None,
            context: None,
        },
        MetricIngest {
            experiment_id: experiment.id.clone(),
            unit_id: "u-2".to_string(),
            variant_key: "control".to_string(),
            metric_name: "basket_value".to_string(),
            value: 35.0,
            ts: None,
            context: None,
        },
    ];
    assert_eq!(platform.ingest_metrics(&batch).unwrap(), 2);

    let results = platform.results(&experiment.id, "hour").unwrap();
    assert_eq!(results.metric_summaries.len(), 1);
    assert_eq!(results.metric_summaries[0].metric_name, "basket_value");
    assert_eq!(results.metric_summaries[0].count, 2);
    assert_eq!(results.metric_summaries[0].mean, 30.0);
}

#[test]
fn test_metric_batch_rejects_empty_name() {
    let platform = memory_platform();
    let experiment = created(&platform);

    let batch = vec![MetricIngest {
        experiment_id: experiment.id.clone(),
        unit_id: "u-1".to_string(),
        variant_key: "control".to_string(),
        metric_name: " ".to_string(),
        value: 1.0,
        ts: None,
        context: None,
    }];
    assert!(matches!(
        platform.ingest_metrics(&batch),
        Err(CoreError::InvalidArgument(_))
    ));
}

#[test]
fn test_expired_deadline_aborts_batch_without_partial_state() {
    let platform = memory_platform();
    let experiment = created(&platform);

    let batch = vec![event(&experiment, "exposure"), event(&experiment, "exposure")];
    let result = platform.ingest_events_with_deadline(&batch, std::time::Instant::now());
    assert!(matches!(result, Err(CoreError::Timeout)));

    let report = platform.report(&experiment.id).unwrap();
    assert_eq!(report.exposures, 0);
}

#[test]
fn test_expired_deadline_aborts_report() {
    let platform = memory_platform();
    let experiment = created(&platform);
    assert!(matches!(
        platform.report_with_deadline(&experiment.id, std::time::Instant::now()),
        Err(CoreError::Timeout)
    ));
}

#[test]
fn test_event_create_defaults_from_json() {
    let payload: EventCreate = serde_json::from_value(json!({
        "experiment_id": "exp-1",
        "unit_id": "u-1",
        "event_type": "conversion"
    }))
    .unwrap();
    assert_eq!(payload.period, "post");
    assert_eq!(payload.value, 1.0);
    assert!(payload.variant_id.is_none());
    assert!(payload.context.is_object());
}
