//! Interval results: time-bucketed exposure series, per-metric summaries and
//! per-variant lift estimates.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;

use crate::error::{CoreError, CoreResult};
use crate::model::{EventKind, Variant};
use crate::stats;
use crate::store::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Minute,
    Hour,
}

impl Interval {
    pub fn parse(token: &str) -> CoreResult<Interval> {
        match token {
            "minute" => Ok(Interval::Minute),
            "hour" => Ok(Interval::Hour),
            _ => Err(CoreError::invalid("interval must be minute or hour")),
        }
    }

    fn bucket_start(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let truncated = ts.with_second(0).and_then(|ts| ts.with_nanosecond(0));
        let truncated = match self {
            Interval::Minute => truncated,
            Interval::Hour => truncated.and_then(|ts| ts.with_minute(0)),
        };
        truncated.unwrap_or(ts)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExposurePoint {
    pub bucket_start: DateTime<Utc>,
    pub exposures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExposureSeries {
    pub variant_key: String,
    pub variant_name: String,
    pub points: Vec<ExposurePoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricSummary {
    pub variant_key: String,
    pub variant_name: String,
    pub metric_name: String,
    pub count: usize,
    pub mean: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiftEstimate {
    pub variant_key: String,
    pub variant_name: String,
    pub control_rate: f64,
    pub treatment_rate: f64,
    pub absolute_lift: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub p_value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Results {
    pub experiment_id: String,
    pub generated_at: DateTime<Utc>,
    pub exposure_totals: BTreeMap<String, u64>,
    pub exposure_timeseries: Vec<ExposureSeries>,
    pub metric_summaries: Vec<MetricSummary>,
    pub lift_estimates: Vec<LiftEstimate>,
}

/// Aggregate the full event history of one experiment.
pub fn build_results(
    session: &Session<'_>,
    experiment_id: &str,
    interval: Interval,
) -> CoreResult<Results> {
    let experiment = session.get_experiment(experiment_id)?;
    if experiment.variants.is_empty() {
        return Err(CoreError::Misconfigured(
            "Experiment has no variants configured".to_string(),
        ));
    }
    let variant_by_id: HashMap<&str, &Variant> = experiment
        .variants
        .iter()
        .map(|variant| (variant.id.as_str(), variant))
        .collect();
    let control = experiment
        .control_variant()
        .ok_or_else(|| CoreError::Misconfigured("no control variant".to_string()))?;

    let events = session.list_events(experiment_id)?;

    let mut exposures_by_variant: HashMap<String, u64> = HashMap::new();
    let mut conversions_by_variant: HashMap<String, u64> = HashMap::new();
    let mut exposure_points: HashMap<String, BTreeMap<DateTime<Utc>, u64>> = HashMap::new();
    let mut metric_values: BTreeMap<(String, String), Vec<f64>> = BTreeMap::new();

    for event in &events {
        let Some(variant) = event
            .variant_id
            .as_deref()
            .and_then(|variant_id| variant_by_id.get(variant_id))
        else {
            continue;
        };
        match &event.kind {
            EventKind::Exposure => {
                *exposures_by_variant.entry(variant.key.clone()).or_default() += 1;
                *exposure_points
                    .entry(variant.key.clone())
                    .or_default()
                    .entry(interval.bucket_start(event.observed_at))
                    .or_default() += 1;
            }
            EventKind::Conversion => {
                *conversions_by_variant
                    .entry(variant.key.clone())
                    .or_default() += 1;
            }
            EventKind::Metric { name } => {
                metric_values
                    .entry((variant.key.clone(), name.clone()))
                    .or_default()
                    .push(event.value);
            }
        }
    }

    let exposure_timeseries = experiment
        .variants
        .iter()
        .map(|variant| ExposureSeries {
            variant_key: variant.key.clone(),
            variant_name: variant.name.clone(),
            points: exposure_points
                .get(&variant.key)
                .map(|series| {
                    series
                        .iter()
                        .map(|(bucket_start, exposures)| ExposurePoint {
                            bucket_start: *bucket_start,
                            exposures: *exposures,
                        })
                        .collect()
                })
                .unwrap_or_default(),
        })
        .collect();

    let metric_summaries = metric_values
        .iter()
        .filter_map(|((variant_key, metric_name), values)| {
            let variant = experiment
                .variants
                .iter()
                .find(|variant| &variant.key == variant_key)?;
            Some(MetricSummary {
                variant_key: variant_key.clone(),
                variant_name: variant.name.clone(),
                metric_name: metric_name.clone(),
                count: values.len(),
                mean: stats::round_to(values.iter().sum::<f64>() / values.len() as f64, 6),
            })
        })
        .collect();

    let control_exposures = exposures_by_variant.get(&control.key).copied().unwrap_or(0);
    let control_conversions = conversions_by_variant
        .get(&control.key)
        .copied()
        .unwrap_or(0);
    let control_rate = if control_exposures > 0 {
        control_conversions as f64 / control_exposures as f64
    } else {
        0.0
    };

    let mut lift_estimates = Vec::new();
    for variant in &experiment.variants {
        if variant.id == control.id {
            continue;
        }
        let treatment_exposures = exposures_by_variant.get(&variant.key).copied().unwrap_or(0);
        let treatment_conversions = conversions_by_variant
            .get(&variant.key)
            .copied()
            .unwrap_or(0);
        let treatment_rate = if treatment_exposures > 0 {
            treatment_conversions as f64 / treatment_exposures as f64
        } else {
            0.0
        };

        let (p_value, ci_lower, ci_upper) = if control_exposures == 0 || treatment_exposures == 0
        {
            (1.0, 0.0, 0.0)
        } else {
            let z_result = stats::two_proportion_z(
                control_conversions,
                control_exposures,
                treatment_conversions,
                treatment_exposures,
            );
            let ci = stats::uplift_ci(
                control_conversions,
                control_exposures,
                treatment_conversions,
                treatment_exposures,
                0.95,
            );
            (z_result.p_value, ci.lower, ci.upper)
        };

        lift_estimates.push(LiftEstimate {
            variant_key: variant.key.clone(),
            variant_name: variant.name.clone(),
            control_rate: stats::round_to(control_rate, 6),
            treatment_rate: stats::round_to(treatment_rate, 6),
            absolute_lift: stats::round_to(treatment_rate - control_rate, 6),
            ci_lower: stats::round_to(ci_lower, 6),
            ci_upper: stats::round_to(ci_upper, 6),
            p_value: stats::round_to(p_value, 6),
        });
    }

    Ok(Results {
        experiment_id: experiment_id.to_string(),
        generated_at: Utc::now(),
        exposure_totals: experiment
            .variants
            .iter()
            .map(|variant| {
                (
                    variant.key.clone(),
                    exposures_by_variant.get(&variant.key).copied().unwrap_or(0),
                )
            })
            .collect(),
        exposure_timeseries,
        metric_summaries,
        lift_estimates,
    })
}
