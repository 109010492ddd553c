//! Report builder: aggregates events into the analysis document that drives
//! the auto-transition rule.
//!
//! The builder only reads; it returns a value and never mutates experiment
//! state. The coordinator owns the follow-up transition and snapshot.

use chrono::Utc;

use crate::error::{CoreError, CoreResult};
use crate::guardrails::latest_per_name;
use crate::model::{
    BanditArm, Experiment, GuardrailStatus, GuardrailSummary, Period, Recommendation, Report,
    VariantPerformance,
};
use crate::policies::thompson;
use crate::rng::{get_rng, seed_from_key};
use crate::stats;
use crate::store::Session;

/// Exposures per day assumed when projecting time to decision.
const EXPOSURES_PER_DAY: i64 = 200;

fn rate(conversions: u64, exposures: u64) -> f64 {
    if exposures == 0 {
        0.0
    } else {
        conversions as f64 / exposures as f64
    }
}

/// Build the full report for one experiment.
pub fn build_report(session: &Session<'_>, experiment: &Experiment) -> CoreResult<Report> {
    session.check_deadline()?;
    let (exposures, conversions) = session.post_totals(&experiment.id)?;
    let sample_progress = if experiment.sample_size_required > 0 {
        (exposures as f64 / experiment.sample_size_required as f64).min(1.0)
    } else {
        0.0
    };

    // Bandit posteriors over post-period counts; the Monte-Carlo race is
    // seeded by experiment id so repeated reports agree.
    let counts_by_variant = session.variant_event_counts(&experiment.id)?;
    let posteriors = thompson::build_posteriors(&experiment.variants, &counts_by_variant);
    let mut rng = get_rng(seed_from_key(&experiment.id));
    let win_probabilities =
        thompson::estimate_win_probabilities(&posteriors, &mut rng, thompson::DEFAULT_DRAWS);
    let bandit_state: Vec<BanditArm> = posteriors
        .iter()
        .map(|posterior| BanditArm {
            variant_id: posterior.variant_id.clone(),
            variant_name: posterior.variant_name.clone(),
            exposures: posterior.exposures,
            conversions: posterior.conversions,
            alpha: stats::round_to(posterior.alpha, 3),
            beta: stats::round_to(posterior.beta, 3),
            expected_rate: stats::round_to(posterior.expected_rate(), 4),
            win_probability: stats::round_to(
                win_probabilities
                    .get(&posterior.variant_id)
                    .copied()
                    .unwrap_or(0.0),
                4,
            ),
        })
        .collect();

    let guardrails: Vec<GuardrailSummary> =
        latest_per_name(&session.list_guardrails(&experiment.id)?)
            .iter()
            .map(GuardrailSummary::from)
            .collect();
    let guardrails_breached = guardrails
        .iter()
        .filter(|guardrail| guardrail.status == GuardrailStatus::Breached)
        .count() as u64;

    let mut control_rate = 0.0;
    let mut treatment_rate = 0.0;
    let mut uplift = 0.0;
    let mut p_value = 1.0;
    let mut ci_lower = 0.0;
    let mut ci_upper = 0.0;
    let mut did_delta = None;
    let mut recommendation = Recommendation::ContinueCollecting;
    let mut variant_performance = Vec::with_capacity(experiment.variants.len());

    if let Some(control) = experiment.control_variant() {
        session.check_deadline()?;
        let (control_post_exposure, control_post_conversion) =
            session.variant_period_counts(&experiment.id, &control.id, Period::Post)?;
        let (control_pre_exposure, control_pre_conversion) =
            session.variant_period_counts(&experiment.id, &control.id, Period::Pre)?;
        control_rate = rate(control_post_conversion, control_post_exposure);
        let control_pre_rate = rate(control_pre_conversion, control_pre_exposure);

        // Treatment pool: every non-control variant summed.
        let mut treatment_post_exposure = 0u64;
        let mut treatment_post_conversion = 0u64;
        let mut treatment_pre_exposure = 0u64;
        let mut treatment_pre_conversion = 0u64;

        for variant in &experiment.variants {
            let (post_exposure, post_conversion) =
                session.variant_period_counts(&experiment.id, &variant.id, Period::Post)?;
            let (pre_exposure, pre_conversion) =
                session.variant_period_counts(&experiment.id, &variant.id, Period::Pre)?;
            variant_performance.push(VariantPerformance {
                variant_id: variant.id.clone(),
                variant_name: variant.name.clone(),
                post_exposures: post_exposure,
                post_conversions: post_conversion,
                post_conversion_rate: stats::round_to(rate(post_conversion, post_exposure), 4),
                pre_exposures: pre_exposure,
                pre_conversions: pre_conversion,
                pre_conversion_rate: stats::round_to(rate(pre_conversion, pre_exposure), 4),
            });
            if variant.id != control.id {
                treatment_post_exposure += post_exposure;
                treatment_post_conversion += post_conversion;
                treatment_pre_exposure += pre_exposure;
                treatment_pre_conversion += pre_conversion;
            }
        }

        treatment_rate = rate(treatment_post_conversion, treatment_post_exposure);
        let treatment_pre_rate = rate(treatment_pre_conversion, treatment_pre_exposure);

        uplift = treatment_rate - control_rate;
        let z_result = stats::two_proportion_z(
            control_post_conversion,
            control_post_exposure,
            treatment_post_conversion,
            treatment_post_exposure,
        );
        p_value = z_result.p_value;
        let ci = stats::uplift_ci(
            control_post_conversion,
            control_post_exposure,
            treatment_post_conversion,
            treatment_post_exposure,
            0.95,
        );
        ci_lower = ci.lower;
        ci_upper = ci.upper;

        if control_pre_exposure > 0 && treatment_pre_exposure > 0 {
            did_delta = Some(stats::diff_in_diff(
                control_pre_rate,
                control_rate,
                treatment_pre_rate,
                treatment_rate,
            ));
        }

        recommendation = if sample_progress < 1.0 {
            Recommendation::ContinueCollecting
        } else if guardrails_breached > 0 {
            Recommendation::Fail
        } else if p_value <= experiment.alpha && uplift >= experiment.mde {
            Recommendation::Pass
        } else if p_value <= experiment.alpha && uplift < 0.0 {
            Recommendation::Fail
        } else {
            Recommendation::Inconclusive
        };
    }

    let estimated_days_to_decision = if exposures == 0 {
        None
    } else {
        let remaining = experiment.sample_size_required - exposures as i64;
        Some(if remaining <= 0 {
            0
        } else {
            remaining / EXPOSURES_PER_DAY
        })
    };

    Ok(Report {
        experiment_id: experiment.id.clone(),
        status: experiment.status,
        outcome: experiment.outcome,
        mde: experiment.mde,
        sample_size_required: experiment.sample_size_required,
        exposures,
        conversions,
        sample_progress: stats::round_to(sample_progress, 4),
        control_conversion_rate: stats::round_to(control_rate, 4),
        treatment_conversion_rate: stats::round_to(treatment_rate, 4),
        uplift_vs_control: stats::round_to(uplift, 4),
        uplift_ci_lower: stats::round_to(ci_lower, 4),
        uplift_ci_upper: stats::round_to(ci_upper, 4),
        p_value: stats::round_to(p_value, 6),
        confidence: stats::confidence_from_p(p_value),
        recommendation,
        guardrails_breached,
        guardrails,
        estimated_days_to_decision,
        diff_in_diff_delta: did_delta,
        variant_performance,
        assignment_policy: experiment.policy,
        bandit_state,
        last_updated_at: Utc::now(),
    })
}

/// Serialize a report for the export endpoint.
pub fn export_report(report: &Report, format: &str) -> CoreResult<String> {
    match format {
        "json" => Ok(serde_json::to_string_pretty(report)?),
        "csv" => {
            let headers = [
                "experiment_id",
                "status",
                "recommendation",
                "sample_progress",
                "confidence",
                "p_value",
                "uplift_vs_control",
                "guardrails_breached",
            ];
            let values = [
                report.experiment_id.clone(),
                report.status.as_str().to_string(),
                report.recommendation.as_str().to_string(),
                report.sample_progress.to_string(),
                report.confidence.to_string(),
                report.p_value.to_string(),
                report.uplift_vs_control.to_string(),
                report.guardrails_breached.to_string(),
            ];
            Ok(format!("{}\n{}\n", headers.join(","), values.join(",")))
        }
        other => Err(CoreError::invalid(format!(
            "format must be one of: json, csv (got: {other})"
        ))),
    }
}
