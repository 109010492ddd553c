//! Statistical kernel.
//!
//! Pure functions only. All arithmetic is f64; denominators inside variance
//! terms are floored at 1e-12 instead of guarding each division site.

use sha2::{Digest, Sha256};
use statrs::distribution::{ContinuousCDF, Normal};

const VARIANCE_FLOOR: f64 = 1e-12;

/// Two-sided z-test outcome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZTest {
    pub z_score: f64,
    pub p_value: f64,
}

/// Confidence interval on the uplift.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub lower: f64,
    pub upper: f64,
}

/// Round to a fixed number of decimal digits.
pub fn round_to(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (value * factor).round() / factor
}

/// Required total sample size (both groups) for a two-proportion test.
///
/// Balanced-group approximation with a coarse z lookup; the caller supplies
/// the minimum detectable effect as an absolute rate delta.
pub fn sample_size(baseline_rate: f64, mde: f64, alpha: f64, power: f64) -> u64 {
    let p1 = baseline_rate;
    let p2 = (baseline_rate + mde).min(0.999);
    let p_bar = (p1 + p2) / 2.0;

    let z_alpha = if alpha <= 0.05 { 1.96 } else { 1.64 };
    let z_beta = if power >= 0.8 { 0.84 } else { 0.52 };

    let numerator = (z_alpha * (2.0 * p_bar * (1.0 - p_bar)).sqrt()
        + z_beta * (p1 * (1.0 - p1) + p2 * (1.0 - p2)).sqrt())
    .powi(2);
    let denominator = (p2 - p1).powi(2).max(VARIANCE_FLOOR);
    let per_group = (numerator / denominator).ceil().max(1.0) as u64;
    per_group * 2
}

fn normal_cdf(value: f64) -> f64 {
    Normal::new(0.0, 1.0).unwrap().cdf(value)
}

/// Pooled two-proportion z-test, two-sided.
///
/// Zero exposures on either side short-circuit to (z=0, p=1).
pub fn two_proportion_z(
    control_conversions: u64,
    control_exposures: u64,
    treatment_conversions: u64,
    treatment_exposures: u64,
) -> ZTest {
    if control_exposures == 0 || treatment_exposures == 0 {
        return ZTest { z_score: 0.0, p_value: 1.0 };
    }

    let p_control = control_conversions as f64 / control_exposures as f64;
    let p_treatment = treatment_conversions as f64 / treatment_exposures as f64;
    let pooled = (control_conversions + treatment_conversions) as f64
        / (control_exposures + treatment_exposures) as f64;
    let std_error = (pooled
        * (1.0 - pooled)
        * (1.0 / control_exposures as f64 + 1.0 / treatment_exposures as f64))
        .max(VARIANCE_FLOOR)
        .sqrt();
    let z_score = (p_treatment - p_control) / std_error;
    let p_value = (2.0 * (1.0 - normal_cdf(z_score.abs()))).clamp(0.0, 1.0);
    ZTest { z_score, p_value }
}

/// Wald interval on the difference in proportions.
pub fn uplift_ci(
    control_conversions: u64,
    control_exposures: u64,
    treatment_conversions: u64,
    treatment_exposures: u64,
    confidence_level: f64,
) -> Interval {
    if control_exposures == 0 || treatment_exposures == 0 {
        return Interval { lower: 0.0, upper: 0.0 };
    }

    let p_control = control_conversions as f64 / control_exposures as f64;
    let p_treatment = treatment_conversions as f64 / treatment_exposures as f64;
    let uplift = p_treatment - p_control;

    let se = (p_control * (1.0 - p_control) / control_exposures as f64
        + p_treatment * (1.0 - p_treatment) / treatment_exposures as f64)
        .max(VARIANCE_FLOOR)
        .sqrt();
    let z = if confidence_level >= 0.95 { 1.96 } else { 1.64 };
    let margin = z * se;
    Interval { lower: uplift - margin, upper: uplift + margin }
}

/// Confidence score surfaced next to the p-value, capped below 1.
pub fn confidence_from_p(p_value: f64) -> f64 {
    round_to((1.0 - p_value).clamp(0.0, 0.9999), 4)
}

/// Difference-in-differences delta over pre/post conversion rates.
pub fn diff_in_diff(
    pre_control_rate: f64,
    post_control_rate: f64,
    pre_treatment_rate: f64,
    post_treatment_rate: f64,
) -> f64 {
    round_to(
        (post_treatment_rate - pre_treatment_rate) - (post_control_rate - pre_control_rate),
        6,
    )
}

/// Hash a key onto [0, 1].
///
/// SHA-256, first 8 bytes big-endian as u64, divided by u64::MAX. Stable
/// across processes; the sole source of bucketing randomness.
pub fn deterministic_bucket(key: &str) -> f64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes) as f64 / u64::MAX as f64
}

/// Bucket for one unit within one experiment namespace.
///
/// Namespaces ("ramp", "variant") keep the ramp gate uncorrelated with
/// variant selection for the same unit.
pub fn unit_bucket(experiment_id: &str, unit_id: &str, salt: &str, namespace: &str) -> f64 {
    deterministic_bucket(&format!("{experiment_id}:{unit_id}:{salt}:{namespace}"))
}
