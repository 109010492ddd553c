//! Thompson sampling over Beta posteriors.
//!
//! Posteriors use a uniform Beta(1, 1) prior: alpha = 1 + conversions,
//! beta = 1 + max(0, exposures - conversions). Selection draws one sample
//! per posterior and takes the argmax; win probabilities repeat that race
//! over many draws and count victories.

use std::collections::HashMap;

use rand::Rng;
use rand_distr::{Beta, Distribution};

use crate::model::Variant;

/// Monte-Carlo draws used for win-probability estimation.
pub const DEFAULT_DRAWS: usize = 400;

#[derive(Debug, Clone, PartialEq)]
pub struct Posterior {
    pub variant_id: String,
    pub variant_name: String,
    pub exposures: u64,
    pub conversions: u64,
    pub alpha: f64,
    pub beta: f64,
}

impl Posterior {
    pub fn expected_rate(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    fn draw<R: Rng>(&self, rng: &mut R) -> f64 {
        // alpha and beta are >= 1 by construction.
        Beta::new(self.alpha, self.beta).unwrap().sample(rng)
    }
}

/// One posterior per variant, in variant order; variants without counts get
/// the bare prior.
pub fn build_posteriors(
    variants: &[Variant],
    counts_by_variant: &HashMap<String, (u64, u64)>,
) -> Vec<Posterior> {
    variants
        .iter()
        .map(|variant| {
            let (exposures, conversions) = counts_by_variant
                .get(&variant.id)
                .copied()
                .unwrap_or((0, 0));
            let failures = exposures.saturating_sub(conversions);
            Posterior {
                variant_id: variant.id.clone(),
                variant_name: variant.name.clone(),
                exposures,
                conversions,
                alpha: 1.0 + conversions as f64,
                beta: 1.0 + failures as f64,
            }
        })
        .collect()
}

/// Draw once per posterior and return the winner (first on ties).
pub fn choose<'a, R: Rng>(posteriors: &'a [Posterior], rng: &mut R) -> Option<&'a Posterior> {
    let mut winner: Option<(&Posterior, f64)> = None;
    for posterior in posteriors {
        let sample = posterior.draw(rng);
        match winner {
            Some((_, best)) if sample <= best => {}
            _ => winner = Some((posterior, sample)),
        }
    }
    winner.map(|(posterior, _)| posterior)
}

/// Fraction of Monte-Carlo races each variant wins.
pub fn estimate_win_probabilities<R: Rng>(
    posteriors: &[Posterior],
    rng: &mut R,
    draws: usize,
) -> HashMap<String, f64> {
    if posteriors.is_empty() {
        return HashMap::new();
    }
    let draws = draws.max(1);

    let mut wins: HashMap<&str, u64> = posteriors
        .iter()
        .map(|posterior| (posterior.variant_id.as_str(), 0))
        .collect();
    for _ in 0..draws {
        if let Some(winner) = choose(posteriors, rng) {
            *wins.entry(winner.variant_id.as_str()).or_insert(0) += 1;
        }
    }
    wins.into_iter()
        .map(|(variant_id, count)| (variant_id.to_string(), count as f64 / draws as f64))
        .collect()
}
