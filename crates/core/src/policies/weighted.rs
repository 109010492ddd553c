//! Weighted bucketing.

use crate::model::Variant;

/// Map a bucket in [0, 1] onto a variant by cumulative weight.
///
/// Walks variants in insertion order and picks the first whose cumulative
/// share reaches the bucket. A non-positive weight total yields `None`,
/// which callers treat as "fall back to control".
pub fn select(variants: &[Variant], bucket: f64) -> Option<&Variant> {
    let total: f64 = variants.iter().map(|variant| variant.weight).sum();
    if total <= 0.0 {
        return None;
    }

    let mut cumulative = 0.0;
    for variant in variants {
        cumulative += variant.weight;
        if cumulative / total >= bucket {
            return Some(variant);
        }
    }
    // Rounding can leave the final cumulative share a hair below 1.
    variants.last()
}
