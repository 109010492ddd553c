//! Integration-style tests against an in-memory store.

mod test_ingest;
mod test_machine;
mod test_report;

use serde_json::{json, Map, Value};

use crate::config::Settings;
use crate::payload::ExperimentCreate;
use crate::platform::Platform;

/// Platform over a fresh in-memory database.
pub(crate) fn memory_platform() -> Platform {
    let settings = Settings {
        database_url: ":memory:".to_string(),
        ..Settings::default()
    };
    Platform::new(settings).expect("in-memory platform")
}

/// The standard fixture: control 0.8 / treatment 0.2, country targeting,
/// full ramp.
pub(crate) fn checkout_experiment() -> ExperimentCreate {
    experiment_payload(json!({
        "name": "checkout-cta",
        "hypothesis": "new CTA copy lifts checkout conversion",
        "targeting": {"country": {"in": ["US", "CA"]}},
        "ramp_pct": 100,
        "variants": [
            {"key": "control", "name": "Control", "weight": 0.8},
            {"key": "treatment", "name": "Treatment", "weight": 0.2}
        ]
    }))
}

pub(crate) fn experiment_payload(value: Value) -> ExperimentCreate {
    serde_json::from_value(value).expect("experiment payload")
}

pub(crate) fn attrs(value: Value) -> Map<String, Value> {
    value.as_object().expect("attribute object").clone()
}
