//! Event ingest: validation, variant-key resolution, and append.
//!
//! Batches are all-or-nothing; variant keys resolve inside the same session
//! that performs the write so a miss aborts the whole batch.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::model::{Event, EventKind, Period};
use crate::payload::{EventCreate, ExposureIngest, MetricIngest};
use crate::store::Session;

fn normalize_ts(ts: Option<DateTime<Utc>>) -> DateTime<Utc> {
    ts.unwrap_or_else(Utc::now)
}

fn normalize_context(context: Option<Value>) -> Value {
    match context {
        Some(Value::Object(object)) => Value::Object(object),
        _ => Value::Object(Default::default()),
    }
}

fn event_from_create(payload: &EventCreate) -> CoreResult<Event> {
    let kind = EventKind::parse(&payload.event_type, payload.metric_name.as_deref())?;
    let period = Period::parse(&payload.period)?;
    Ok(Event {
        id: Uuid::new_v4().to_string(),
        experiment_id: payload.experiment_id.clone(),
        unit_id: payload.unit_id.clone(),
        variant_id: payload.variant_id.clone(),
        kind,
        period,
        value: payload.value,
        context: normalize_context(Some(payload.context.clone())),
        observed_at: normalize_ts(payload.observed_at),
    })
}

/// Append a single raw event.
pub fn ingest_event(session: &mut Session<'_>, payload: &EventCreate) -> CoreResult<Event> {
    let event = event_from_create(payload)?;
    if !session.experiment_exists(&event.experiment_id)? {
        return Err(CoreError::not_found("Experiment not found"));
    }
    session.insert_event(&event)?;
    Ok(event)
}

/// Append a batch of raw events atomically; returns the count.
pub fn ingest_events(session: &mut Session<'_>, payloads: &[EventCreate]) -> CoreResult<usize> {
    let mut events = Vec::with_capacity(payloads.len());
    for payload in payloads {
        let event = event_from_create(payload)?;
        if !session.experiment_exists(&event.experiment_id)? {
            return Err(CoreError::not_found("Experiment not found"));
        }
        events.push(event);
    }
    session.insert_events(&events)
}

/// Append exposure events (kind=exposure, post period, value 1.0), resolving
/// variant keys to ids. Atomic over the whole batch.
pub fn ingest_exposures(
    session: &mut Session<'_>,
    payloads: &[ExposureIngest],
) -> CoreResult<usize> {
    let mut events = Vec::with_capacity(payloads.len());
    for payload in payloads {
        let variant = session.find_variant_by_key(&payload.experiment_id, &payload.variant_key)?;
        events.push(Event {
            id: Uuid::new_v4().to_string(),
            experiment_id: payload.experiment_id.clone(),
            unit_id: payload.unit_id.clone(),
            variant_id: Some(variant.id),
            kind: EventKind::Exposure,
            period: Period::Post,
            value: 1.0,
            context: normalize_context(payload.context.clone()),
            observed_at: normalize_ts(payload.ts),
        });
    }
    session.insert_events(&events)
}

/// Append named metric observations. Atomic over the whole batch.
pub fn ingest_metrics(session: &mut Session<'_>, payloads: &[MetricIngest]) -> CoreResult<usize> {
    let mut events = Vec::with_capacity(payloads.len());
    for payload in payloads {
        if payload.metric_name.trim().is_empty() {
            return Err(CoreError::invalid(
                "metric events require a non-empty metric_name",
            ));
        }
        let variant = session.find_variant_by_key(&payload.experiment_id, &payload.variant_key)?;
        events.push(Event {
            id: Uuid::new_v4().to_string(),
            experiment_id: payload.experiment_id.clone(),
            unit_id: payload.unit_id.clone(),
            variant_id: Some(variant.id),
            kind: EventKind::Metric {
                name: payload.metric_name.clone(),
            },
            period: Period::Post,
            value: payload.value,
            context: normalize_context(payload.context.clone()),
            observed_at: normalize_ts(payload.ts),
        });
    }
    session.insert_events(&events)
}
