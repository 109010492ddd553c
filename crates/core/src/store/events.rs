//! Event rows: append-only, ordered by observed_at.

use std::collections::HashMap;

use rusqlite::{params, Row};
use serde_json::Value;

use crate::error::CoreResult;
use crate::model::{Event, EventKind, Period};

use super::{json_from_sql, ts_from_sql, ts_to_sql, Session};

const EVENT_COLUMNS: &str = "id, experiment_id, unit_id, variant_id, event_type, \
     metric_name, period, value, context_json, observed_at";

fn decode_err(index: usize, err: crate::error::CoreError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(err))
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<Event> {
    let event_type: String = row.get(4)?;
    let metric_name: Option<String> = row.get(5)?;
    let period: String = row.get(6)?;
    let context_json: String = row.get(8)?;
    Ok(Event {
        id: row.get(0)?,
        experiment_id: row.get(1)?,
        unit_id: row.get(2)?,
        variant_id: row.get(3)?,
        kind: EventKind::parse(&event_type, metric_name.as_deref())
            .map_err(|err| decode_err(4, err))?,
        period: Period::parse(&period).map_err(|err| decode_err(6, err))?,
        value: row.get(7)?,
        context: json_from_sql(&context_json, Value::Object(Default::default())),
        observed_at: ts_from_sql(9, row.get(9)?)?,
    })
}

fn insert_one(conn: &rusqlite::Connection, event: &Event) -> CoreResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO events ({EVENT_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        ),
        params![
            event.id,
            event.experiment_id,
            event.unit_id,
            event.variant_id,
            event.kind.type_str(),
            event.kind.metric_name(),
            event.period.as_str(),
            event.value,
            event.context.to_string(),
            ts_to_sql(event.observed_at),
        ],
    )?;
    Ok(())
}

impl Session<'_> {
    pub fn insert_event(&mut self, event: &Event) -> CoreResult<()> {
        insert_one(self.conn(), event)
    }

    /// Append a batch atomically. The deadline is checked per item so an
    /// expired session rolls back instead of committing a partial batch.
    pub fn insert_events(&mut self, events: &[Event]) -> CoreResult<usize> {
        self.check_deadline()?;
        let deadline = self.deadline;
        let tx = self.conn_mut().transaction()?;
        for event in events {
            if let Some(deadline) = deadline {
                if std::time::Instant::now() >= deadline {
                    return Err(crate::error::CoreError::Timeout);
                }
            }
            insert_one(&tx, event)?;
        }
        tx.commit()?;
        Ok(events.len())
    }

    /// Post-period (exposures, conversions) over the whole experiment.
    pub fn post_totals(&self, experiment_id: &str) -> CoreResult<(u64, u64)> {
        let (exposures, conversions): (i64, i64) = self.conn().query_row(
            "SELECT COUNT(CASE WHEN event_type = 'exposure' THEN 1 END), \
                    COUNT(CASE WHEN event_type = 'conversion' THEN 1 END) \
             FROM events WHERE experiment_id = ?1 AND period = 'post'",
            params![experiment_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((exposures as u64, conversions as u64))
    }

    /// (exposures, conversions) for one variant in one period.
    pub fn variant_period_counts(
        &self,
        experiment_id: &str,
        variant_id: &str,
        period: Period,
    ) -> CoreResult<(u64, u64)> {
        let (exposures, conversions): (i64, i64) = self.conn().query_row(
            "SELECT COUNT(CASE WHEN event_type = 'exposure' THEN 1 END), \
                    COUNT(CASE WHEN event_type = 'conversion' THEN 1 END) \
             FROM events WHERE experiment_id = ?1 AND variant_id = ?2 AND period = ?3",
            params![experiment_id, variant_id, period.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((exposures as u64, conversions as u64))
    }

    /// Post-period (exposures, conversions) grouped by variant id; feeds the
    /// Thompson posteriors.
    pub fn variant_event_counts(
        &self,
        experiment_id: &str,
    ) -> CoreResult<HashMap<String, (u64, u64)>> {
        let mut stmt = self.conn().prepare(
            "SELECT variant_id, \
                    COUNT(CASE WHEN event_type = 'exposure' THEN 1 END), \
                    COUNT(CASE WHEN event_type = 'conversion' THEN 1 END) \
             FROM events \
             WHERE experiment_id = ?1 AND period = 'post' AND variant_id IS NOT NULL \
             GROUP BY variant_id",
        )?;
        let rows = stmt.query_map(params![experiment_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        let mut counts = HashMap::new();
        for row in rows {
            let (variant_id, exposures, conversions) = row?;
            counts.insert(variant_id, (exposures as u64, conversions as u64));
        }
        Ok(counts)
    }

    /// Every event for an experiment, oldest first.
    pub fn list_events(&self, experiment_id: &str) -> CoreResult<Vec<Event>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events \
             WHERE experiment_id = ?1 ORDER BY observed_at ASC, id ASC"
        ))?;
        let rows = stmt.query_map(params![experiment_id], row_to_event)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }
}
