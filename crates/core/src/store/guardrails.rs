//! Guardrail observation rows.

use rusqlite::{params, Row};

use crate::error::CoreResult;
use crate::model::{GuardrailDirection, GuardrailObservation, GuardrailStatus};

use super::{ts_from_sql, ts_to_sql, Session};

const GUARDRAIL_COLUMNS: &str =
    "id, experiment_id, name, value, threshold, direction, status, observed_at";

fn row_to_observation(row: &Row<'_>) -> rusqlite::Result<GuardrailObservation> {
    let direction: String = row.get(5)?;
    let status: String = row.get(6)?;
    Ok(GuardrailObservation {
        id: row.get(0)?,
        experiment_id: row.get(1)?,
        name: row.get(2)?,
        value: row.get(3)?,
        threshold: row.get(4)?,
        direction: GuardrailDirection::parse(&direction).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })?,
        status: match status.as_str() {
            "breached" => GuardrailStatus::Breached,
            _ => GuardrailStatus::Healthy,
        },
        observed_at: ts_from_sql(7, row.get(7)?)?,
    })
}

impl Session<'_> {
    pub fn insert_guardrail(&mut self, observation: &GuardrailObservation) -> CoreResult<()> {
        self.conn().execute(
            &format!(
                "INSERT INTO guardrail_observations ({GUARDRAIL_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            ),
            params![
                observation.id,
                observation.experiment_id,
                observation.name,
                observation.value,
                observation.threshold,
                observation.direction.as_str(),
                observation.status.as_str(),
                ts_to_sql(observation.observed_at),
            ],
        )?;
        Ok(())
    }

    /// All observations for an experiment, newest first.
    pub fn list_guardrails(&self, experiment_id: &str) -> CoreResult<Vec<GuardrailObservation>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {GUARDRAIL_COLUMNS} FROM guardrail_observations \
             WHERE experiment_id = ?1 ORDER BY observed_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map(params![experiment_id], row_to_observation)?;
        let mut observations = Vec::new();
        for row in rows {
            observations.push(row?);
        }
        Ok(observations)
    }
}
