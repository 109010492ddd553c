//! Assignment rows. A partial unique index keeps at most one active
//! (unreleased) row per (experiment, unit).

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::error::CoreResult;
use crate::model::Assignment;

use super::{opt_ts_from_sql, opt_ts_to_sql, ts_from_sql, ts_to_sql, Session};

const ASSIGNMENT_COLUMNS: &str =
    "id, experiment_id, variant_id, unit_id, assigned_at, released_at";

fn row_to_assignment(row: &Row<'_>) -> rusqlite::Result<Assignment> {
    Ok(Assignment {
        id: row.get(0)?,
        experiment_id: row.get(1)?,
        variant_id: row.get(2)?,
        unit_id: row.get(3)?,
        assigned_at: ts_from_sql(4, row.get(4)?)?,
        released_at: opt_ts_from_sql(5, row.get(5)?)?,
    })
}

impl Session<'_> {
    pub fn active_assignment(
        &self,
        experiment_id: &str,
        unit_id: &str,
    ) -> CoreResult<Option<Assignment>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {ASSIGNMENT_COLUMNS} FROM assignments \
                     WHERE experiment_id = ?1 AND unit_id = ?2 AND released_at IS NULL"
                ),
                params![experiment_id, unit_id],
                row_to_assignment,
            )
            .optional()?)
    }

    /// Insert a fresh assignment. Returns `false` when a concurrent writer
    /// won the uniqueness race; the caller re-reads the winner's row.
    pub fn try_insert_assignment(&mut self, assignment: &Assignment) -> CoreResult<bool> {
        let result = self.conn().execute(
            &format!(
                "INSERT INTO assignments ({ASSIGNMENT_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
            ),
            params![
                assignment.id,
                assignment.experiment_id,
                assignment.variant_id,
                assignment.unit_id,
                ts_to_sql(assignment.assigned_at),
                opt_ts_to_sql(assignment.released_at),
            ],
        );
        match result {
            Ok(_) => Ok(true),
            Err(err)
                if err.sqlite_error_code()
                    == Some(rusqlite::ErrorCode::ConstraintViolation) =>
            {
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Release every active assignment for an experiment; returns the count.
    pub fn release_active_assignments(
        &mut self,
        experiment_id: &str,
        released_at: DateTime<Utc>,
    ) -> CoreResult<usize> {
        Ok(self.conn().execute(
            "UPDATE assignments SET released_at = ?1 \
             WHERE experiment_id = ?2 AND released_at IS NULL",
            params![ts_to_sql(released_at), experiment_id],
        )?)
    }

    pub fn active_assignment_count(&self, experiment_id: &str) -> CoreResult<i64> {
        Ok(self.conn().query_row(
            "SELECT COUNT(id) FROM assignments \
             WHERE experiment_id = ?1 AND released_at IS NULL",
            params![experiment_id],
            |row| row.get(0),
        )?)
    }
}
