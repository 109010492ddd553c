//! Report snapshot rows: immutable archived report documents.

use rusqlite::{params, Row};

use crate::error::CoreResult;
use crate::model::ReportSnapshot;

use super::{ts_from_sql, ts_to_sql, Session};

const SNAPSHOT_COLUMNS: &str = "id, experiment_id, snapshot_json, created_at";

fn row_to_snapshot(row: &Row<'_>) -> rusqlite::Result<ReportSnapshot> {
    Ok(ReportSnapshot {
        id: row.get(0)?,
        experiment_id: row.get(1)?,
        snapshot_json: row.get(2)?,
        created_at: ts_from_sql(3, row.get(3)?)?,
    })
}

impl Session<'_> {
    pub fn insert_snapshot(&mut self, snapshot: &ReportSnapshot) -> CoreResult<()> {
        self.conn().execute(
            &format!(
                "INSERT INTO report_snapshots ({SNAPSHOT_COLUMNS}) VALUES (?1, ?2, ?3, ?4)"
            ),
            params![
                snapshot.id,
                snapshot.experiment_id,
                snapshot.snapshot_json,
                ts_to_sql(snapshot.created_at),
            ],
        )?;
        Ok(())
    }

    /// Most recent snapshots first, capped at `limit`.
    pub fn list_snapshots(
        &self,
        experiment_id: &str,
        limit: usize,
    ) -> CoreResult<Vec<ReportSnapshot>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM report_snapshots \
             WHERE experiment_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![experiment_id, limit as i64], row_to_snapshot)?;
        let mut snapshots = Vec::new();
        for row in rows {
            snapshots.push(row?);
        }
        Ok(snapshots)
    }
}
