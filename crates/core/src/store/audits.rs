//! Decision audit rows: append-only trail of status changes.

use rusqlite::{params, Row};

use crate::error::CoreResult;
use crate::model::{DecisionAudit, DecisionSource};

use super::{ts_from_sql, ts_to_sql, Session};

const AUDIT_COLUMNS: &str =
    "id, experiment_id, previous_status, new_status, reason, source, actor, created_at";

fn row_to_audit(row: &Row<'_>) -> rusqlite::Result<DecisionAudit> {
    let source: String = row.get(5)?;
    Ok(DecisionAudit {
        id: row.get(0)?,
        experiment_id: row.get(1)?,
        previous_status: row.get(2)?,
        new_status: row.get(3)?,
        reason: row.get(4)?,
        source: match source.as_str() {
            "auto" => DecisionSource::Auto,
            _ => DecisionSource::Manual,
        },
        actor: row.get(6)?,
        created_at: ts_from_sql(7, row.get(7)?)?,
    })
}

impl Session<'_> {
    pub fn insert_audit(&mut self, audit: &DecisionAudit) -> CoreResult<()> {
        self.conn().execute(
            &format!(
                "INSERT INTO decision_audits ({AUDIT_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            ),
            params![
                audit.id,
                audit.experiment_id,
                audit.previous_status,
                audit.new_status,
                audit.reason,
                audit.source.as_str(),
                audit.actor,
                ts_to_sql(audit.created_at),
            ],
        )?;
        Ok(())
    }

    /// Audit rows newest first.
    pub fn list_audits(&self, experiment_id: &str) -> CoreResult<Vec<DecisionAudit>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {AUDIT_COLUMNS} FROM decision_audits \
             WHERE experiment_id = ?1 ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map(params![experiment_id], row_to_audit)?;
        let mut audits = Vec::new();
        for row in rows {
            audits.push(row?);
        }
        Ok(audits)
    }
}
