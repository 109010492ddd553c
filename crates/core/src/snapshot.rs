//! Report snapshots: immutable archived copies of report documents.

use chrono::Utc;
use uuid::Uuid;

use crate::error::CoreResult;
use crate::model::{Report, ReportSnapshot};
use crate::store::Session;

/// Cap applied to snapshot listings unless a caller overrides it.
pub const DEFAULT_SNAPSHOT_LIMIT: usize = 20;

/// Serialize and append one snapshot. Enums become their string values and
/// timestamps ISO-8601, so the stored document re-parses with the same key
/// set the report serializes with.
pub fn create_snapshot(
    session: &mut Session<'_>,
    experiment_id: &str,
    report: &Report,
) -> CoreResult<ReportSnapshot> {
    let snapshot = ReportSnapshot {
        id: Uuid::new_v4().to_string(),
        experiment_id: experiment_id.to_string(),
        snapshot_json: serde_json::to_string(report)?,
        created_at: Utc::now(),
    };
    session.insert_snapshot(&snapshot)?;
    Ok(snapshot)
}

/// Most recent snapshots first.
pub fn list_snapshots(
    session: &Session<'_>,
    experiment_id: &str,
    limit: usize,
) -> CoreResult<Vec<ReportSnapshot>> {
    session.list_snapshots(experiment_id, limit)
}
