//! Schema initialization and additive migrations.

use std::collections::HashSet;

use rusqlite::Connection;

pub(crate) fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS experiments (
            id                   TEXT PRIMARY KEY,
            name                 TEXT NOT NULL,
            description          TEXT NOT NULL DEFAULT '',
            hypothesis           TEXT,
            owner                TEXT NOT NULL DEFAULT '',
            created_by           TEXT NOT NULL DEFAULT '',
            unit_type            TEXT NOT NULL DEFAULT 'user_id',
            tags_json            TEXT NOT NULL DEFAULT '[]',
            targeting_json       TEXT NOT NULL DEFAULT '{}',
            ramp_pct             INTEGER NOT NULL DEFAULT 0,
            assignment_salt      TEXT NOT NULL,
            assignment_policy    TEXT NOT NULL DEFAULT 'weighted_bucket',
            version              INTEGER NOT NULL DEFAULT 1,
            mde                  REAL NOT NULL,
            baseline_rate        REAL NOT NULL,
            alpha                REAL NOT NULL,
            power                REAL NOT NULL,
            sample_size_required INTEGER NOT NULL,
            status               TEXT NOT NULL DEFAULT 'draft',
            outcome              TEXT NOT NULL DEFAULT 'none',
            started_at           TEXT,
            ended_at             TEXT,
            termination_reason   TEXT,
            created_at           TEXT NOT NULL,
            updated_at           TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS variants (
            id            TEXT PRIMARY KEY,
            experiment_id TEXT NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,
            variant_key   TEXT NOT NULL,
            name          TEXT NOT NULL,
            weight        REAL NOT NULL,
            config_json   TEXT NOT NULL DEFAULT '{}',
            ordinal       INTEGER NOT NULL,
            created_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS ix_variants_experiment ON variants(experiment_id);

        CREATE TABLE IF NOT EXISTS assignments (
            id            TEXT PRIMARY KEY,
            experiment_id TEXT NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,
            variant_id    TEXT NOT NULL REFERENCES variants(id) ON DELETE CASCADE,
            unit_id       TEXT NOT NULL,
            assigned_at   TEXT NOT NULL,
            released_at   TEXT
        );
        CREATE UNIQUE INDEX IF NOT EXISTS ux_assignments_active
            ON assignments(experiment_id, unit_id) WHERE released_at IS NULL;
        CREATE INDEX IF NOT EXISTS ix_assignments_experiment ON assignments(experiment_id);

        CREATE TABLE IF NOT EXISTS events (
            id            TEXT PRIMARY KEY,
            experiment_id TEXT NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,
            unit_id       TEXT NOT NULL,
            variant_id    TEXT REFERENCES variants(id) ON DELETE SET NULL,
            event_type    TEXT NOT NULL,
            metric_name   TEXT,
            period        TEXT NOT NULL DEFAULT 'post',
            value         REAL NOT NULL DEFAULT 1.0,
            context_json  TEXT NOT NULL DEFAULT '{}',
            observed_at   TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS ix_events_experiment_period_type
            ON events(experiment_id, period, event_type);
        CREATE INDEX IF NOT EXISTS ix_events_variant ON events(variant_id);

        CREATE TABLE IF NOT EXISTS guardrail_observations (
            id            TEXT PRIMARY KEY,
            experiment_id TEXT NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,
            name          TEXT NOT NULL,
            value         REAL NOT NULL,
            threshold     REAL NOT NULL,
            direction     TEXT NOT NULL,
            status        TEXT NOT NULL,
            observed_at   TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS ix_guardrails_experiment
            ON guardrail_observations(experiment_id);

        CREATE TABLE IF NOT EXISTS decision_audits (
            id              TEXT PRIMARY KEY,
            experiment_id   TEXT NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,
            previous_status TEXT NOT NULL,
            new_status      TEXT NOT NULL,
            reason          TEXT,
            source          TEXT NOT NULL,
            actor           TEXT NOT NULL DEFAULT 'system',
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS ix_audits_experiment ON decision_audits(experiment_id);

        CREATE TABLE IF NOT EXISTS report_snapshots (
            id            TEXT PRIMARY KEY,
            experiment_id TEXT NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,
            snapshot_json TEXT NOT NULL,
            created_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS ix_snapshots_experiment ON report_snapshots(experiment_id);
        ",
    )?;
    migrate(conn)
}

/// Additive migrations for databases created before a column existed.
fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    let cols = get_columns(conn, "experiments")?;
    add_column_if_missing(conn, &cols, "experiments", "outcome", "TEXT NOT NULL DEFAULT 'none'")?;
    add_column_if_missing(
        conn,
        &cols,
        "experiments",
        "assignment_policy",
        "TEXT NOT NULL DEFAULT 'weighted_bucket'",
    )?;
    Ok(())
}

fn get_columns(conn: &Connection, table: &str) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut out = HashSet::new();
    for row in rows {
        out.insert(row?);
    }
    Ok(out)
}

fn add_column_if_missing(
    conn: &Connection,
    cols: &HashSet<String>,
    table: &str,
    col: &str,
    ty: &str,
) -> rusqlite::Result<()> {
    if !cols.contains(col) {
        conn.execute(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, col, ty), [])?;
    }
    Ok(())
}
