//! Experiment and variant rows.

use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;

use crate::error::{CoreError, CoreResult};
use crate::model::{AssignmentPolicy, Experiment, Outcome, StatusChange, Variant};
use crate::targeting::Targeting;

use super::{json_from_sql, opt_ts_from_sql, opt_ts_to_sql, ts_from_sql, ts_to_sql, Session};

const EXPERIMENT_COLUMNS: &str = "id, name, description, hypothesis, owner, created_by, \
     unit_type, tags_json, targeting_json, ramp_pct, assignment_salt, assignment_policy, \
     version, mde, baseline_rate, alpha, power, sample_size_required, status, outcome, \
     started_at, ended_at, termination_reason, created_at, updated_at";

const VARIANT_COLUMNS: &str =
    "id, experiment_id, variant_key, name, weight, config_json, ordinal, created_at";

fn decode_err(index: usize, err: CoreError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(err))
}

fn row_to_experiment(row: &Row<'_>) -> rusqlite::Result<Experiment> {
    let tags_json: String = row.get(7)?;
    let targeting_json: String = row.get(8)?;
    let policy_token: String = row.get(11)?;
    let status_token: String = row.get(18)?;
    let outcome_token: String = row.get(19)?;

    // Legacy rows overload the status column with outcome tokens; map them
    // onto the canonical pair on read.
    let change =
        StatusChange::parse(&status_token).map_err(|err| decode_err(18, err))?;
    let stored_outcome = Outcome::parse(&outcome_token).map_err(|err| decode_err(19, err))?;
    let outcome = match stored_outcome {
        Outcome::None => change.outcome,
        other => other,
    };

    Ok(Experiment {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        hypothesis: row.get(3)?,
        owner: row.get(4)?,
        created_by: row.get(5)?,
        unit_type: row.get(6)?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        targeting: Targeting::from_stored(&targeting_json),
        ramp_pct: row.get(9)?,
        assignment_salt: row.get(10)?,
        policy: AssignmentPolicy::parse(&policy_token).map_err(|err| decode_err(11, err))?,
        version: row.get(12)?,
        mde: row.get(13)?,
        baseline_rate: row.get(14)?,
        alpha: row.get(15)?,
        power: row.get(16)?,
        sample_size_required: row.get(17)?,
        status: change.status,
        outcome,
        started_at: opt_ts_from_sql(20, row.get(20)?)?,
        ended_at: opt_ts_from_sql(21, row.get(21)?)?,
        termination_reason: row.get(22)?,
        created_at: ts_from_sql(23, row.get(23)?)?,
        updated_at: ts_from_sql(24, row.get(24)?)?,
        variants: Vec::new(),
    })
}

fn row_to_variant(row: &Row<'_>) -> rusqlite::Result<Variant> {
    let config_json: String = row.get(5)?;
    Ok(Variant {
        id: row.get(0)?,
        experiment_id: row.get(1)?,
        key: row.get(2)?,
        name: row.get(3)?,
        weight: row.get(4)?,
        config: json_from_sql(&config_json, Value::Object(Default::default())),
        ordinal: row.get(6)?,
        created_at: ts_from_sql(7, row.get(7)?)?,
    })
}

impl Session<'_> {
    pub fn insert_experiment(&mut self, experiment: &Experiment) -> CoreResult<()> {
        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT INTO experiments (id, name, description, hypothesis, owner, created_by, \
             unit_type, tags_json, targeting_json, ramp_pct, assignment_salt, \
             assignment_policy, version, mde, baseline_rate, alpha, power, \
             sample_size_required, status, outcome, started_at, ended_at, \
             termination_reason, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, \
             ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)",
            params![
                experiment.id,
                experiment.name,
                experiment.description,
                experiment.hypothesis,
                experiment.owner,
                experiment.created_by,
                experiment.unit_type,
                serde_json::to_string(&experiment.tags)?,
                experiment.targeting.to_value().to_string(),
                experiment.ramp_pct,
                experiment.assignment_salt,
                experiment.policy.as_str(),
                experiment.version,
                experiment.mde,
                experiment.baseline_rate,
                experiment.alpha,
                experiment.power,
                experiment.sample_size_required,
                experiment.status.as_str(),
                experiment.outcome.as_str(),
                opt_ts_to_sql(experiment.started_at),
                opt_ts_to_sql(experiment.ended_at),
                experiment.termination_reason,
                ts_to_sql(experiment.created_at),
                ts_to_sql(experiment.updated_at),
            ],
        )?;
        for variant in &experiment.variants {
            insert_variant(&tx, variant)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_experiment(&self, experiment_id: &str) -> CoreResult<Experiment> {
        let experiment = self
            .conn()
            .query_row(
                &format!("SELECT {EXPERIMENT_COLUMNS} FROM experiments WHERE id = ?1"),
                params![experiment_id],
                row_to_experiment,
            )
            .optional()?;
        let mut experiment =
            experiment.ok_or_else(|| CoreError::not_found("Experiment not found"))?;
        experiment.variants = self.variants_for(experiment_id)?;
        Ok(experiment)
    }

    pub fn list_experiments(&self) -> CoreResult<Vec<Experiment>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {EXPERIMENT_COLUMNS} FROM experiments ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map([], row_to_experiment)?;
        let mut experiments = Vec::new();
        for row in rows {
            let mut experiment = row?;
            experiment.variants = self.variants_for(&experiment.id)?;
            experiments.push(experiment);
        }
        Ok(experiments)
    }

    /// Persist a mutated experiment, guarded by version compare-and-set.
    ///
    /// `expected_version` is the version the caller read; the row is only
    /// written if nobody advanced it in between. With `replace_variants` the
    /// variant set is swapped atomically in the same transaction.
    pub fn update_experiment(
        &mut self,
        experiment: &Experiment,
        expected_version: i64,
        replace_variants: bool,
    ) -> CoreResult<()> {
        let tx = self.conn_mut().transaction()?;
        let changed = tx.execute(
            "UPDATE experiments SET name = ?1, description = ?2, hypothesis = ?3, \
             owner = ?4, tags_json = ?5, targeting_json = ?6, ramp_pct = ?7, \
             assignment_policy = ?8, version = ?9, status = ?10, outcome = ?11, \
             started_at = ?12, ended_at = ?13, termination_reason = ?14, updated_at = ?15 \
             WHERE id = ?16 AND version = ?17",
            params![
                experiment.name,
                experiment.description,
                experiment.hypothesis,
                experiment.owner,
                serde_json::to_string(&experiment.tags)?,
                experiment.targeting.to_value().to_string(),
                experiment.ramp_pct,
                experiment.policy.as_str(),
                experiment.version,
                experiment.status.as_str(),
                experiment.outcome.as_str(),
                opt_ts_to_sql(experiment.started_at),
                opt_ts_to_sql(experiment.ended_at),
                experiment.termination_reason,
                ts_to_sql(experiment.updated_at),
                experiment.id,
                expected_version,
            ],
        )?;
        if changed == 0 {
            return Err(CoreError::Conflict(
                "experiment was modified concurrently".to_string(),
            ));
        }
        if replace_variants {
            tx.execute(
                "DELETE FROM variants WHERE experiment_id = ?1",
                params![experiment.id],
            )?;
            for variant in &experiment.variants {
                insert_variant(&tx, variant)?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn variants_for(&self, experiment_id: &str) -> CoreResult<Vec<Variant>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {VARIANT_COLUMNS} FROM variants WHERE experiment_id = ?1 ORDER BY ordinal ASC"
        ))?;
        let rows = stmt.query_map(params![experiment_id], row_to_variant)?;
        let mut variants = Vec::new();
        for row in rows {
            variants.push(row?);
        }
        Ok(variants)
    }

    pub fn find_variant_by_key(
        &self,
        experiment_id: &str,
        variant_key: &str,
    ) -> CoreResult<Variant> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {VARIANT_COLUMNS} FROM variants \
                     WHERE experiment_id = ?1 AND variant_key = ?2"
                ),
                params![experiment_id, variant_key],
                row_to_variant,
            )
            .optional()?
            .ok_or_else(|| CoreError::not_found(format!("Variant key not found: {variant_key}")))
    }

    pub fn experiment_exists(&self, experiment_id: &str) -> CoreResult<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(id) FROM experiments WHERE id = ?1",
            params![experiment_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Experiment counts grouped by canonical status token.
    pub fn status_counts(&self) -> CoreResult<Vec<(String, i64)>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT status, COUNT(id) FROM experiments GROUP BY status")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut counts = Vec::new();
        for row in rows {
            counts.push(row?);
        }
        Ok(counts)
    }
}

fn insert_variant(tx: &rusqlite::Transaction<'_>, variant: &Variant) -> CoreResult<()> {
    tx.execute(
        &format!("INSERT INTO variants ({VARIANT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
        params![
            variant.id,
            variant.experiment_id,
            variant.key,
            variant.name,
            variant.weight,
            variant.config.to_string(),
            variant.ordinal,
            ts_to_sql(variant.created_at),
        ],
    )?;
    Ok(())
}
