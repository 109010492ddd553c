//! API-level coordinators.
//!
//! [`Platform`] composes settings, store and request metrics, and exposes the
//! public operations. Each method borrows one store session for its whole
//! duration and translates nothing: typed errors bubble to the transport
//! layer, which owns status codes.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::assignment;
use crate::config::Settings;
use crate::error::{CoreError, CoreResult};
use crate::guardrails;
use crate::ingest;
use crate::machine;
use crate::model::{
    DecisionAudit, Event, Experiment, ExperimentStatus, GuardrailObservation, Report,
    StatusChange, Variant,
};
use crate::payload::{
    AssignmentRequest, AssignmentResponse, EventCreate, ExperimentCreate, ExperimentPatch,
    ExposureIngest, GuardrailCreate, MetricIngest,
};
use crate::report;
use crate::results::{self, Interval, Results};
use crate::snapshot;
use crate::stats;
use crate::store::Store;
use crate::telemetry::{MetricsSnapshot, RequestMetrics};

/// One dashboard card per running experiment.
#[derive(Debug, Clone, Serialize)]
pub struct CondensedCard {
    pub experiment_id: String,
    pub name: String,
    pub status: ExperimentStatus,
    pub exposures: u64,
    pub conversions: u64,
    pub conversion_rate: f64,
    pub uplift_vs_control: f64,
    pub confidence: f64,
    pub sample_progress: f64,
}

pub struct Platform {
    settings: Settings,
    store: Store,
    metrics: RequestMetrics,
}

impl Platform {
    /// Open the store named by the settings and assemble the platform.
    pub fn new(settings: Settings) -> CoreResult<Platform> {
        let store = if settings.database_url == ":memory:" {
            Store::open_in_memory()?
        } else {
            Store::open(&settings.database_url)?
        };
        Ok(Platform::with_store(settings, store))
    }

    pub fn with_store(settings: Settings, store: Store) -> Platform {
        Platform {
            settings,
            store,
            metrics: RequestMetrics::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn request_metrics(&self) -> &RequestMetrics {
        &self.metrics
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    #[tracing::instrument(skip(self, payload), fields(name = %payload.name))]
    pub fn create_experiment(&self, payload: &ExperimentCreate) -> CoreResult<Experiment> {
        let targeting = payload.validate()?;
        let sample_size = stats::sample_size(
            payload.baseline_rate,
            payload.mde,
            payload.alpha,
            payload.power,
        );

        let now = Utc::now();
        let experiment_id = Uuid::new_v4().to_string();
        let variants = payload
            .variants
            .iter()
            .enumerate()
            .map(|(ordinal, variant)| Variant {
                id: Uuid::new_v4().to_string(),
                experiment_id: experiment_id.clone(),
                key: variant.resolved_key(),
                name: variant.name.clone(),
                weight: variant.weight,
                config: variant.config.clone(),
                ordinal: ordinal as i64,
                created_at: now,
            })
            .collect();

        let experiment = Experiment {
            id: experiment_id,
            name: payload.name.clone(),
            description: payload
                .description
                .clone()
                .or_else(|| payload.hypothesis.clone())
                .unwrap_or_default(),
            hypothesis: payload.hypothesis.clone(),
            owner: payload.owner.clone().unwrap_or_default(),
            created_by: payload.created_by.clone().unwrap_or_default(),
            unit_type: payload.unit_type.clone(),
            tags: payload.tags.clone(),
            targeting,
            ramp_pct: payload.ramp_pct,
            assignment_salt: Uuid::new_v4().simple().to_string(),
            policy: payload.assignment_policy,
            version: 1,
            mde: payload.mde,
            baseline_rate: payload.baseline_rate,
            alpha: payload.alpha,
            power: payload.power,
            sample_size_required: sample_size as i64,
            status: ExperimentStatus::Draft,
            outcome: Default::default(),
            started_at: None,
            ended_at: None,
            termination_reason: None,
            created_at: now,
            updated_at: now,
            variants,
        };

        let mut session = self.store.session();
        session.insert_experiment(&experiment)?;
        tracing::info!(experiment_id = %experiment.id, "experiment created");
        Ok(experiment)
    }

    pub fn list_experiments(&self) -> CoreResult<Vec<Experiment>> {
        self.store.session().list_experiments()
    }

    pub fn get_experiment(&self, experiment_id: &str) -> CoreResult<Experiment> {
        self.store.session().get_experiment(experiment_id)
    }

    #[tracing::instrument(skip(self, payload))]
    pub fn patch_experiment(
        &self,
        experiment_id: &str,
        payload: &ExperimentPatch,
    ) -> CoreResult<Experiment> {
        let mut session = self.store.session();
        machine::patch(&mut session, experiment_id, payload)
    }

    #[tracing::instrument(skip(self))]
    pub fn launch(&self, experiment_id: &str, ramp_pct: Option<i64>) -> CoreResult<Experiment> {
        let mut session = self.store.session();
        machine::launch(&mut session, experiment_id, ramp_pct)
    }

    #[tracing::instrument(skip(self))]
    pub fn pause(&self, experiment_id: &str) -> CoreResult<Experiment> {
        let mut session = self.store.session();
        machine::pause(&mut session, experiment_id)
    }

    #[tracing::instrument(skip(self))]
    pub fn stop(&self, experiment_id: &str, reason: Option<String>) -> CoreResult<Experiment> {
        let mut session = self.store.session();
        machine::stop(&mut session, experiment_id, reason)
    }

    #[tracing::instrument(skip(self, reason))]
    pub fn override_status(
        &self,
        experiment_id: &str,
        status: &str,
        reason: Option<String>,
        actor: &str,
    ) -> CoreResult<Experiment> {
        let change = StatusChange::parse(status)?;
        let mut session = self.store.session();
        machine::override_status(&mut session, experiment_id, change, reason, actor)
    }

    pub fn decision_history(&self, experiment_id: &str) -> CoreResult<Vec<DecisionAudit>> {
        let session = self.store.session();
        if !session.experiment_exists(experiment_id)? {
            return Err(CoreError::not_found("Experiment not found"));
        }
        session.list_audits(experiment_id)
    }

    #[tracing::instrument(skip(self, request), fields(experiment_id = %request.experiment_id))]
    pub fn assign(&self, request: &AssignmentRequest) -> CoreResult<AssignmentResponse> {
        let mut session = self.store.session();
        let (assignment, experiment_version) = assignment::assign(
            &mut session,
            &request.experiment_id,
            &request.unit_id,
            &request.attributes,
        )?;
        let variant = session
            .variants_for(&request.experiment_id)?
            .into_iter()
            .find(|variant| variant.id == assignment.variant_id)
            .ok_or_else(|| CoreError::not_found("assigned variant no longer exists"))?;
        Ok(AssignmentResponse {
            experiment_id: assignment.experiment_id,
            assignment_id: assignment.id,
            unit_id: assignment.unit_id,
            variant_key: variant.key,
            config_json: variant.config,
            experiment_version,
        })
    }

    pub fn ingest_event(&self, payload: &EventCreate) -> CoreResult<Event> {
        let mut session = self.store.session();
        ingest::ingest_event(&mut session, payload)
    }

    pub fn ingest_events(&self, payloads: &[EventCreate]) -> CoreResult<usize> {
        let mut session = self.store.session();
        ingest::ingest_events(&mut session, payloads)
    }

    /// Batch ingest that aborts with `Timeout` once the deadline passes;
    /// cancellation never commits a partial batch.
    pub fn ingest_events_with_deadline(
        &self,
        payloads: &[EventCreate],
        deadline: Instant,
    ) -> CoreResult<usize> {
        let mut session = self.store.session_with_deadline(deadline);
        ingest::ingest_events(&mut session, payloads)
    }

    pub fn ingest_exposures(&self, payloads: &[ExposureIngest]) -> CoreResult<usize> {
        let mut session = self.store.session();
        ingest::ingest_exposures(&mut session, payloads)
    }

    pub fn ingest_metrics(&self, payloads: &[MetricIngest]) -> CoreResult<usize> {
        let mut session = self.store.session();
        ingest::ingest_metrics(&mut session, payloads)
    }

    pub fn create_guardrail(&self, payload: &GuardrailCreate) -> CoreResult<GuardrailObservation> {
        let mut session = self.store.session();
        guardrails::create_observation(&mut session, payload)
    }

    pub fn list_guardrails(&self, experiment_id: &str) -> CoreResult<Vec<GuardrailObservation>> {
        let session = self.store.session();
        if !session.experiment_exists(experiment_id)? {
            return Err(CoreError::not_found("Experiment not found"));
        }
        session.list_guardrails(experiment_id)
    }

    /// Build the report, fire the auto-transition, persist a snapshot.
    ///
    /// The snapshot archives the report exactly as built, before any
    /// transition side effects.
    #[tracing::instrument(skip(self))]
    pub fn report(&self, experiment_id: &str) -> CoreResult<Report> {
        let mut session = self.store.session();
        Platform::report_in(&mut session, experiment_id)
    }

    /// Report build that aborts with `Timeout` once the deadline passes.
    pub fn report_with_deadline(
        &self,
        experiment_id: &str,
        deadline: Instant,
    ) -> CoreResult<Report> {
        let mut session = self.store.session_with_deadline(deadline);
        Platform::report_in(&mut session, experiment_id)
    }

    fn report_in(
        session: &mut crate::store::Session<'_>,
        experiment_id: &str,
    ) -> CoreResult<Report> {
        let experiment = session.get_experiment(experiment_id)?;
        let built = report::build_report(session, &experiment)?;
        machine::apply_auto_transition(session, experiment, &built)?;
        snapshot::create_snapshot(session, experiment_id, &built)?;
        Ok(built)
    }

    pub fn export_report(&self, experiment_id: &str, format: &str) -> CoreResult<String> {
        let built = self.report(experiment_id)?;
        report::export_report(&built, format)
    }

    pub fn list_snapshots(&self, experiment_id: &str) -> CoreResult<Vec<serde_json::Value>> {
        let session = self.store.session();
        if !session.experiment_exists(experiment_id)? {
            return Err(CoreError::not_found("Experiment not found"));
        }
        Ok(
            snapshot::list_snapshots(&session, experiment_id, snapshot::DEFAULT_SNAPSHOT_LIMIT)?
                .iter()
                .map(|snapshot| snapshot.to_value())
                .collect(),
        )
    }

    pub fn results(&self, experiment_id: &str, interval: &str) -> CoreResult<Results> {
        let interval = Interval::parse(interval)?;
        let session = self.store.session();
        results::build_results(&session, experiment_id, interval)
    }

    /// Experiment counts per canonical status, zero-filled.
    pub fn executive_summary(&self) -> CoreResult<BTreeMap<String, i64>> {
        let mut summary: BTreeMap<String, i64> = ["draft", "running", "paused", "stopped"]
            .into_iter()
            .map(|status| (status.to_string(), 0))
            .collect();
        for (status, count) in self.store.session().status_counts()? {
            *summary.entry(status).or_insert(0) = count;
        }
        Ok(summary)
    }

    /// Condensed report card per running experiment, newest first.
    pub fn condensed_running_reports(&self) -> CoreResult<Vec<CondensedCard>> {
        let session = self.store.session();
        let running: Vec<Experiment> = session
            .list_experiments()?
            .into_iter()
            .filter(|experiment| experiment.status == ExperimentStatus::Running)
            .collect();
        let mut cards = Vec::with_capacity(running.len());
        for experiment in running {
            let built = report::build_report(&session, &experiment)?;
            let conversion_rate = if built.exposures > 0 {
                stats::round_to(built.conversions as f64 / built.exposures as f64, 4)
            } else {
                0.0
            };
            cards.push(CondensedCard {
                experiment_id: experiment.id.clone(),
                name: experiment.name.clone(),
                status: experiment.status,
                exposures: built.exposures,
                conversions: built.conversions,
                conversion_rate,
                uplift_vs_control: built.uplift_vs_control,
                confidence: built.confidence,
                sample_progress: built.sample_progress,
            });
        }
        Ok(cards)
    }
}
