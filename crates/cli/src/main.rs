use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use holdout_core::config::Settings;
use holdout_core::payload::{
    AssignmentRequest, EventCreate, ExperimentCreate, ExperimentPatch, ExposureIngest,
    GuardrailCreate, MetricIngest,
};
use holdout_core::platform::Platform;
use miette::{miette, Context, IntoDiagnostic, Result};
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Parser)]
#[command(name = "holdout", version, about = "Holdout experimentation platform CLI")]
struct Cli {
    /// SQLite database path (falls back to HOLDOUT_DATABASE_URL).
    #[arg(long, global = true)]
    db: Option<String>,
    #[arg(long, value_enum, default_value = "pretty", global = true)]
    log_format: LogFormat,
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema.
    Init,
    /// Create an experiment from a JSON definition file.
    Create {
        #[arg(long)]
        file: PathBuf,
    },
    /// List experiments, newest first.
    List,
    /// Show one experiment.
    Show {
        #[arg(long)]
        id: String,
    },
    /// Patch an experiment from a JSON definition file.
    Patch {
        #[arg(long)]
        id: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Launch (DRAFT or PAUSED -> RUNNING).
    Launch {
        #[arg(long)]
        id: String,
        #[arg(long)]
        ramp: Option<i64>,
    },
    /// Pause a running experiment.
    Pause {
        #[arg(long)]
        id: String,
    },
    /// Stop an experiment and release its assignments.
    Stop {
        #[arg(long)]
        id: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Force a status decision (accepts legacy outcome tokens).
    Decide {
        #[arg(long)]
        id: String,
        #[arg(long)]
        status: String,
        #[arg(long, default_value = "operator")]
        actor: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Decision audit trail, newest first.
    History {
        #[arg(long)]
        id: String,
    },
    /// Resolve the sticky assignment for a unit.
    Assign {
        #[arg(long)]
        id: String,
        #[arg(long)]
        unit: String,
        /// Targeting attributes as key=value (value parsed as JSON when possible).
        #[arg(long = "attr")]
        attrs: Vec<String>,
    },
    /// Ingest a JSONL file of raw events atomically.
    Ingest {
        #[arg(long)]
        file: PathBuf,
    },
    /// Record one exposure event.
    Expose {
        #[arg(long)]
        id: String,
        #[arg(long)]
        variant: String,
        #[arg(long)]
        unit: String,
    },
    /// Record one named metric observation.
    Metric {
        #[arg(long)]
        id: String,
        #[arg(long)]
        variant: String,
        #[arg(long)]
        unit: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        value: f64,
    },
    /// Append a guardrail observation.
    Guardrail {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        value: f64,
        #[arg(long)]
        threshold: f64,
        #[arg(long, default_value = "max")]
        direction: String,
    },
    /// List guardrail observations, newest first.
    Guardrails {
        #[arg(long)]
        id: String,
    },
    /// Build the report (fires the auto-transition, archives a snapshot).
    Report {
        #[arg(long)]
        id: String,
        #[arg(long, default_value = "json")]
        format: String,
    },
    /// List archived report snapshots.
    Snapshots {
        #[arg(long)]
        id: String,
    },
    /// Interval results: exposure series, metric summaries, lift estimates.
    Results {
        #[arg(long)]
        id: String,
        #[arg(long, default_value = "hour")]
        interval: String,
    },
    /// Experiment counts per status.
    Summary,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format, &cli.log_level);

    let mut settings = Settings::from_env();
    if let Some(db) = &cli.db {
        settings.database_url = db.clone();
    }
    let platform = Platform::new(settings).into_diagnostic()?;

    match cli.command {
        Commands::Init => {
            // Opening the platform already ran schema init and migrations.
            println!("Database ready");
        }
        Commands::Create { file } => {
            let payload: ExperimentCreate = read_json(&file)?;
            let experiment = platform.create_experiment(&payload).into_diagnostic()?;
            print_json(&experiment.to_value())?;
        }
        Commands::List => {
            let experiments = platform.list_experiments().into_diagnostic()?;
            let values: Vec<Value> = experiments
                .iter()
                .map(holdout_core::model::Experiment::to_value)
                .collect();
            print_json(&Value::Array(values))?;
        }
        Commands::Show { id } => {
            let experiment = platform.get_experiment(&id).into_diagnostic()?;
            print_json(&experiment.to_value())?;
        }
        Commands::Patch { id, file } => {
            let payload: ExperimentPatch = read_json(&file)?;
            let experiment = platform.patch_experiment(&id, &payload).into_diagnostic()?;
            print_json(&experiment.to_value())?;
        }
        Commands::Launch { id, ramp } => {
            let experiment = platform.launch(&id, ramp).into_diagnostic()?;
            print_json(&experiment.to_value())?;
        }
        Commands::Pause { id } => {
            let experiment = platform.pause(&id).into_diagnostic()?;
            print_json(&experiment.to_value())?;
        }
        Commands::Stop { id, reason } => {
            let experiment = platform.stop(&id, reason).into_diagnostic()?;
            print_json(&experiment.to_value())?;
        }
        Commands::Decide {
            id,
            status,
            actor,
            reason,
        } => {
            let experiment = platform
                .override_status(&id, &status, reason, &actor)
                .into_diagnostic()?;
            print_json(&experiment.to_value())?;
        }
        Commands::History { id } => {
            let history = platform.decision_history(&id).into_diagnostic()?;
            print_json(&history)?;
        }
        Commands::Assign { id, unit, attrs } => {
            let request = AssignmentRequest {
                experiment_id: id,
                unit_id: unit,
                attributes: parse_attrs(&attrs)?,
            };
            let response = platform.assign(&request).into_diagnostic()?;
            print_json(&response)?;
        }
        Commands::Ingest { file } => {
            let raw = fs::read_to_string(&file)
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to read {}", file.display()))?;
            let mut events: Vec<EventCreate> = Vec::new();
            for (number, line) in raw.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let event: EventCreate = serde_json::from_str(line)
                    .into_diagnostic()
                    .wrap_err_with(|| format!("bad event on line {}", number + 1))?;
                events.push(event);
            }
            let ingested = platform.ingest_events(&events).into_diagnostic()?;
            print_json(&serde_json::json!({ "ingested": ingested }))?;
        }
        Commands::Expose { id, variant, unit } => {
            let ingested = platform
                .ingest_exposures(&[ExposureIngest {
                    experiment_id: id,
                    unit_id: unit,
                    variant_key: variant,
                    ts: None,
                    context: None,
                }])
                .into_diagnostic()?;
            print_json(&serde_json::json!({ "ingested": ingested }))?;
        }
        Commands::Metric {
            id,
            variant,
            unit,
            name,
            value,
        } => {
            let ingested = platform
                .ingest_metrics(&[MetricIngest {
                    experiment_id: id,
                    unit_id: unit,
                    variant_key: variant,
                    metric_name: name,
                    value,
                    ts: None,
                    context: None,
                }])
                .into_diagnostic()?;
            print_json(&serde_json::json!({ "ingested": ingested }))?;
        }
        Commands::Guardrail {
            id,
            name,
            value,
            threshold,
            direction,
        } => {
            let observation = platform
                .create_guardrail(&GuardrailCreate {
                    experiment_id: id,
                    name,
                    value,
                    threshold,
                    direction,
                })
                .into_diagnostic()?;
            print_json(&observation)?;
        }
        Commands::Guardrails { id } => {
            let observations = platform.list_guardrails(&id).into_diagnostic()?;
            print_json(&observations)?;
        }
        Commands::Report { id, format } => {
            let rendered = platform.export_report(&id, &format).into_diagnostic()?;
            println!("{rendered}");
        }
        Commands::Snapshots { id } => {
            let snapshots = platform.list_snapshots(&id).into_diagnostic()?;
            print_json(&snapshots)?;
        }
        Commands::Results { id, interval } => {
            let results = platform.results(&id, &interval).into_diagnostic()?;
            print_json(&results)?;
        }
        Commands::Summary => {
            let summary = platform.executive_summary().into_diagnostic()?;
            print_json(&summary)?;
        }
    }

    Ok(())
}

fn init_tracing(format: LogFormat, level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<T> {
    let raw = fs::read_to_string(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to parse {}", path.display()))
}

/// key=value attribute pairs; values parse as JSON when they can, so
/// `--attr age=30` stays numeric while `--attr country=US` stays a string.
fn parse_attrs(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut attributes = Map::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| miette!("attribute must be key=value, got: {pair}"))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        attributes.insert(key.to_string(), value);
    }
    Ok(attributes)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}
