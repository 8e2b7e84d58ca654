//! fpcal CLI - Command-line interface for the calibration engine

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use fpcal_core::{CalibrationConfig, CalibrationEngine, CalibrationError, RuleId};
use fpcal_store::{CalibrationStore, SledStore};
use fpcal_trust::{Contribution, OrgHandle};
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "fpcal")]
#[command(about = "fpcal - Byzantine-tolerant false-positive rate calibration")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Record contributions from a JSON file
    Ingest {
        /// Database directory
        #[arg(long)]
        db: PathBuf,
        /// JSON array of contributions
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Compute consensus FP rates
    Aggregate {
        /// Database directory
        #[arg(long)]
        db: PathBuf,
        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Rules to aggregate (default: every rule in the database)
        #[arg(short, long = "rule")]
        rules: Vec<String>,
        /// Write reputation updates back
        #[arg(long)]
        commit: bool,
    },
    /// Print reputation records
    Reputation {
        /// Database directory
        #[arg(long)]
        db: PathBuf,
        /// Organization handles
        #[arg(required = true)]
        handles: Vec<String>,
    },
    /// Validate and print the effective configuration
    Config {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries JSON; logs go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Ingest { db, file } => ingest(&db, &file),
        Commands::Aggregate {
            db,
            config,
            rules,
            commit,
        } => aggregate(&db, config.as_deref(), rules, commit).await,
        Commands::Reputation { db, handles } => reputation(&db, handles),
        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            print_json(&serde_json::to_value(&config)?)
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<CalibrationConfig> {
    match path {
        Some(path) => CalibrationConfig::from_json_file(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(CalibrationConfig::default()),
    }
}

fn open_store(db: &Path) -> anyhow::Result<SledStore> {
    SledStore::open(db).with_context(|| format!("opening database {}", db.display()))
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn ingest(db: &Path, file: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let contributions: Vec<Contribution> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", file.display()))?;

    let store = open_store(db)?;
    for (idx, contribution) in contributions.iter().enumerate() {
        store
            .record_contribution(contribution)
            .with_context(|| format!("contribution #{} rejected", idx))?;
    }
    store.flush()?;

    info!("Recorded {} contributions", contributions.len());
    print_json(&json!({ "recorded": contributions.len() }))
}

async fn aggregate(db: &Path, config: Option<&Path>, rules: Vec<String>, commit: bool) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let store = open_store(db)?;

    let rules: Vec<RuleId> = if rules.is_empty() {
        store.list_rules()?
    } else {
        rules.into_iter().map(RuleId::new).collect()
    };

    let engine = Arc::new(CalibrationEngine::new(config, store)?);

    let tasks: Vec<_> = rules
        .into_iter()
        .map(|rule_id| {
            let engine = Arc::clone(&engine);
            tokio::task::spawn_blocking(move || aggregate_rule(&engine, rule_id, commit))
        })
        .collect();

    let mut output = Vec::with_capacity(tasks.len());
    for task in tasks {
        output.push(task.await??);
    }

    engine.store().flush()?;
    print_json(&Value::Array(output))
}

/// One rule's outcome as JSON. A privacy refusal is an outcome, not a
/// failure; store errors abort the command.
fn aggregate_rule(
    engine: &CalibrationEngine<SledStore>,
    rule_id: RuleId,
    commit: bool,
) -> anyhow::Result<Value> {
    let round = match engine.aggregate(&rule_id) {
        Ok(round) => round,
        Err(CalibrationError::KAnonymity(refusal)) => {
            return Ok(json!({
                "rule_id": rule_id,
                "status": "refused",
                "required_k": refusal.required_k,
                "actual_k": refusal.actual_k,
            }));
        }
        Err(err) => return Err(err).with_context(|| format!("aggregating rule {}", rule_id)),
    };

    let committed = if commit { Some(engine.commit(&round)?) } else { None };

    Ok(json!({
        "rule_id": rule_id,
        "status": "ok",
        "round_id": round.round_id,
        "result": round.result,
        "pending_updates": round.updates.len(),
        "committed": committed,
    }))
}

fn reputation(db: &Path, handles: Vec<String>) -> anyhow::Result<()> {
    let store = open_store(db)?;
    let handles: Vec<OrgHandle> = handles.into_iter().map(OrgHandle::new).collect();
    let reputations = store.get_reputations(&handles)?;
    print_json(&serde_json::to_value(&reputations)?)
}
