#![warn(clippy::all)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jax_artifacts::{ApprovedArtifactLoader, ArtifactStore, OpContext, Reconciler};
use jax_common::config::Config;
use jax_common::logging::init_logging_with_exclusions;
use serde::Serialize;
use tracing::info;

/// Operator tooling for the strategy artifact store.
#[derive(Parser, Debug)]
#[command(name = "jax-artifacts")]
#[command(version)]
#[command(about = "Inspect and reconcile strategy artifacts", long_about = None)]
struct Cli {
    /// Database file (overrides config and JAX_DATABASE_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the database and schema if missing
    Init,

    /// List verified, tradable artifacts
    Approved {
        /// Only the newest approved artifact of this strategy
        #[arg(long)]
        strategy: Option<String>,
    },

    /// Show an artifact with its approval and promotion history
    Show {
        /// Human-readable artifact id, e.g. strat_rsi_momentum_2025-01-01T00:00:00Z
        artifact_id: String,
    },

    /// Most recent promotions across all artifacts
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Find artifacts without approvals and approvals out of step with their history
    Reconcile {
        /// Create missing DRAFT approvals
        #[arg(long)]
        repair: bool,

        /// Actor recorded on repaired approvals
        #[arg(long, default_value = "reconciler")]
        actor: String,
    },

    /// Row counts per table and approval state
    Stats,
}

fn print<T: Serialize + std::fmt::Debug>(json: bool, value: &T) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{value:#?}");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_with_env()?;
    if let Some(db) = cli.db.clone() {
        config.database.path = Some(db);
    }
    config.validate().context("Invalid configuration")?;

    init_logging_with_exclusions(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    let store = Arc::new(
        ArtifactStore::from_config(&config.database).with_context(|| {
            format!(
                "Failed to open artifact store at {}",
                config.database.resolved_path().display()
            )
        })?,
    );
    let ctx = OpContext::with_timeout(config.database.operation_timeout());

    match cli.command {
        Commands::Init => {
            info!(path = %store.path().display(), "Artifact store ready");
            println!("{}", store.path().display());
        }
        Commands::Approved { strategy } => {
            let loader = ApprovedArtifactLoader::new(store);
            match strategy {
                Some(name) => print(cli.json, &loader.latest_approved(&ctx, &name)?)?,
                None => print(cli.json, &loader.load_approved(&ctx)?)?,
            }
        }
        Commands::Show { artifact_id } => {
            let artifact = store.get_artifact_by_artifact_id(&ctx, &artifact_id)?;
            let approval = match store.get_approval(&ctx, artifact.id) {
                Ok(approval) => Some(approval),
                Err(err) if err.is_not_found() => None,
                Err(err) => return Err(err.into()),
            };
            let promotions = store.list_promotions(&ctx, artifact.id)?;
            let reports = store.list_validation_reports(&ctx, artifact.id)?;
            let integrity = artifact.verify_hash().map_err(|e| e.to_string()).err();

            #[derive(Debug, Serialize)]
            struct Detail<'a> {
                artifact: &'a jax_artifacts::Artifact,
                approval: Option<jax_artifacts::Approval>,
                promotions: Vec<jax_artifacts::Promotion>,
                validation_reports: Vec<jax_artifacts::ValidationReport>,
                integrity_error: Option<String>,
            }
            print(
                cli.json,
                &Detail {
                    artifact: &artifact,
                    approval,
                    promotions,
                    validation_reports: reports,
                    integrity_error: integrity,
                },
            )?;
        }
        Commands::History { limit } => {
            print(cli.json, &store.list_promotion_history(&ctx, limit)?)?;
        }
        Commands::Reconcile { repair, actor } => {
            let reconciler = Reconciler::new(store);
            let report = reconciler.scan(&ctx)?;
            print(cli.json, &report)?;
            if repair && !report.missing_approval.is_empty() {
                let repaired = reconciler.repair_all(&ctx, &actor)?;
                println!("repaired {} artifact(s)", repaired.len());
            }
        }
        Commands::Stats => {
            print(cli.json, &store.stats(&ctx)?)?;
        }
    }

    Ok(())
}
