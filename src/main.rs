use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use papergraph::db::{migrate, Db};
use papergraph::graph::{RelationshipStore, TemporalValidator};
use papergraph::oracle::{HttpOracle, RateLimiter};
use papergraph::papers::SqlitePaperRepository;
use papergraph::{CancellationFlag, Config, GraphUpdateEngine, UpdateMode};

#[derive(Parser, Debug)]
#[command(name = "update-graph")]
#[command(about = "Update the paper relationship graph (incremental or full repair)")]
struct Args {
    #[command(subcommand)]
    mode: Mode,

    /// Replace stored edges with strictly higher-confidence candidates
    #[arg(long, global = true)]
    allow_overwrite: bool,

    /// Pairs evaluated concurrently (overrides engine.concurrency)
    #[arg(long, global = true)]
    concurrency: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Compare one newly ingested paper against the corpus
    Incremental {
        #[arg(long)]
        paper_id: String,
    },
    /// Evaluate every pair that has no relationship yet
    Repair,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::load()?;

    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", config.papergraph.log_level.as_str())
    ).init();

    if args.allow_overwrite {
        config.engine.allow_overwrite = true;
    }
    if let Some(concurrency) = args.concurrency {
        config.engine.concurrency = concurrency;
    }
    config.validate()?;

    log::info!("Database path: {}", config.db_path().display());
    let db = Db::new(config.db_path());
    let migrations_dir = Path::new("migrations");
    db.with_connection(|conn| migrate::run_migrations(conn, migrations_dir)).await?;

    let oracle = HttpOracle::new(
        config.oracle.endpoint.clone(),
        config.oracle_api_key()?,
        config.oracle.model.clone(),
        config.oracle.temperature,
        config.oracle_timeout(),
    )
    .context("Failed to create oracle client")?;

    let engine = GraphUpdateEngine::new(
        Arc::new(SqlitePaperRepository::new(db.clone())),
        Arc::new(oracle),
        RelationshipStore::new(db, config.overwrite_policy()),
    )
    .with_validator(TemporalValidator::new(config.engine.reject_missing_dates))
    .with_thresholds(config.thresholds)
    .with_retry_policy(config.retry_policy())
    .with_rate_limiter(Arc::new(RateLimiter::per_minute(config.oracle.max_calls_per_minute)))
    .with_concurrency(config.engine.concurrency);

    let cancel = CancellationFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received, finishing in-flight pairs");
            on_signal.cancel();
        }
    });

    let mode = match args.mode {
        Mode::Incremental { paper_id } => UpdateMode::Incremental { paper_id },
        Mode::Repair => UpdateMode::Repair,
    };

    let summary = engine.run(mode, &cancel).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
