use clap::{Parser, Subcommand};
use papergraph::Config;
use papergraph::db::{Db, migrate};
use papergraph::graph::backup::{export_relationships, read_backup, restore_relationships};
use papergraph::graph::{RelationshipStore, TemporalValidator};
use papergraph::papers::SqlitePaperRepository;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};

#[derive(Parser, Debug)]
#[command(name = "backup")]
#[command(about = "Export or restore relationships as JSON")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write all relationships to a JSON file
    Export {
        file: PathBuf,
    },
    /// Re-apply relationships from a JSON file through validation
    Restore {
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load()?;

    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", config.papergraph.log_level.as_str())
    ).init();

    let db = Db::new(config.db_path());
    let migrations_dir = Path::new("migrations");
    db.with_connection(|conn| migrate::run_migrations(conn, migrations_dir)).await?;
    let store = RelationshipStore::new(db.clone(), config.overwrite_policy());

    match args.command {
        Command::Export { file } => {
            let count = export_relationships(&store, &file).await?;
            println!("Exported {} relationships to {}", count, file.display());
        }
        Command::Restore { file } => {
            let edges = read_backup(&file)
                .await
                .with_context(|| format!("Failed to read backup {}", file.display()))?;
            let papers = SqlitePaperRepository::new(db);
            let validator = TemporalValidator::new(config.engine.reject_missing_dates);

            let report = restore_relationships(&papers, &store, &validator, &edges).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
