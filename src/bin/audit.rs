use clap::Parser;
use papergraph::Config;
use papergraph::db::{Db, migrate};
use papergraph::graph::audit::audit_graph;
use papergraph::graph::RelationshipStore;
use papergraph::papers::SqlitePaperRepository;
use std::path::Path;
use anyhow::Result;

#[derive(Parser, Debug)]
#[command(name = "audit")]
#[command(about = "Check stored relationships against current paper dates")]
struct Args {
    /// Reverse edges that point from an older paper to a newer one
    #[arg(long)]
    fix: bool,

    /// Print the full report as JSON
    #[arg(long)]
    json: bool,
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

    let papers = SqlitePaperRepository::new(db.clone());
    let store = RelationshipStore::new(db, config.overwrite_policy());

    let report = audit_graph(&papers, &store, args.fix).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("\n=== Graph Audit ===\n");
    println!("Relationships checked: {}", report.relationships_checked);
    println!("Temporal violations:   {}", report.temporal_violations.len());
    for edge in &report.temporal_violations {
        println!("  {} -{}-> {}", edge.source_id, edge.relationship_type, edge.target_id);
    }
    if args.fix {
        println!("Reversed:              {}", report.reversed.len());
    }
    println!("Dangling edges:        {}", report.dangling.len());
    for edge in &report.dangling {
        println!("  {} -{}-> {}", edge.source_id, edge.relationship_type, edge.target_id);
    }

    if report.is_clean() {
        println!("\nGraph is consistent.");
    } else if !args.fix && !report.temporal_violations.is_empty() {
        println!("\nRun with --fix to reverse temporal violations.");
    }

    Ok(())
}
