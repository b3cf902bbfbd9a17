use clap::{Parser, Subcommand};
use papergraph::Config;
use papergraph::confidence::EvidenceItem;
use papergraph::db::{Db, migrate};
use papergraph::graph::{traverse_graph, Relationship, RelationshipStore, RelationshipType};
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};

#[derive(Parser, Debug)]
#[command(name = "query")]
#[command(about = "Read-only queries over the relationship graph")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow outgoing edges from a paper (papers it builds on, transitively)
    Traverse {
        paper_id: String,
        #[arg(long, default_value_t = 2)]
        depth: usize,
        /// Only follow these types (comma-separated)
        #[arg(long, value_delimiter = ',')]
        types: Vec<RelationshipType>,
    },
    /// Papers whose edges point at this paper
    Citing {
        paper_id: String,
    },
    /// Contradictions involving this paper
    Contradictions {
        paper_id: String,
    },
    /// Score answer confidence for a JSON array of evidence items
    Confidence {
        evidence: PathBuf,
    },
}

fn print_edges(edges: &[Relationship]) {
    if edges.is_empty() {
        println!("No relationships found.");
        return;
    }
    for edge in edges {
        println!(
            "{} -{}-> {} ({:.2}): {}",
            edge.source_id, edge.relationship_type, edge.target_id, edge.confidence, edge.description
        );
    }
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
    let store = RelationshipStore::new(db, config.overwrite_policy());

    match args.command {
        Command::Traverse { paper_id, depth, types } => {
            let filter = if types.is_empty() { None } else { Some(types.as_slice()) };
            let edges = traverse_graph(&store, &paper_id, filter, depth).await?;
            print_edges(&edges);
        }
        Command::Citing { paper_id } => {
            print_edges(&store.incoming(&paper_id).await?);
        }
        Command::Contradictions { paper_id } => {
            print_edges(&store.contradictions_for(&paper_id).await?);
        }
        Command::Confidence { evidence } => {
            let text = std::fs::read_to_string(&evidence)
                .with_context(|| format!("Failed to read {}", evidence.display()))?;
            let items: Vec<EvidenceItem> = serde_json::from_str(&text)
                .context("Evidence file must be a JSON array of {paper_id, relevance_score}")?;

            let mut paper_ids: Vec<String> = items.iter().map(|e| e.paper_id.clone()).collect();
            paper_ids.sort();
            paper_ids.dedup();
            let edges = store.edges_among(&paper_ids).await?;

            let score = config.confidence_aggregator()?.score(&items, &edges);
            println!("{}", serde_json::to_string_pretty(&score)?);
        }
    }

    Ok(())
}
