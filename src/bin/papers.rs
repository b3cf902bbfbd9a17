use clap::{Parser, Subcommand};
use papergraph::Config;
use papergraph::db::{Db, migrate};
use papergraph::papers::{Paper, PaperImport, PaperRepository, SqlitePaperRepository};
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};

#[derive(Parser, Debug)]
#[command(name = "papers")]
#[command(about = "Manage the paper corpus")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upsert papers from a JSON array file
    Import {
        file: PathBuf,
    },
    /// List all papers, sorted by id
    List {
        /// Print as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

fn read_import_file(path: &Path) -> Result<Vec<Paper>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let records: Vec<PaperImport> = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a JSON array of papers", path.display()))?;

    let mut papers = Vec::with_capacity(records.len());
    for (i, record) in records.into_iter().enumerate() {
        let paper = Paper::try_from(record)
            .with_context(|| format!("Invalid paper at index {}", i))?;
        papers.push(paper);
    }
    Ok(papers)
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
    let repository = SqlitePaperRepository::new(db);

    match args.command {
        Command::Import { file } => {
            let papers = read_import_file(&file)?;
            log::info!("Importing {} papers from {}", papers.len(), file.display());

            let mut undated = 0;
            for paper in &papers {
                if paper.published_date.is_none() {
                    log::warn!("{} has no publication date; temporal checks will not apply", paper.id);
                    undated += 1;
                }
                repository.upsert(paper).await?;
            }

            log::info!("=== Import Complete ===");
            log::info!("Papers upserted: {} ({} without date)", papers.len(), undated);
            println!("Imported {} papers", papers.len());
        }
        Command::List { json } => {
            let papers = repository.list_all().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&papers)?);
            } else {
                println!("{:<20} {:<12} {:<10} TITLE", "ID", "PUBLISHED", "CATEGORY");
                for paper in &papers {
                    let published = paper
                        .published_date
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:<20} {:<12} {:<10} {}",
                        paper.id,
                        published,
                        paper.primary_category,
                        paper.short_title()
                    );
                }
                println!("\n{} papers", papers.len());
            }
        }
    }

    Ok(())
}
