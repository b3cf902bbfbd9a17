use papergraph::{config::Config, db::{migrate, Db}, error::PapergraphError};
use papergraph::graph::RelationshipStore;
use std::path::Path;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", config.papergraph.log_level.as_str())
    ).init();

    let db = Db::new(config.db_path());
    let migrations_dir = Path::new("migrations");
    db.with_connection(|conn| migrate::run_migrations(conn, migrations_dir)).await?;

    let (paper_count, undated) = db.with_connection(|conn| {
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM papers", [], |row| row.get(0))?;
        let undated: i64 = conn.query_row(
            "SELECT COUNT(*) FROM papers WHERE published_date IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok::<_, PapergraphError>((total, undated))
    }).await?;

    let store_path = db.path().to_path_buf();
    let store = RelationshipStore::new(db, config.overwrite_policy());
    let by_type = store.count_by_type().await?;
    let edge_count: usize = by_type.iter().map(|(_, n)| n).sum();

    println!("\n=== Papergraph Statistics ===\n");
    println!("Database:             {}", store_path.display());
    println!("Papers:               {}", paper_count);
    println!("Papers without date:  {}", undated);
    if paper_count > 1 {
        let pairs = paper_count * (paper_count - 1) / 2;
        println!(
            "Linked pairs:         {} of {} ({:.1}%)",
            edge_count,
            pairs,
            edge_count as f64 * 100.0 / pairs as f64
        );
    }

    println!("\nRelationships by type:\n");
    println!("{:-<32}", "");
    println!("{:<20} {:>10}", "Type", "Count");
    println!("{:-<32}", "");
    for (relationship_type, count) in &by_type {
        println!("{:<20} {:>10}", relationship_type.as_str(), count);
    }
    println!("{:-<32}", "");
    println!("{:<20} {:>10}", "Total", edge_count);

    Ok(())
}
