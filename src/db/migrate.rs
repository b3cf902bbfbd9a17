//! Schema migrations.
//!
//! Each `NNN_name.sql` file in the migrations directory is applied once, in
//! version order, inside its own transaction. Applied versions are recorded in
//! `schema_migrations`.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use rusqlite::{params, Connection};

use crate::error::{PapergraphError, Result};

#[derive(Debug)]
struct Migration {
    version: u32,
    name: String,
    sql: String,
}

fn ensure_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Versions already recorded in `schema_migrations`.
pub fn applied_versions(conn: &Connection) -> Result<BTreeSet<u32>> {
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations")?;
    let versions = stmt
        .query_map([], |row| row.get::<_, u32>(0))?
        .collect::<std::result::Result<BTreeSet<_>, rusqlite::Error>>()?;
    Ok(versions)
}

fn parse_filename(filename: &str) -> Result<(u32, String)> {
    let name = filename.trim_end_matches(".sql");
    let version = name
        .split_once('_')
        .and_then(|(prefix, _)| prefix.parse::<u32>().ok())
        .ok_or_else(|| {
            PapergraphError::Config(format!(
                "Migration {} must be named NNN_description.sql",
                filename
            ))
        })?;
    Ok((version, name.to_string()))
}

fn load_migrations(migrations_dir: &Path) -> Result<Vec<Migration>> {
    let mut migrations = Vec::new();

    for entry in fs::read_dir(migrations_dir)? {
        let path = entry?.path();
        if path.extension().and_then(|s| s.to_str()) != Some("sql") {
            continue;
        }
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PapergraphError::Config(format!("Invalid migration path {}", path.display())))?;

        let (version, name) = parse_filename(filename)?;
        let sql = fs::read_to_string(&path)?;
        migrations.push(Migration { version, name, sql });
    }

    migrations.sort_by_key(|m| m.version);
    if let Some(pair) = migrations.windows(2).find(|w| w[0].version == w[1].version) {
        return Err(PapergraphError::Config(format!(
            "Migrations {} and {} share version {}",
            pair[0].name, pair[1].name, pair[0].version
        )));
    }

    Ok(migrations)
}

/// Apply every migration in `migrations_dir` that has not been applied yet.
pub fn run_migrations(conn: &mut Connection, migrations_dir: &Path) -> Result<()> {
    ensure_migrations_table(conn)?;

    let applied = applied_versions(conn)?;
    let pending: Vec<Migration> = load_migrations(migrations_dir)?
        .into_iter()
        .filter(|m| !applied.contains(&m.version))
        .collect();

    if pending.is_empty() {
        log::debug!("Schema up to date ({} migrations applied)", applied.len());
        return Ok(());
    }

    for migration in &pending {
        log::info!("Applying migration {}", migration.name);

        let tx = conn.transaction()?;
        tx.execute_batch(&migration.sql).map_err(|e| {
            PapergraphError::Config(format!("Migration {} failed: {}", migration.name, e))
        })?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            params![migration.version, migration.name],
        )?;
        tx.commit()?;
    }

    log::info!("Applied {} migrations", pending.len());
    Ok(())
}
