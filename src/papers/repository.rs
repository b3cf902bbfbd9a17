//! Paper persistence: the repository interface and its SQLite implementation.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};

use crate::db::Db;
use crate::error::{PapergraphError, Result};

use super::Paper;

/// Storage for the paper corpus.
///
/// Engine runs take a snapshot with [`PaperRepository::list_all`] at the start
/// and never read the corpus again mid-run.
#[async_trait]
pub trait PaperRepository: Send + Sync {
    /// All papers, ordered by id.
    async fn list_all(&self) -> Result<Vec<Paper>>;

    /// A single paper, or [`PapergraphError::PaperNotFound`].
    async fn get(&self, id: &str) -> Result<Paper>;

    /// Insert a paper or backfill the metadata of an existing one.
    async fn upsert(&self, paper: &Paper) -> Result<()>;
}

/// [`PaperRepository`] backed by the `papers` table.
#[derive(Debug, Clone)]
pub struct SqlitePaperRepository {
    db: Db,
}

impl SqlitePaperRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

const PAPER_COLUMNS: &str =
    "paper_id, title, authors_json, published_date, primary_category, key_finding, full_text_ref";

fn paper_from_row(row: &Row<'_>) -> rusqlite::Result<Paper> {
    let authors_json: String = row.get(2)?;
    let authors = serde_json::from_str(&authors_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    // An unparseable date is an error, never a missing date
    let published: Option<String> = row.get(3)?;
    let published_date = published
        .as_deref()
        .map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d"))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;
    Ok(Paper {
        id: row.get(0)?,
        title: row.get(1)?,
        authors,
        published_date,
        primary_category: row.get(4)?,
        key_finding: row.get(5)?,
        full_text: row.get(6)?,
    })
}

#[async_trait]
impl PaperRepository for SqlitePaperRepository {
    async fn list_all(&self) -> Result<Vec<Paper>> {
        self.db
            .with_connection(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM papers ORDER BY paper_id",
                    PAPER_COLUMNS
                ))?;
                let rows = stmt.query_map([], paper_from_row)?;
                let mut papers = Vec::new();
                for row in rows {
                    papers.push(row?);
                }
                Ok::<Vec<Paper>, PapergraphError>(papers)
            })
            .await
    }

    async fn get(&self, id: &str) -> Result<Paper> {
        let id = id.to_string();
        self.db
            .with_connection(move |conn| {
                let paper = conn
                    .query_row(
                        &format!("SELECT {} FROM papers WHERE paper_id = ?1", PAPER_COLUMNS),
                        params![id],
                        paper_from_row,
                    )
                    .optional()?;
                paper.ok_or(PapergraphError::PaperNotFound(id))
            })
            .await
    }

    async fn upsert(&self, paper: &Paper) -> Result<()> {
        paper.validate()?;

        let paper = paper.clone();
        let authors_json = serde_json::to_string(&paper.authors)?;
        let published = paper.published_date.map(|d| d.format("%Y-%m-%d").to_string());
        let ingested_at = Utc::now().to_rfc3339();

        self.db
            .with_connection(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO papers (
                        paper_id, title, authors_json, published_date,
                        primary_category, key_finding, full_text_ref, ingested_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    ON CONFLICT(paper_id) DO UPDATE SET
                        title = excluded.title,
                        authors_json = excluded.authors_json,
                        published_date = excluded.published_date,
                        primary_category = excluded.primary_category,
                        key_finding = excluded.key_finding,
                        full_text_ref = excluded.full_text_ref
                    "#,
                    params![
                        paper.id,
                        paper.title,
                        authors_json,
                        published,
                        paper.primary_category,
                        paper.key_finding,
                        paper.full_text,
                        ingested_at,
                    ],
                )?;
                Ok::<(), PapergraphError>(())
            })
            .await
    }
}
