//! Paper records and the repository that owns them.
//!
//! Papers are created on ingestion and never mutated afterwards except for
//! metadata backfill (e.g. a publication date discovered later).

mod repository;

pub use repository::{PaperRepository, SqlitePaperRepository};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{PapergraphError, Result};
use crate::graph::PAIR_KEY_SEPARATOR;

/// A research paper in the corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    /// Stable identifier, e.g. an arXiv accession number.
    pub id: String,
    pub title: String,
    /// Authors in publication order.
    #[serde(default)]
    pub authors: Vec<String>,
    /// Publication date; `None` exempts the paper from temporal checks.
    #[serde(default)]
    pub published_date: Option<NaiveDate>,
    #[serde(default)]
    pub primary_category: String,
    /// Short synthesized summary used as oracle input.
    #[serde(default)]
    pub key_finding: String,
    /// Optional reference to the extracted full text.
    #[serde(default)]
    pub full_text: Option<String>,
}

impl Paper {
    /// Check the fields the graph relies on.
    ///
    /// Ids must be non-empty and must not contain the pair key separator,
    /// otherwise two distinct pairs could share a key.
    pub fn validate(&self) -> Result<()> {
        validate_paper_id(&self.id)?;
        if self.title.trim().is_empty() {
            return Err(PapergraphError::InvalidInput(format!(
                "paper {} has an empty title",
                self.id
            )));
        }
        Ok(())
    }

    /// Title truncated for log lines.
    pub fn short_title(&self) -> String {
        const MAX_CHARS: usize = 50;
        if self.title.chars().count() <= MAX_CHARS {
            self.title.clone()
        } else {
            let truncated: String = self.title.chars().take(MAX_CHARS).collect();
            format!("{}...", truncated)
        }
    }
}

/// Validate a paper identifier.
pub fn validate_paper_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(PapergraphError::InvalidInput("paper id must not be empty".to_string()));
    }
    if id.contains(PAIR_KEY_SEPARATOR) {
        return Err(PapergraphError::InvalidInput(format!(
            "paper id {:?} must not contain '{}'",
            id, PAIR_KEY_SEPARATOR
        )));
    }
    Ok(())
}

/// Paper as it appears in intake files: dates are free-form strings.
#[derive(Debug, Clone, Deserialize)]
pub struct PaperImport {
    #[serde(alias = "paper_id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    /// Publication date; `published_date` is accepted as an alias.
    #[serde(default, alias = "published_date")]
    pub published: Option<String>,
    /// Fallback date when `published` is absent or unparseable.
    #[serde(default)]
    pub updated: Option<String>,
    #[serde(default, alias = "category")]
    pub primary_category: String,
    #[serde(default)]
    pub key_finding: String,
    #[serde(default)]
    pub full_text: Option<String>,
}

impl TryFrom<PaperImport> for Paper {
    type Error = PapergraphError;

    fn try_from(record: PaperImport) -> Result<Self> {
        let published_date = record
            .published
            .as_deref()
            .and_then(parse_published_date)
            .or_else(|| record.updated.as_deref().and_then(parse_published_date));

        let paper = Paper {
            id: record.id.trim().to_string(),
            title: record.title,
            authors: record.authors,
            published_date,
            primary_category: record.primary_category,
            key_finding: record.key_finding,
            full_text: record.full_text,
        };
        paper.validate()?;
        Ok(paper)
    }
}

/// Parse a publication date as found in paper metadata.
///
/// Accepts `YYYY-MM-DD`, RFC 3339 timestamps (`2023-01-01T10:00:00Z`), naive
/// timestamps (`2023-01-01T10:00:00`) and a bare year (`2023`, read as January 1st).
/// Returns `None` for anything else; an unparseable date is treated as missing.
pub fn parse_published_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.date());
    }
    if value.len() == 4 {
        if let Ok(year) = value.parse::<i32>() {
            return NaiveDate::from_ymd_opt(year, 1, 1);
        }
    }

    None
}
