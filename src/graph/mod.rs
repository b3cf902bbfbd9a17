//! Knowledge graph: typed, directional paper relationships and the rules that
//! keep them consistent.
//!
//! An edge `source --type--> target` means the source paper cites or builds on
//! the target. Three invariants hold for everything in the [`RelationshipStore`]:
//! one edge per unordered pair, the source is never older than the target when
//! both dates are known, and `contradicts` is never stored in both directions.

mod pair_key;
mod temporal;
mod store;
mod traversal;
pub mod audit;
pub mod backup;

pub use pair_key::{PairKey, PAIR_KEY_SEPARATOR};
pub use temporal::{RejectReason, TemporalValidator, TemporalVerdict};
pub use store::{OverwritePolicy, RelationshipStore, SkipReason, UpsertOutcome};
pub use traversal::traverse_graph;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PapergraphError;

/// Kind of a stored relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipType {
    /// Source builds upon the target's method or results.
    Extends,
    /// Source independently corroborates the target.
    Supports,
    /// Source reports findings that conflict with the target.
    Contradicts,
}

impl RelationshipType {
    pub const ALL: [RelationshipType; 3] = [
        RelationshipType::Extends,
        RelationshipType::Supports,
        RelationshipType::Contradicts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Extends => "extends",
            RelationshipType::Supports => "supports",
            RelationshipType::Contradicts => "contradicts",
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationshipType {
    type Err = PapergraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "extends" => Ok(RelationshipType::Extends),
            "supports" => Ok(RelationshipType::Supports),
            "contradicts" => Ok(RelationshipType::Contradicts),
            other => Err(PapergraphError::InvalidInput(format!(
                "unknown relationship type: {}",
                other
            ))),
        }
    }
}

/// A relationship proposed by the oracle for an ordered pair of papers.
///
/// The direction is whatever order the papers were presented in; it is not
/// trusted until the [`TemporalValidator`] has looked at it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipCandidate {
    pub relationship_type: RelationshipType,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub description: String,
}

/// A persisted edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source_id: String,
    pub target_id: String,
    pub relationship_type: RelationshipType,
    pub confidence: f64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Relationship {
    /// Build an edge from a candidate with the given (already validated) direction.
    pub fn from_candidate(candidate: &RelationshipCandidate, source_id: &str, target_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            relationship_type: candidate.relationship_type,
            confidence: candidate.confidence,
            description: candidate.description.clone(),
            created_at: Utc::now(),
        }
    }

    pub fn pair_key(&self) -> PairKey {
        PairKey::new(&self.source_id, &self.target_id)
    }

    /// Same edge with source and target swapped; every other field is kept.
    pub fn reversed(&self) -> Self {
        Self {
            source_id: self.target_id.clone(),
            target_id: self.source_id.clone(),
            ..self.clone()
        }
    }

    /// True when `other` connects the same papers in the opposite direction.
    pub fn is_reverse_of(&self, other: &Relationship) -> bool {
        self.source_id == other.target_id && self.target_id == other.source_id
    }
}
