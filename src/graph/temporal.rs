//! Direction checks against publication dates.
//!
//! The oracle answers "is there a relationship between X and Y" and its
//! direction depends on the order the papers were presented in. The citing
//! paper must be the newer one, so a candidate pointing from an older paper to
//! a newer one is flipped rather than dropped.

use chrono::NaiveDate;

use crate::papers::Paper;

use super::{Relationship, RelationshipCandidate};

/// Decision for a candidate's direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalVerdict {
    /// Keep the direction as presented.
    Accept,
    /// Swap source and target; type, confidence and description are unchanged.
    Flip,
    /// Do not store the candidate.
    Reject(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Source and target are the same paper.
    SelfRelationship,
    /// A date is missing and the validator is configured to be conservative.
    MissingDate,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::SelfRelationship => f.write_str("source and target are the same paper"),
            RejectReason::MissingDate => f.write_str("publication date missing"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TemporalValidator {
    reject_missing_dates: bool,
}

impl TemporalValidator {
    /// `reject_missing_dates = false` is the default: a paper without a date
    /// cannot be validated, so its candidates pass unchanged.
    pub fn new(reject_missing_dates: bool) -> Self {
        Self { reject_missing_dates }
    }

    /// Decide the direction for a candidate evaluated as `source -> target`.
    pub fn validate(&self, source: &Paper, target: &Paper) -> TemporalVerdict {
        if source.id == target.id {
            return TemporalVerdict::Reject(RejectReason::SelfRelationship);
        }

        match (source.published_date, target.published_date) {
            (Some(source_date), Some(target_date)) => {
                if source_date < target_date {
                    TemporalVerdict::Flip
                } else {
                    TemporalVerdict::Accept
                }
            }
            _ if self.reject_missing_dates => TemporalVerdict::Reject(RejectReason::MissingDate),
            _ => TemporalVerdict::Accept,
        }
    }

    /// Validate and build the edge to store, if any.
    pub fn orient(
        &self,
        candidate: &RelationshipCandidate,
        source: &Paper,
        target: &Paper,
    ) -> (TemporalVerdict, Option<Relationship>) {
        let verdict = self.validate(source, target);
        let edge = match verdict {
            TemporalVerdict::Accept => Some(Relationship::from_candidate(candidate, &source.id, &target.id)),
            TemporalVerdict::Flip => {
                log::debug!(
                    "Flipping {} -> {} ({}): source predates target",
                    source.id,
                    target.id,
                    candidate.relationship_type
                );
                Some(Relationship::from_candidate(candidate, &target.id, &source.id))
            }
            TemporalVerdict::Reject(_) => None,
        };
        (verdict, edge)
    }
}

/// True when an edge from a paper dated `source` to one dated `target` points
/// from the older paper to the newer one. Unknown dates never violate.
pub(crate) fn is_temporal_violation(source: Option<NaiveDate>, target: Option<NaiveDate>) -> bool {
    matches!((source, target), (Some(s), Some(t)) if s < t)
}
