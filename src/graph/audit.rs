//! Consistency audit of stored relationships.
//!
//! Edges are validated when written, but a paper's date can be backfilled
//! later, turning a stored edge into an older-cites-newer one. The audit finds
//! those edges and can reverse them in place; the pair key does not change.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::Result;
use crate::papers::{Paper, PaperRepository};

use super::temporal::is_temporal_violation;
use super::{Relationship, RelationshipStore};

#[derive(Debug, Default, Serialize)]
pub struct AuditReport {
    pub relationships_checked: usize,
    /// Edges whose source is older than their target.
    pub temporal_violations: Vec<Relationship>,
    /// Edges referencing a paper that is not in the repository.
    pub dangling: Vec<Relationship>,
    /// Violations reversed when running with `fix`, as they are now stored.
    pub reversed: Vec<Relationship>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.temporal_violations.is_empty() && self.dangling.is_empty()
    }
}

/// Check every stored edge against the current paper metadata.
///
/// With `fix`, temporal violations are reversed. Dangling edges are only reported.
pub async fn audit_graph(
    papers: &dyn PaperRepository,
    store: &RelationshipStore,
    fix: bool,
) -> Result<AuditReport> {
    let corpus: HashMap<String, Paper> = papers
        .list_all()
        .await?
        .into_iter()
        .map(|p| (p.id.clone(), p))
        .collect();
    let edges = store.list_all().await?;

    let mut report = AuditReport {
        relationships_checked: edges.len(),
        ..AuditReport::default()
    };

    for edge in edges {
        let (Some(source), Some(target)) = (corpus.get(&edge.source_id), corpus.get(&edge.target_id)) else {
            log::warn!(
                "Dangling relationship {} -> {} ({})",
                edge.source_id,
                edge.target_id,
                edge.relationship_type
            );
            report.dangling.push(edge);
            continue;
        };

        if is_temporal_violation(source.published_date, target.published_date) {
            log::warn!(
                "Temporal violation: {} ({:?}) -{}-> {} ({:?})",
                source.id,
                source.published_date,
                edge.relationship_type,
                target.id,
                target.published_date
            );
            if fix && store.reverse(&edge.pair_key()).await? {
                let fixed = edge.reversed();
                log::info!("Reversed {} to {} -> {}", edge.pair_key(), fixed.source_id, fixed.target_id);
                report.reversed.push(fixed);
            }
            report.temporal_violations.push(edge);
        }
    }

    log::info!(
        "Audit checked {} relationships: {} temporal violations ({} reversed), {} dangling",
        report.relationships_checked,
        report.temporal_violations.len(),
        report.reversed.len(),
        report.dangling.len()
    );

    Ok(report)
}
