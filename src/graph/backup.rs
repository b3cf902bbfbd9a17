//! Relationship export and restore.
//!
//! A restore never writes backup rows directly: every edge goes back through
//! the temporal validator and the store, so a legacy backup holding both
//! directions of a pair (or an older-cites-newer edge) comes back consistent.

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::papers::{Paper, PaperRepository};

use super::{Relationship, RelationshipCandidate, RelationshipStore, TemporalValidator, UpsertOutcome};

#[derive(Debug, Default, Serialize)]
pub struct RestoreReport {
    pub read: usize,
    pub stored: usize,
    pub replaced: usize,
    /// Pair already had an edge (including the second half of a legacy bidirectional pair).
    pub skipped: usize,
    pub flipped: usize,
    pub rejected: usize,
    /// Edges naming a paper that is not in the repository.
    pub unknown_papers: usize,
    /// Edges the store refused, such as an out-of-range confidence.
    pub errored: usize,
}

/// Write every stored relationship to `path` as a JSON array.
pub async fn export_relationships(store: &RelationshipStore, path: &Path) -> Result<usize> {
    let edges = store.list_all().await?;
    let json = serde_json::to_string_pretty(&edges)?;
    tokio::fs::write(path, json).await?;
    log::info!("Exported {} relationships to {}", edges.len(), path.display());
    Ok(edges.len())
}

/// Read a JSON array of relationships from `path`.
pub async fn read_backup(path: &Path) -> Result<Vec<Relationship>> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&text)?)
}

/// Re-apply backed-up edges through validation and the store's upsert rules.
///
/// Edges keep their original `created_at`. Edges whose papers are unknown are
/// counted and left out, since their direction cannot be checked. A row the
/// store refuses is counted in `errored` and the restore carries on.
pub async fn restore_relationships(
    papers: &dyn PaperRepository,
    store: &RelationshipStore,
    validator: &TemporalValidator,
    edges: &[Relationship],
) -> Result<RestoreReport> {
    let corpus: HashMap<String, Paper> = papers
        .list_all()
        .await?
        .into_iter()
        .map(|p| (p.id.clone(), p))
        .collect();

    let mut report = RestoreReport {
        read: edges.len(),
        ..RestoreReport::default()
    };

    for edge in edges {
        let (Some(source), Some(target)) = (corpus.get(&edge.source_id), corpus.get(&edge.target_id)) else {
            log::warn!("Skipping {} -> {}: unknown paper", edge.source_id, edge.target_id);
            report.unknown_papers += 1;
            continue;
        };

        let candidate = RelationshipCandidate {
            relationship_type: edge.relationship_type,
            confidence: edge.confidence,
            description: edge.description.clone(),
        };
        let (_, oriented) = validator.orient(&candidate, source, target);
        let Some(mut oriented) = oriented else {
            report.rejected += 1;
            continue;
        };
        if oriented.source_id != edge.source_id {
            report.flipped += 1;
        }
        oriented.created_at = edge.created_at;

        match store.upsert(&oriented).await {
            Ok(UpsertOutcome::Stored) => report.stored += 1,
            Ok(UpsertOutcome::Replaced { .. }) => report.replaced += 1,
            Ok(UpsertOutcome::Skipped(_)) => report.skipped += 1,
            Err(e) => {
                log::error!("Failed to restore {} -> {}: {}", edge.source_id, edge.target_id, e);
                report.errored += 1;
            }
        }
    }

    log::info!(
        "Restored {} of {} relationships ({} skipped, {} flipped, {} rejected, {} with unknown papers, {} errored)",
        report.stored + report.replaced,
        report.read,
        report.skipped,
        report.flipped,
        report.rejected,
        report.unknown_papers,
        report.errored
    );

    Ok(report)
}
