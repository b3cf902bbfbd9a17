//! BFS traversal over stored relationships.

use std::collections::{HashSet, VecDeque};

use crate::error::Result;

use super::{Relationship, RelationshipStore, RelationshipType};

/// Traverse the graph along outgoing edges using BFS.
///
/// Returns every edge discovered within `max_depth` hops from `start_paper`,
/// following only `relation_types` when given. Each paper is expanded once, so
/// cycles terminate.
pub async fn traverse_graph(
    store: &RelationshipStore,
    start_paper: &str,
    relation_types: Option<&[RelationshipType]>,
    max_depth: usize,
) -> Result<Vec<Relationship>> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    let mut result = Vec::new();

    queue.push_back((start_paper.to_string(), 0));
    visited.insert(start_paper.to_string());

    while let Some((paper_id, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }

        let edges = store.outgoing(&paper_id).await?;

        for edge in edges {
            if let Some(types) = relation_types {
                if !types.contains(&edge.relationship_type) {
                    continue;
                }
            }
            if visited.insert(edge.target_id.clone()) {
                queue.push_back((edge.target_id.clone(), depth + 1));
                result.push(edge);
            }
        }
    }

    Ok(result)
}
