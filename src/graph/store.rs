//! Relationship persistence with one-edge-per-pair semantics.

use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, OptionalExtension, Row, TransactionBehavior};

use crate::db::Db;
use crate::error::{PapergraphError, Result};

use super::{PairKey, Relationship, RelationshipType};

/// What to do when a pair already has a stored edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverwritePolicy {
    /// Never touch a stored edge.
    #[default]
    Skip,
    /// Replace a stored edge with a strictly higher-confidence candidate.
    /// Reverse contradictions are still refused.
    ReplaceOnHigherConfidence,
}

/// Result of [`RelationshipStore::upsert`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpsertOutcome {
    Stored,
    Replaced { previous_confidence: f64 },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The pair already has an edge that wins.
    Duplicate,
    /// The pair has a `contradicts` edge and the candidate runs the other way.
    ContradictionConflict,
}

/// Decide what an upsert does, given the edge currently stored for the pair.
fn decide(existing: Option<&Relationship>, candidate: &Relationship, policy: OverwritePolicy) -> UpsertOutcome {
    let Some(existing) = existing else {
        return UpsertOutcome::Stored;
    };

    if existing.relationship_type == RelationshipType::Contradicts && candidate.is_reverse_of(existing) {
        return UpsertOutcome::Skipped(SkipReason::ContradictionConflict);
    }

    match policy {
        OverwritePolicy::ReplaceOnHigherConfidence if candidate.confidence > existing.confidence => {
            UpsertOutcome::Replaced {
                previous_confidence: existing.confidence,
            }
        }
        _ => UpsertOutcome::Skipped(SkipReason::Duplicate),
    }
}

/// Edge storage over the `relationships` table, keyed by [`PairKey`].
#[derive(Debug, Clone)]
pub struct RelationshipStore {
    db: Db,
    policy: OverwritePolicy,
}

const RELATIONSHIP_COLUMNS: &str =
    "source_id, target_id, relationship_type, confidence, description, created_at";

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        Type::Text,
        Box::new(PapergraphError::InvalidInput(message)),
    )
}

fn relationship_from_row(row: &Row<'_>) -> rusqlite::Result<Relationship> {
    let type_str: String = row.get(2)?;
    let relationship_type = RelationshipType::from_str(&type_str)
        .map_err(|e| conversion_error(2, e.to_string()))?;
    let created_str: String = row.get(5)?;
    let created_at = DateTime::parse_from_rfc3339(&created_str)
        .map_err(|e| conversion_error(5, format!("invalid created_at {:?}: {}", created_str, e)))?
        .with_timezone(&Utc);

    Ok(Relationship {
        source_id: row.get(0)?,
        target_id: row.get(1)?,
        relationship_type,
        confidence: row.get(3)?,
        description: row.get(4)?,
        created_at,
    })
}

impl RelationshipStore {
    pub fn new(db: Db, policy: OverwritePolicy) -> Self {
        Self { db, policy }
    }

    pub fn policy(&self) -> OverwritePolicy {
        self.policy
    }

    /// Store, replace or skip an edge whose direction has already been validated.
    ///
    /// The read of the current edge and the write happen in one immediate
    /// transaction, so two writers for the same pair cannot both see an empty slot.
    pub async fn upsert(&self, edge: &Relationship) -> Result<UpsertOutcome> {
        if edge.source_id == edge.target_id {
            return Err(PapergraphError::InvalidInput(format!(
                "relationship from {} to itself",
                edge.source_id
            )));
        }
        if !edge.confidence.is_finite() || !(0.0..=1.0).contains(&edge.confidence) {
            return Err(PapergraphError::InvalidInput(format!(
                "confidence {} outside [0, 1]",
                edge.confidence
            )));
        }

        let edge = edge.clone();
        let policy = self.policy;

        let (outcome, existing) = self
            .db
            .with_connection(move |conn| {
                let key = edge.pair_key();
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

                let existing = tx
                    .query_row(
                        &format!("SELECT {} FROM relationships WHERE pair_key = ?1", RELATIONSHIP_COLUMNS),
                        params![key.as_str()],
                        relationship_from_row,
                    )
                    .optional()?;

                let outcome = decide(existing.as_ref(), &edge, policy);
                let created_at = edge.created_at.to_rfc3339();

                match outcome {
                    UpsertOutcome::Stored => {
                        tx.execute(
                            "INSERT INTO relationships (pair_key, source_id, target_id, relationship_type, \
                             confidence, description, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                            params![
                                key.as_str(),
                                edge.source_id,
                                edge.target_id,
                                edge.relationship_type.as_str(),
                                edge.confidence,
                                edge.description,
                                created_at,
                            ],
                        )?;
                    }
                    UpsertOutcome::Replaced { .. } => {
                        tx.execute(
                            "UPDATE relationships SET source_id = ?2, target_id = ?3, relationship_type = ?4, \
                             confidence = ?5, description = ?6, created_at = ?7 WHERE pair_key = ?1",
                            params![
                                key.as_str(),
                                edge.source_id,
                                edge.target_id,
                                edge.relationship_type.as_str(),
                                edge.confidence,
                                edge.description,
                                created_at,
                            ],
                        )?;
                    }
                    UpsertOutcome::Skipped(_) => {}
                }

                tx.commit()?;
                Ok::<_, PapergraphError>((outcome, existing))
            })
            .await?;

        if let (UpsertOutcome::Skipped(SkipReason::ContradictionConflict), Some(existing)) = (&outcome, &existing) {
            log::warn!(
                "Contradiction conflict on {}: stored {} -> {} contradicts, refusing reverse edge (needs review)",
                existing.pair_key(),
                existing.source_id,
                existing.target_id
            );
        }

        Ok(outcome)
    }

    /// Edge stored for a pair, if any.
    pub async fn get(&self, key: &PairKey) -> Result<Option<Relationship>> {
        let key = key.as_str().to_string();
        self.db
            .with_connection(move |conn| {
                let edge = conn
                    .query_row(
                        &format!("SELECT {} FROM relationships WHERE pair_key = ?1", RELATIONSHIP_COLUMNS),
                        params![key],
                        relationship_from_row,
                    )
                    .optional()?;
                Ok(edge)
            })
            .await
    }

    /// Keys of every pair that already has an edge.
    pub async fn pair_keys(&self) -> Result<HashSet<PairKey>> {
        self.db
            .with_connection(|conn| {
                let mut stmt = conn.prepare("SELECT pair_key FROM relationships")?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                let mut keys = HashSet::new();
                for row in rows {
                    keys.insert(PairKey::from_stored(row?));
                }
                Ok::<HashSet<PairKey>, PapergraphError>(keys)
            })
            .await
    }

    pub async fn list_all(&self) -> Result<Vec<Relationship>> {
        self.query(
            format!("SELECT {} FROM relationships ORDER BY pair_key", RELATIONSHIP_COLUMNS),
            Vec::new(),
        )
        .await
    }

    /// Edges where `paper_id` is the source (papers it builds on).
    pub async fn outgoing(&self, paper_id: &str) -> Result<Vec<Relationship>> {
        self.query(
            format!(
                "SELECT {} FROM relationships WHERE source_id = ?1 ORDER BY confidence DESC",
                RELATIONSHIP_COLUMNS
            ),
            vec![paper_id.to_string()],
        )
        .await
    }

    /// Edges where `paper_id` is the target (papers citing it).
    pub async fn incoming(&self, paper_id: &str) -> Result<Vec<Relationship>> {
        self.query(
            format!(
                "SELECT {} FROM relationships WHERE target_id = ?1 ORDER BY confidence DESC",
                RELATIONSHIP_COLUMNS
            ),
            vec![paper_id.to_string()],
        )
        .await
    }

    /// `contradicts` edges touching `paper_id` in either direction.
    pub async fn contradictions_for(&self, paper_id: &str) -> Result<Vec<Relationship>> {
        self.query(
            format!(
                "SELECT {} FROM relationships WHERE relationship_type = 'contradicts' \
                 AND (source_id = ?1 OR target_id = ?1) ORDER BY confidence DESC",
                RELATIONSHIP_COLUMNS
            ),
            vec![paper_id.to_string()],
        )
        .await
    }

    /// Edges whose both endpoints are in `paper_ids`.
    pub async fn edges_among(&self, paper_ids: &[String]) -> Result<Vec<Relationship>> {
        if paper_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = paper_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT {} FROM relationships WHERE source_id IN ({p}) AND target_id IN ({p}) ORDER BY pair_key",
            RELATIONSHIP_COLUMNS,
            p = placeholders
        );
        let mut params = paper_ids.to_vec();
        params.extend(paper_ids.iter().cloned());
        self.query(sql, params).await
    }

    /// Number of edges per type.
    pub async fn count_by_type(&self) -> Result<Vec<(RelationshipType, usize)>> {
        let counts = self
            .db
            .with_connection(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT relationship_type, COUNT(*) FROM relationships GROUP BY relationship_type",
                )?;
                let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok::<Vec<(String, i64)>, PapergraphError>(out)
            })
            .await?;

        Ok(RelationshipType::ALL
            .iter()
            .map(|t| {
                let n = counts
                    .iter()
                    .find(|(name, _)| name == t.as_str())
                    .map(|(_, n)| *n as usize)
                    .unwrap_or(0);
                (*t, n)
            })
            .collect())
    }

    /// Swap source and target of the edge stored for `key`, keeping its content.
    ///
    /// Returns false when the pair has no edge.
    pub async fn reverse(&self, key: &PairKey) -> Result<bool> {
        let key = key.as_str().to_string();
        self.db
            .with_connection(move |conn| {
                let changed = conn.execute(
                    "UPDATE relationships SET source_id = target_id, target_id = source_id WHERE pair_key = ?1",
                    params![key],
                )?;
                Ok(changed > 0)
            })
            .await
    }

    async fn query(&self, sql: String, params: Vec<String>) -> Result<Vec<Relationship>> {
        self.db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(params.iter()), relationship_from_row)?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok::<Vec<Relationship>, PapergraphError>(out)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrate;
    use std::path::Path;
    use tempfile::TempDir;

    async fn setup_store(policy: OverwritePolicy) -> (RelationshipStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Db::new(temp_dir.path().join("test.db"));
        let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
        db.with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
            .await
            .unwrap();
        (RelationshipStore::new(db, policy), temp_dir)
    }

    fn edge(source: &str, target: &str, t: RelationshipType, confidence: f64) -> Relationship {
        Relationship {
            source_id: source.to_string(),
            target_id: target.to_string(),
            relationship_type: t,
            confidence,
            description: format!("{} {} {}", source, t, target),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_decide_empty_slot_stores() {
        let e = edge("a", "b", RelationshipType::Extends, 0.8);
        assert_eq!(decide(None, &e, OverwritePolicy::Skip), UpsertOutcome::Stored);
    }

    #[test]
    fn test_decide_duplicate_skipped_by_default() {
        let stored = edge("a", "b", RelationshipType::Extends, 0.5);
        let higher = edge("a", "b", RelationshipType::Supports, 0.9);
        assert_eq!(
            decide(Some(&stored), &higher, OverwritePolicy::Skip),
            UpsertOutcome::Skipped(SkipReason::Duplicate)
        );
    }

    #[test]
    fn test_decide_replace_requires_strictly_higher() {
        let stored = edge("a", "b", RelationshipType::Extends, 0.7);
        let equal = edge("a", "b", RelationshipType::Supports, 0.7);
        let higher = edge("a", "b", RelationshipType::Supports, 0.71);
        let policy = OverwritePolicy::ReplaceOnHigherConfidence;
        assert_eq!(decide(Some(&stored), &equal, policy), UpsertOutcome::Skipped(SkipReason::Duplicate));
        assert_eq!(
            decide(Some(&stored), &higher, policy),
            UpsertOutcome::Replaced { previous_confidence: 0.7 }
        );
    }

    #[test]
    fn test_decide_reverse_contradiction_never_replaced() {
        let stored = edge("x", "y", RelationshipType::Contradicts, 0.7);
        let reverse = edge("y", "x", RelationshipType::Contradicts, 0.99);
        for policy in [OverwritePolicy::Skip, OverwritePolicy::ReplaceOnHigherConfidence] {
            assert_eq!(
                decide(Some(&stored), &reverse, policy),
                UpsertOutcome::Skipped(SkipReason::ContradictionConflict)
            );
        }
    }

    #[tokio::test]
    async fn test_upsert_stores_then_skips_reverse_duplicate() {
        let (store, _temp) = setup_store(OverwritePolicy::Skip).await;

        let first = store.upsert(&edge("A", "B", RelationshipType::Extends, 0.8)).await.unwrap();
        assert_eq!(first, UpsertOutcome::Stored);

        let second = store.upsert(&edge("B", "A", RelationshipType::Extends, 0.75)).await.unwrap();
        assert_eq!(second, UpsertOutcome::Skipped(SkipReason::Duplicate));

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].source_id, "A");
        assert_eq!(all[0].confidence, 0.8);
    }

    #[tokio::test]
    async fn test_upsert_replace_mode_overwrites_higher_confidence() {
        let (store, _temp) = setup_store(OverwritePolicy::ReplaceOnHigherConfidence).await;

        store.upsert(&edge("A", "B", RelationshipType::Supports, 0.6)).await.unwrap();
        let outcome = store.upsert(&edge("A", "B", RelationshipType::Extends, 0.9)).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Replaced { previous_confidence: 0.6 });

        let stored = store.get(&PairKey::new("B", "A")).await.unwrap().unwrap();
        assert_eq!(stored.relationship_type, RelationshipType::Extends);
        assert_eq!(stored.confidence, 0.9);
        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_refuses_reverse_contradiction() {
        let (store, _temp) = setup_store(OverwritePolicy::ReplaceOnHigherConfidence).await;

        store.upsert(&edge("X", "Y", RelationshipType::Contradicts, 0.7)).await.unwrap();
        let outcome = store.upsert(&edge("Y", "X", RelationshipType::Contradicts, 0.95)).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Skipped(SkipReason::ContradictionConflict));

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].source_id, "X");
        assert_eq!(all[0].target_id, "Y");
    }

    #[tokio::test]
    async fn test_upsert_validates_edge() {
        let (store, _temp) = setup_store(OverwritePolicy::Skip).await;
        assert!(store.upsert(&edge("A", "A", RelationshipType::Extends, 0.8)).await.is_err());
        assert!(store.upsert(&edge("A", "B", RelationshipType::Extends, 1.5)).await.is_err());
        assert!(store.upsert(&edge("A", "B", RelationshipType::Extends, f64::NAN)).await.is_err());
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_upserts_same_pair_store_once() {
        let (store, _temp) = setup_store(OverwritePolicy::Skip).await;

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let e = if i % 2 == 0 {
                    edge("A", "B", RelationshipType::Supports, 0.6)
                } else {
                    edge("B", "A", RelationshipType::Supports, 0.6)
                };
                store.upsert(&e).await.unwrap()
            }));
        }

        let mut stored = 0;
        for handle in handles {
            if handle.await.unwrap() == UpsertOutcome::Stored {
                stored += 1;
            }
        }
        assert_eq!(stored, 1);
        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_queries_by_endpoint() {
        let (store, _temp) = setup_store(OverwritePolicy::Skip).await;
        store.upsert(&edge("A", "B", RelationshipType::Extends, 0.8)).await.unwrap();
        store.upsert(&edge("C", "B", RelationshipType::Contradicts, 0.9)).await.unwrap();
        store.upsert(&edge("C", "D", RelationshipType::Supports, 0.6)).await.unwrap();

        assert_eq!(store.outgoing("C").await.unwrap().len(), 2);
        assert_eq!(store.incoming("B").await.unwrap().len(), 2);
        assert_eq!(store.contradictions_for("B").await.unwrap().len(), 1);

        let among = store
            .edges_among(&["A".to_string(), "B".to_string(), "C".to_string()])
            .await
            .unwrap();
        assert_eq!(among.len(), 2);
        assert!(store.edges_among(&[]).await.unwrap().is_empty());

        let counts = store.count_by_type().await.unwrap();
        assert_eq!(
            counts,
            vec![
                (RelationshipType::Extends, 1),
                (RelationshipType::Supports, 1),
                (RelationshipType::Contradicts, 1),
            ]
        );

        let keys = store.pair_keys().await.unwrap();
        assert!(keys.contains(&PairKey::new("B", "A")));
        assert!(!keys.contains(&PairKey::new("A", "D")));
    }

    #[tokio::test]
    async fn test_reverse_swaps_endpoints() {
        let (store, _temp) = setup_store(OverwritePolicy::Skip).await;
        store.upsert(&edge("old", "new", RelationshipType::Extends, 0.8)).await.unwrap();

        let key = PairKey::new("old", "new");
        assert!(store.reverse(&key).await.unwrap());
        let e = store.get(&key).await.unwrap().unwrap();
        assert_eq!(e.source_id, "new");
        assert_eq!(e.target_id, "old");
        assert_eq!(e.confidence, 0.8);

        assert!(!store.reverse(&PairKey::new("x", "y")).await.unwrap());
    }
}
