//! Graph update runs.
//!
//! Two modes feed the same validate-then-store pipeline:
//!
//! - **Incremental**: one new paper against every other paper in the corpus,
//!   one oracle call per pair.
//! - **Repair**: every unordered pair without a stored edge, asking the oracle
//!   in both orders (newer paper first) and keeping the first accepted answer.
//!
//! Per-pair failures are recorded in the [`UpdateSummary`] and never abort a
//! run.

mod locks;

pub use locks::{PairGuard, PairLocks};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::graph::{
    PairKey, RelationshipCandidate, RelationshipStore, RelationshipType, TemporalValidator, TemporalVerdict,
    UpsertOutcome,
};
use crate::oracle::{OracleError, RateLimiter, RelationshipOracle, RetryPolicy};
use crate::papers::{Paper, PaperRepository};

pub const DEFAULT_CONCURRENCY: usize = 8;

/// Minimum oracle confidence per relationship type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceThresholds {
    #[serde(default = "default_threshold")]
    pub extends: f64,
    #[serde(default = "default_threshold")]
    pub supports: f64,
    /// Contradictions need stronger evidence.
    #[serde(default = "default_contradicts_threshold")]
    pub contradicts: f64,
}

fn default_threshold() -> f64 {
    0.5
}

fn default_contradicts_threshold() -> f64 {
    0.7
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            extends: default_threshold(),
            supports: default_threshold(),
            contradicts: default_contradicts_threshold(),
        }
    }
}

impl ConfidenceThresholds {
    pub fn minimum(&self, relationship_type: RelationshipType) -> f64 {
        match relationship_type {
            RelationshipType::Extends => self.extends,
            RelationshipType::Supports => self.supports,
            RelationshipType::Contradicts => self.contradicts,
        }
    }

    pub fn admits(&self, candidate: &RelationshipCandidate) -> bool {
        candidate.confidence >= self.minimum(candidate.relationship_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateMode {
    /// Compare one paper against the rest of the corpus.
    Incremental { paper_id: String },
    /// Evaluate every pair not yet linked.
    Repair,
}

impl UpdateMode {
    pub fn name(&self) -> &'static str {
        match self {
            UpdateMode::Incremental { .. } => "incremental",
            UpdateMode::Repair => "repair",
        }
    }
}

/// Shared flag checked before each pair is evaluated.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairError {
    pub pair_key: PairKey,
    pub source_id: String,
    pub target_id: String,
    pub error: String,
}

/// Outcome counts of one run. Every pair lands in exactly one counter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateSummary {
    pub run_id: Uuid,
    pub mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paper_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub papers_in_corpus: usize,
    /// Pairs handed to the oracle.
    pub pairs_evaluated: usize,
    pub oracle_calls: usize,
    pub stored: usize,
    pub replaced: usize,
    /// Duplicates, contradiction conflicts, and (repair) pairs already linked.
    pub skipped: usize,
    pub rejected: usize,
    pub no_relationship: usize,
    pub errored: usize,
    /// Pairs never started because the run was cancelled.
    pub cancelled: usize,
    pub errors: Vec<PairError>,
}

impl UpdateSummary {
    fn new(run_id: Uuid, mode: &UpdateMode, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            mode: mode.name(),
            paper_id: match mode {
                UpdateMode::Incremental { paper_id } => Some(paper_id.clone()),
                UpdateMode::Repair => None,
            },
            started_at,
            finished_at: started_at,
            papers_in_corpus: 0,
            pairs_evaluated: 0,
            oracle_calls: 0,
            stored: 0,
            replaced: 0,
            skipped: 0,
            rejected: 0,
            no_relationship: 0,
            errored: 0,
            cancelled: 0,
            errors: Vec::new(),
        }
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled > 0
    }

    fn record(&mut self, report: PairReport<'_>) {
        self.oracle_calls += report.oracle_calls;
        if !matches!(report.outcome, PairOutcome::Cancelled) {
            self.pairs_evaluated += 1;
        }
        match report.outcome {
            PairOutcome::Stored => self.stored += 1,
            PairOutcome::Replaced => self.replaced += 1,
            PairOutcome::Skipped => self.skipped += 1,
            PairOutcome::Rejected => self.rejected += 1,
            PairOutcome::NoRelationship => self.no_relationship += 1,
            PairOutcome::Cancelled => self.cancelled += 1,
            PairOutcome::Errored(failure) => {
                self.errored += 1;
                self.errors.push(PairError {
                    pair_key: report.job.key.clone(),
                    source_id: failure.source_id,
                    target_id: failure.target_id,
                    error: failure.error,
                });
            }
        }
    }
}

/// One unordered pair and the orders to present it to the oracle in.
struct PairJob<'a> {
    key: PairKey,
    orders: Vec<(&'a Paper, &'a Paper)>,
}

enum PairOutcome {
    Stored,
    Replaced,
    Skipped,
    Rejected,
    NoRelationship,
    Errored(PairFailure),
    Cancelled,
}

/// The ordered presentation that failed, and why.
struct PairFailure {
    source_id: String,
    target_id: String,
    error: String,
}

struct PairReport<'a> {
    job: PairJob<'a>,
    outcome: PairOutcome,
    oracle_calls: usize,
}

/// Orders for a repair pair: newer paper first when both dates are known.
fn repair_orders<'a>(a: &'a Paper, b: &'a Paper) -> Vec<(&'a Paper, &'a Paper)> {
    match (a.published_date, b.published_date) {
        (Some(da), Some(db)) if db > da => vec![(b, a), (a, b)],
        _ => vec![(a, b), (b, a)],
    }
}

pub struct GraphUpdateEngine {
    papers: Arc<dyn PaperRepository>,
    oracle: Arc<dyn RelationshipOracle>,
    store: RelationshipStore,
    validator: TemporalValidator,
    thresholds: ConfidenceThresholds,
    retry: RetryPolicy,
    limiter: Option<Arc<RateLimiter>>,
    concurrency: usize,
    locks: PairLocks,
}

impl GraphUpdateEngine {
    pub fn new(
        papers: Arc<dyn PaperRepository>,
        oracle: Arc<dyn RelationshipOracle>,
        store: RelationshipStore,
    ) -> Self {
        Self {
            papers,
            oracle,
            store,
            validator: TemporalValidator::default(),
            thresholds: ConfidenceThresholds::default(),
            retry: RetryPolicy::default(),
            limiter: None,
            concurrency: DEFAULT_CONCURRENCY,
            locks: PairLocks::new(),
        }
    }

    pub fn with_validator(mut self, validator: TemporalValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_thresholds(mut self, thresholds: ConfidenceThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Values below 1 are raised to 1.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn store(&self) -> &RelationshipStore {
        &self.store
    }

    /// Run one update. Only loading the corpus (or the incremental paper) can
    /// fail the run; everything per-pair ends up in the summary.
    pub async fn run(&self, mode: UpdateMode, cancel: &CancellationFlag) -> Result<UpdateSummary> {
        let run_id = Uuid::new_v4();
        let mut summary = UpdateSummary::new(run_id, &mode, Utc::now());

        log::info!("=== Graph update {} ({}) ===", run_id, mode.name());

        let corpus = self.papers.list_all().await?;
        summary.papers_in_corpus = corpus.len();

        let new_paper;
        let jobs: Vec<PairJob<'_>> = match &mode {
            UpdateMode::Incremental { paper_id } => {
                new_paper = self.papers.get(paper_id).await?;
                log::info!(
                    "Comparing '{}' against {} papers",
                    new_paper.short_title(),
                    corpus.iter().filter(|q| q.id != new_paper.id).count()
                );
                corpus
                    .iter()
                    .filter(|q| q.id != new_paper.id)
                    .map(|q| PairJob {
                        key: PairKey::new(&new_paper.id, &q.id),
                        orders: vec![(&new_paper, q)],
                    })
                    .collect()
            }
            UpdateMode::Repair => {
                let covered = self.store.pair_keys().await?;
                let mut jobs = Vec::new();
                for (i, a) in corpus.iter().enumerate() {
                    for b in &corpus[i + 1..] {
                        let key = PairKey::new(&a.id, &b.id);
                        if covered.contains(&key) {
                            summary.skipped += 1;
                            continue;
                        }
                        jobs.push(PairJob {
                            key,
                            orders: repair_orders(a, b),
                        });
                    }
                }
                log::info!(
                    "{} papers: {} pairs already linked, {} to evaluate",
                    corpus.len(),
                    summary.skipped,
                    jobs.len()
                );
                jobs
            }
        };

        let reports: Vec<PairReport<'_>> = stream::iter(jobs)
            .map(|job| self.process_pair(job, cancel))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for report in reports {
            summary.record(report);
        }
        summary.finished_at = Utc::now();

        if summary.was_cancelled() {
            log::warn!("Run cancelled, {} pairs not evaluated", summary.cancelled);
        }
        log::info!("=== Graph Update Complete ===");
        log::info!(
            "Evaluated {} pairs ({} oracle calls): {} stored, {} replaced, {} skipped, {} rejected, {} no relationship, {} errored",
            summary.pairs_evaluated,
            summary.oracle_calls,
            summary.stored,
            summary.replaced,
            summary.skipped,
            summary.rejected,
            summary.no_relationship,
            summary.errored
        );

        Ok(summary)
    }

    async fn process_pair<'a>(&self, job: PairJob<'a>, cancel: &CancellationFlag) -> PairReport<'a> {
        if cancel.is_cancelled() {
            return PairReport {
                job,
                outcome: PairOutcome::Cancelled,
                oracle_calls: 0,
            };
        }

        let _guard = self.locks.lock(&job.key).await;
        let mut oracle_calls = 0;
        let mut last_error = None;
        let mut rejected = false;

        let orders = job.orders.clone();
        for (source, target) in orders {
            oracle_calls += 1;
            let candidate = match self.propose(source, target).await {
                Ok(Some(candidate)) => candidate,
                Ok(None) => {
                    log::debug!("{} -> {}: no relationship", source.id, target.id);
                    continue;
                }
                Err(e) => {
                    log::error!("Oracle failed for {} -> {}: {}", source.id, target.id, e);
                    last_error = Some(PairFailure {
                        source_id: source.id.clone(),
                        target_id: target.id.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            if !self.thresholds.admits(&candidate) {
                log::debug!(
                    "{} -> {}: {} at {:.2} below threshold {:.2}",
                    source.id,
                    target.id,
                    candidate.relationship_type,
                    candidate.confidence,
                    self.thresholds.minimum(candidate.relationship_type)
                );
                continue;
            }

            let (verdict, edge) = self.validator.orient(&candidate, source, target);
            let Some(edge) = edge else {
                if let TemporalVerdict::Reject(reason) = verdict {
                    log::debug!("{} -> {} rejected: {}", source.id, target.id, reason);
                }
                rejected = true;
                continue;
            };

            let outcome = match self.store.upsert(&edge).await {
                Ok(UpsertOutcome::Stored) => {
                    log::info!(
                        "Stored {} -{}-> {} ({:.2})",
                        edge.source_id,
                        edge.relationship_type,
                        edge.target_id,
                        edge.confidence
                    );
                    PairOutcome::Stored
                }
                Ok(UpsertOutcome::Replaced { previous_confidence }) => {
                    log::info!(
                        "Replaced {} with {} -{}-> {} ({:.2} > {:.2})",
                        job.key,
                        edge.source_id,
                        edge.relationship_type,
                        edge.target_id,
                        edge.confidence,
                        previous_confidence
                    );
                    PairOutcome::Replaced
                }
                Ok(UpsertOutcome::Skipped(reason)) => {
                    log::debug!("Skipped {}: {:?}", job.key, reason);
                    PairOutcome::Skipped
                }
                Err(e) => {
                    log::error!("Failed to store {}: {}", job.key, e);
                    PairOutcome::Errored(PairFailure {
                        source_id: edge.source_id.clone(),
                        target_id: edge.target_id.clone(),
                        error: e.to_string(),
                    })
                }
            };

            return PairReport {
                job,
                outcome,
                oracle_calls,
            };
        }

        let outcome = match (last_error, rejected) {
            (Some(failure), _) => PairOutcome::Errored(failure),
            (None, true) => PairOutcome::Rejected,
            (None, false) => PairOutcome::NoRelationship,
        };
        PairReport {
            job,
            outcome,
            oracle_calls,
        }
    }

    async fn propose(
        &self,
        source: &Paper,
        target: &Paper,
    ) -> std::result::Result<Option<RelationshipCandidate>, OracleError> {
        let oracle = self.oracle.as_ref();
        self.retry
            .run(self.limiter.as_deref(), || oracle.propose(source, target))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{migrate, Db};
    use crate::graph::OverwritePolicy;
    use crate::papers::SqlitePaperRepository;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    type Answer = std::result::Result<Option<RelationshipCandidate>, OracleError>;

    /// Oracle answering from a table keyed by (presented source, presented target).
    #[derive(Default)]
    struct ScriptedOracle {
        answers: HashMap<(String, String), Answer>,
        calls: AtomicUsize,
        seen: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedOracle {
        fn answer(mut self, source: &str, target: &str, answer: Answer) -> Self {
            self.answers.insert((source.to_string(), target.to_string()), answer);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RelationshipOracle for ScriptedOracle {
        async fn propose(&self, source: &Paper, target: &Paper) -> Answer {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push((source.id.clone(), target.id.clone()));
            self.answers
                .get(&(source.id.clone(), target.id.clone()))
                .cloned()
                .unwrap_or(Ok(None))
        }
    }

    fn candidate(t: RelationshipType, confidence: f64) -> Answer {
        Ok(Some(RelationshipCandidate {
            relationship_type: t,
            confidence,
            description: format!("{} evidence", t),
        }))
    }

    fn paper(id: &str, date: Option<&str>) -> Paper {
        Paper {
            id: id.to_string(),
            title: format!("Paper {}", id),
            authors: vec![],
            published_date: date.map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").unwrap()),
            primary_category: "cs.LG".to_string(),
            key_finding: String::new(),
            full_text: None,
        }
    }

    struct Fixture {
        papers: Arc<SqlitePaperRepository>,
        store: RelationshipStore,
        _temp: TempDir,
    }

    async fn fixture(corpus: &[Paper]) -> Fixture {
        let temp = TempDir::new().unwrap();
        let db = Db::new(temp.path().join("test.db"));
        let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
        db.with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
            .await
            .unwrap();
        let papers = Arc::new(SqlitePaperRepository::new(db.clone()));
        for p in corpus {
            papers.upsert(p).await.unwrap();
        }
        Fixture {
            papers,
            store: RelationshipStore::new(db, OverwritePolicy::Skip),
            _temp: temp,
        }
    }

    fn engine(f: &Fixture, oracle: Arc<ScriptedOracle>) -> GraphUpdateEngine {
        GraphUpdateEngine::new(f.papers.clone(), oracle, f.store.clone()).with_retry_policy(RetryPolicy {
            max_retries: 1,
            initial_backoff: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        })
    }

    fn incremental(id: &str) -> UpdateMode {
        UpdateMode::Incremental {
            paper_id: id.to_string(),
        }
    }

    #[test]
    fn test_thresholds() {
        let t = ConfidenceThresholds::default();
        let c = |t: RelationshipType, confidence: f64| RelationshipCandidate {
            relationship_type: t,
            confidence,
            description: String::new(),
        };
        assert!(t.admits(&c(RelationshipType::Extends, 0.5)));
        assert!(!t.admits(&c(RelationshipType::Supports, 0.49)));
        assert!(!t.admits(&c(RelationshipType::Contradicts, 0.6)));
        assert!(t.admits(&c(RelationshipType::Contradicts, 0.7)));
    }

    #[test]
    fn test_repair_orders_newer_first() {
        let old = paper("old", Some("2019-01-01"));
        let new = paper("new", Some("2023-01-01"));
        let orders = repair_orders(&old, &new);
        assert_eq!(orders[0].0.id, "new");
        assert_eq!(orders[1].0.id, "old");

        let undated = paper("x", None);
        assert_eq!(repair_orders(&undated, &new)[0].0.id, "x");
    }

    #[tokio::test]
    async fn test_incremental_one_call_per_pair() {
        let f = fixture(&[
            paper("p", Some("2024-01-01")),
            paper("a", Some("2020-01-01")),
            paper("b", Some("2021-01-01")),
            paper("c", None),
        ])
        .await;
        let oracle = Arc::new(
            ScriptedOracle::default()
                .answer("p", "a", candidate(RelationshipType::Extends, 0.9))
                .answer("p", "b", candidate(RelationshipType::Supports, 0.6)),
        );
        let summary = engine(&f, oracle.clone())
            .run(incremental("p"), &CancellationFlag::new())
            .await
            .unwrap();

        assert_eq!(oracle.calls(), 3);
        assert_eq!(summary.pairs_evaluated, 3);
        assert_eq!(summary.oracle_calls, 3);
        assert_eq!(summary.stored, 2);
        assert_eq!(summary.no_relationship, 1);
        assert_eq!(summary.paper_id.as_deref(), Some("p"));
        assert!(oracle.seen.lock().unwrap().iter().all(|(s, _)| s == "p"));
    }

    #[tokio::test]
    async fn test_incremental_unknown_paper_fails_run() {
        let f = fixture(&[paper("a", None)]).await;
        let result = engine(&f, Arc::new(ScriptedOracle::default()))
            .run(incremental("missing"), &CancellationFlag::new())
            .await;
        assert!(matches!(result, Err(crate::error::PapergraphError::PaperNotFound(_))));
    }

    #[tokio::test]
    async fn test_incremental_flips_older_source() {
        let f = fixture(&[paper("old", Some("2018-06-01")), paper("new", Some("2022-06-01"))]).await;
        let oracle = Arc::new(
            ScriptedOracle::default().answer("old", "new", candidate(RelationshipType::Extends, 0.8)),
        );
        let summary = engine(&f, oracle)
            .run(incremental("old"), &CancellationFlag::new())
            .await
            .unwrap();
        assert_eq!(summary.stored, 1);

        let edge = f.store.get(&PairKey::new("old", "new")).await.unwrap().unwrap();
        assert_eq!(edge.source_id, "new");
        assert_eq!(edge.target_id, "old");
        assert_eq!(edge.description, "extends evidence");
    }

    #[tokio::test]
    async fn test_below_threshold_counts_as_no_relationship() {
        let f = fixture(&[paper("a", None), paper("b", None)]).await;
        let oracle = Arc::new(
            ScriptedOracle::default().answer("a", "b", candidate(RelationshipType::Contradicts, 0.65)),
        );
        let summary = engine(&f, oracle)
            .run(incremental("a"), &CancellationFlag::new())
            .await
            .unwrap();
        assert_eq!(summary.no_relationship, 1);
        assert_eq!(summary.stored, 0);
    }

    #[tokio::test]
    async fn test_missing_date_rejected_when_conservative() {
        let f = fixture(&[paper("a", None), paper("b", Some("2020-01-01"))]).await;
        let oracle = Arc::new(
            ScriptedOracle::default().answer("a", "b", candidate(RelationshipType::Supports, 0.9)),
        );
        let summary = engine(&f, oracle)
            .with_validator(TemporalValidator::new(true))
            .run(incremental("a"), &CancellationFlag::new())
            .await
            .unwrap();
        assert_eq!(summary.rejected, 1);
        assert!(f.store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oracle_errors_isolated_per_pair() {
        let f = fixture(&[paper("p", None), paper("a", None), paper("b", None)]).await;
        let oracle = Arc::new(
            ScriptedOracle::default()
                .answer("p", "a", Err(OracleError::Unavailable("503".into())))
                .answer("p", "b", candidate(RelationshipType::Extends, 0.9)),
        );
        let summary = engine(&f, oracle.clone())
            .run(incremental("p"), &CancellationFlag::new())
            .await
            .unwrap();

        assert_eq!(summary.errored, 1);
        assert_eq!(summary.stored, 1);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].pair_key, PairKey::new("p", "a"));
        assert!(summary.errors[0].error.contains("503"));
        // One retry for the failing pair
        assert_eq!(oracle.calls(), 3);
    }

    #[tokio::test]
    async fn test_repair_asks_both_orders_until_accepted() {
        let f = fixture(&[paper("a", Some("2020-01-01")), paper("b", Some("2023-01-01"))]).await;
        let oracle = Arc::new(
            ScriptedOracle::default().answer("a", "b", candidate(RelationshipType::Supports, 0.7)),
        );
        let summary = engine(&f, oracle.clone())
            .run(UpdateMode::Repair, &CancellationFlag::new())
            .await
            .unwrap();

        // Newer paper presented first, then the reverse order
        assert_eq!(
            *oracle.seen.lock().unwrap(),
            vec![("b".to_string(), "a".to_string()), ("a".to_string(), "b".to_string())]
        );
        assert_eq!(summary.oracle_calls, 2);
        assert_eq!(summary.stored, 1);
        let edge = f.store.get(&PairKey::new("a", "b")).await.unwrap().unwrap();
        assert_eq!(edge.source_id, "b");
    }

    #[tokio::test]
    async fn test_repair_stops_at_first_accepted() {
        let f = fixture(&[paper("a", None), paper("b", None)]).await;
        let oracle = Arc::new(
            ScriptedOracle::default()
                .answer("a", "b", candidate(RelationshipType::Extends, 0.9))
                .answer("b", "a", candidate(RelationshipType::Extends, 0.95)),
        );
        let summary = engine(&f, oracle.clone())
            .run(UpdateMode::Repair, &CancellationFlag::new())
            .await
            .unwrap();
        assert_eq!(oracle.calls(), 1);
        assert_eq!(summary.stored, 1);
    }

    #[tokio::test]
    async fn test_repair_skips_linked_pairs() {
        let f = fixture(&[paper("a", None), paper("b", None), paper("c", None)]).await;
        let oracle = Arc::new(
            ScriptedOracle::default().answer("a", "b", candidate(RelationshipType::Extends, 0.9)),
        );
        let engine = engine(&f, oracle.clone());
        let first = engine.run(UpdateMode::Repair, &CancellationFlag::new()).await.unwrap();
        assert_eq!(first.stored, 1);
        assert_eq!(first.pairs_evaluated, 3);

        let calls_before = oracle.calls();
        let second = engine.run(UpdateMode::Repair, &CancellationFlag::new()).await.unwrap();
        assert_eq!(second.stored, 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(second.pairs_evaluated, 2);
        // a|b is not asked again; the two unlinked pairs are asked in both orders
        assert_eq!(oracle.calls() - calls_before, 4);
    }

    #[tokio::test]
    async fn test_cancelled_run_evaluates_nothing() {
        let f = fixture(&[paper("a", None), paper("b", None), paper("c", None)]).await;
        let oracle = Arc::new(ScriptedOracle::default());
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let summary = engine(&f, oracle.clone()).run(UpdateMode::Repair, &cancel).await.unwrap();
        assert_eq!(summary.cancelled, 3);
        assert_eq!(summary.pairs_evaluated, 0);
        assert_eq!(oracle.calls(), 0);
        assert!(summary.was_cancelled());
    }

    #[tokio::test]
    async fn test_repair_error_names_failing_order() {
        let f = fixture(&[paper("a", Some("2020-01-01")), paper("b", Some("2023-01-01"))]).await;
        let oracle = Arc::new(
            ScriptedOracle::default().answer("a", "b", Err(OracleError::Unavailable("502".into()))),
        );
        let summary = engine(&f, oracle)
            .run(UpdateMode::Repair, &CancellationFlag::new())
            .await
            .unwrap();

        assert_eq!(summary.errored, 1);
        // b -> a is asked first and answers none; the failure is on a -> b
        assert_eq!(summary.errors[0].source_id, "a");
        assert_eq!(summary.errors[0].target_id, "b");
    }

    /// Proposes `extends` for every pair and cancels the run on its first call.
    struct CancellingOracle {
        cancel: CancellationFlag,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RelationshipOracle for CancellingOracle {
        async fn propose(&self, _source: &Paper, _target: &Paper) -> Answer {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.cancel.cancel();
            candidate(RelationshipType::Extends, 0.9)
        }
    }

    #[tokio::test]
    async fn test_cancel_mid_run_leaves_consistent_graph() {
        let corpus = [paper("a", None), paper("b", None), paper("c", None), paper("d", None)];
        let f = fixture(&corpus).await;
        let cancel = CancellationFlag::new();
        let oracle = Arc::new(CancellingOracle {
            cancel: cancel.clone(),
            calls: AtomicUsize::new(0),
        });
        let summary = GraphUpdateEngine::new(f.papers.clone(), oracle.clone(), f.store.clone())
            .with_concurrency(1)
            .run(UpdateMode::Repair, &cancel)
            .await
            .unwrap();

        assert!(summary.was_cancelled());
        assert!(summary.cancelled > 0);
        let accounted = summary.stored
            + summary.replaced
            + summary.skipped
            + summary.rejected
            + summary.no_relationship
            + summary.errored
            + summary.cancelled;
        assert_eq!(accounted, 6);
        assert_eq!(summary.pairs_evaluated + summary.cancelled, 6);
        assert_eq!(summary.oracle_calls, oracle.calls.load(Ordering::SeqCst));

        // Only evaluated pairs were written, at most one edge each
        let edges = f.store.list_all().await.unwrap();
        assert_eq!(edges.len(), summary.stored);
        let keys: std::collections::HashSet<_> =
            edges.iter().map(|e| PairKey::new(&e.source_id, &e.target_id)).collect();
        assert_eq!(keys.len(), edges.len());
    }

    #[tokio::test]
    async fn test_summary_serializes() {
        let f = fixture(&[paper("a", None)]).await;
        let summary = engine(&f, Arc::new(ScriptedOracle::default()))
            .run(UpdateMode::Repair, &CancellationFlag::new())
            .await
            .unwrap();
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["mode"], "repair");
        assert_eq!(json["stored"], 0);
        assert!(json.get("paper_id").is_none());
    }
}
