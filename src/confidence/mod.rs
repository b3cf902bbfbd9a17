//! Answer confidence from retrieved evidence.
//!
//! Four sub-scores, each in `[0, 1]`, are combined with configurable weights:
//! evidence strength (mean relevance), consistency (penalised per contradicting
//! pair of retrieved papers), coverage (distinct papers against a target) and
//! source quality (mean authority). Scoring is pure and never fails.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{PapergraphError, Result};
use crate::graph::{PairKey, Relationship, RelationshipType};

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

fn default_authority() -> f64 {
    1.0
}

/// A retrieved paper used as evidence for an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub paper_id: String,
    pub relevance_score: f64,
    /// Placeholder weight until venue/citation signals exist.
    #[serde(default = "default_authority")]
    pub source_authority: f64,
}

impl EvidenceItem {
    pub fn new(paper_id: impl Into<String>, relevance_score: f64) -> Self {
        Self {
            paper_id: paper_id.into(),
            relevance_score,
            source_authority: default_authority(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceWeights {
    pub evidence_strength: f64,
    pub consistency: f64,
    pub coverage: f64,
    pub source_quality: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            evidence_strength: 0.4,
            consistency: 0.3,
            coverage: 0.2,
            source_quality: 0.1,
        }
    }
}

impl ConfidenceWeights {
    /// Each weight must lie in `[0, 1]` and together they must sum to 1.
    pub fn validate(&self) -> Result<()> {
        let named = [
            ("evidence_strength", self.evidence_strength),
            ("consistency", self.consistency),
            ("coverage", self.coverage),
            ("source_quality", self.source_quality),
        ];
        for (name, weight) in named {
            if !weight.is_finite() || !(0.0..=1.0).contains(&weight) {
                return Err(PapergraphError::Config(format!(
                    "confidence weight {} = {} must be between 0.0 and 1.0",
                    name, weight
                )));
            }
        }

        let sum: f64 = named.iter().map(|(_, w)| w).sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(PapergraphError::Config(format!(
                "confidence weights must sum to 1.0, got {}",
                sum
            )));
        }
        Ok(())
    }
}

/// Tunables other than the weights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregatorOptions {
    /// Distinct papers needed for full coverage.
    pub target_count: usize,
    /// Consistency lost per contradicting pair.
    pub contradiction_penalty: f64,
    pub low_confidence_threshold: f64,
    pub consistency_warning_threshold: f64,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            target_count: 5,
            contradiction_penalty: 0.3,
            low_confidence_threshold: 0.5,
            consistency_warning_threshold: 0.4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfidenceBreakdown {
    pub evidence_strength: f64,
    pub consistency: f64,
    pub coverage: f64,
    pub source_quality: f64,
}

impl ConfidenceBreakdown {
    fn factors(&self) -> [(&'static str, f64); 4] {
        [
            ("evidence strength", self.evidence_strength),
            ("consistency", self.consistency),
            ("coverage", self.coverage),
            ("source quality", self.source_quality),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfidenceScore {
    pub score: f64,
    pub breakdown: ConfidenceBreakdown,
    pub reasoning: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceAggregator {
    weights: ConfidenceWeights,
    options: AggregatorOptions,
}

impl Default for ConfidenceAggregator {
    fn default() -> Self {
        Self {
            weights: ConfidenceWeights::default(),
            options: AggregatorOptions::default(),
        }
    }
}

fn unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

impl ConfidenceAggregator {
    pub fn new(weights: ConfidenceWeights, options: AggregatorOptions) -> Result<Self> {
        weights.validate()?;
        if options.target_count == 0 {
            return Err(PapergraphError::Config(
                "confidence.target_count must be greater than 0".to_string(),
            ));
        }
        let fractions = [
            ("contradiction_penalty", options.contradiction_penalty),
            ("low_confidence_threshold", options.low_confidence_threshold),
            ("consistency_warning_threshold", options.consistency_warning_threshold),
        ];
        for (name, value) in fractions {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(PapergraphError::Config(format!(
                    "confidence.{} must be between 0.0 and 1.0",
                    name
                )));
            }
        }
        Ok(Self { weights, options })
    }

    pub fn weights(&self) -> &ConfidenceWeights {
        &self.weights
    }

    /// Score the evidence behind an answer.
    ///
    /// `edges` are graph relationships touching the retrieved papers; only
    /// `contradicts` edges with both ends among the evidence count.
    pub fn score(&self, evidence: &[EvidenceItem], edges: &[Relationship]) -> ConfidenceScore {
        if evidence.is_empty() {
            return ConfidenceScore {
                score: 0.0,
                breakdown: ConfidenceBreakdown {
                    evidence_strength: 0.0,
                    consistency: 0.0,
                    coverage: 0.0,
                    source_quality: 0.0,
                },
                reasoning: "Low confidence (0.00): no evidence was retrieved.".to_string(),
                warning: Some("No evidence was retrieved; the answer is not grounded in any paper.".to_string()),
            };
        }

        let papers: HashSet<&str> = evidence.iter().map(|e| e.paper_id.as_str()).collect();

        let contradictions: BTreeSet<PairKey> = edges
            .iter()
            .filter(|e| e.relationship_type == RelationshipType::Contradicts)
            .filter(|e| e.source_id != e.target_id)
            .filter(|e| papers.contains(e.source_id.as_str()) && papers.contains(e.target_id.as_str()))
            .map(Relationship::pair_key)
            .collect();

        let penalty = self.options.contradiction_penalty * contradictions.len() as f64;
        let breakdown = ConfidenceBreakdown {
            evidence_strength: mean(evidence.iter().map(|e| unit(e.relevance_score))),
            consistency: 1.0 - penalty.min(1.0),
            coverage: (papers.len() as f64 / self.options.target_count as f64).min(1.0),
            source_quality: mean(evidence.iter().map(|e| unit(e.source_authority))),
        };

        let w = &self.weights;
        let score = unit(
            w.evidence_strength * breakdown.evidence_strength
                + w.consistency * breakdown.consistency
                + w.coverage * breakdown.coverage
                + w.source_quality * breakdown.source_quality,
        );

        let reasoning = self.reasoning(score, &breakdown, contradictions.len());
        let warning = self.warning(score, &breakdown, &contradictions);

        ConfidenceScore {
            score,
            breakdown,
            reasoning,
            warning,
        }
    }

    fn reasoning(&self, score: f64, breakdown: &ConfidenceBreakdown, contradiction_count: usize) -> String {
        let level = if score >= 0.8 {
            "High"
        } else if score >= self.options.low_confidence_threshold {
            "Moderate"
        } else {
            "Low"
        };

        let factors = breakdown.factors();
        // Ties resolve to the first listed factor, which carries the most weight.
        let strongest = factors
            .iter()
            .fold(factors[0], |best, f| if f.1 > best.1 { *f } else { best });
        let weakest = factors
            .iter()
            .fold(factors[0], |worst, f| if f.1 < worst.1 { *f } else { worst });

        let mut text = format!(
            "{} confidence ({:.2}): strongest factor is {} ({:.2}), weakest is {} ({:.2}).",
            level, score, strongest.0, strongest.1, weakest.0, weakest.1
        );
        if contradiction_count > 0 {
            text.push_str(&format!(
                " {} contradicting pair(s) among the retrieved papers.",
                contradiction_count
            ));
        }
        text
    }

    fn warning(
        &self,
        score: f64,
        breakdown: &ConfidenceBreakdown,
        contradictions: &BTreeSet<PairKey>,
    ) -> Option<String> {
        let mut parts = Vec::new();

        if breakdown.consistency < self.options.consistency_warning_threshold {
            let pairs: Vec<String> = contradictions
                .iter()
                .map(|k| {
                    let (a, b) = k.ids();
                    format!("{} vs {}", a, b)
                })
                .collect();
            parts.push(format!(
                "Retrieved papers contradict each other ({}).",
                pairs.join(", ")
            ));
        }
        if score < self.options.low_confidence_threshold {
            parts.push(format!(
                "Low confidence ({:.2}); verify the answer against the cited papers.",
                score
            ));
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}
