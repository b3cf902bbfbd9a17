pub mod config;
pub mod error;
pub mod db;
pub mod papers;
pub mod graph;
pub mod oracle;
pub mod engine;
pub mod confidence;

pub use config::Config;
pub use error::{PapergraphError, Result};
pub use graph::{PairKey, Relationship, RelationshipStore, RelationshipType, TemporalValidator};
pub use engine::{CancellationFlag, GraphUpdateEngine, UpdateMode, UpdateSummary};
pub use confidence::{ConfidenceAggregator, ConfidenceScore, EvidenceItem};
