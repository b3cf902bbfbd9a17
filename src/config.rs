use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::confidence::{AggregatorOptions, ConfidenceAggregator, ConfidenceWeights};
use crate::engine::{ConfidenceThresholds, DEFAULT_CONCURRENCY};
use crate::graph::{OverwritePolicy, RelationshipType};
use crate::oracle::RetryPolicy;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub papergraph: PapergraphConfig,
    pub oracle: OracleConfig,
    #[serde(default)]
    pub thresholds: ConfidenceThresholds,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub confidence: ConfidenceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PapergraphConfig {
    pub db_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Relationship oracle (chat-completions endpoint) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// 0 disables rate limiting
    #[serde(default = "default_max_calls_per_minute")]
    pub max_calls_per_minute: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

/// Graph update run configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub allow_overwrite: bool,
    #[serde(default)]
    pub reject_missing_dates: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            allow_overwrite: false,
            reject_missing_dates: false,
        }
    }
}

/// Answer confidence scoring configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ConfidenceConfig {
    #[serde(default = "default_evidence_strength_weight")]
    pub evidence_strength_weight: f64,
    #[serde(default = "default_consistency_weight")]
    pub consistency_weight: f64,
    #[serde(default = "default_coverage_weight")]
    pub coverage_weight: f64,
    #[serde(default = "default_source_quality_weight")]
    pub source_quality_weight: f64,
    #[serde(default = "default_target_count")]
    pub target_count: usize,
    #[serde(default = "default_contradiction_penalty")]
    pub contradiction_penalty: f64,
    #[serde(default = "default_low_confidence_threshold")]
    pub low_confidence_threshold: f64,
    #[serde(default = "default_consistency_warning_threshold")]
    pub consistency_warning_threshold: f64,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            evidence_strength_weight: default_evidence_strength_weight(),
            consistency_weight: default_consistency_weight(),
            coverage_weight: default_coverage_weight(),
            source_quality_weight: default_source_quality_weight(),
            target_count: default_target_count(),
            contradiction_penalty: default_contradiction_penalty(),
            low_confidence_threshold: default_low_confidence_threshold(),
            consistency_warning_threshold: default_consistency_warning_threshold(),
        }
    }
}

impl ConfidenceConfig {
    pub fn weights(&self) -> ConfidenceWeights {
        ConfidenceWeights {
            evidence_strength: self.evidence_strength_weight,
            consistency: self.consistency_weight,
            coverage: self.coverage_weight,
            source_quality: self.source_quality_weight,
        }
    }

    pub fn options(&self) -> AggregatorOptions {
        AggregatorOptions {
            target_count: self.target_count,
            contradiction_penalty: self.contradiction_penalty,
            low_confidence_threshold: self.low_confidence_threshold,
            consistency_warning_threshold: self.consistency_warning_threshold,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

const MAX_RETRIES: usize = 10;
const MAX_INITIAL_BACKOFF_MS: u64 = 60_000;
const MAX_CALLS_PER_MINUTE: usize = 100_000;

fn default_max_retries() -> usize {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_max_calls_per_minute() -> usize {
    50
}

fn default_temperature() -> f32 {
    0.7
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_evidence_strength_weight() -> f64 {
    0.4
}

fn default_consistency_weight() -> f64 {
    0.3
}

fn default_coverage_weight() -> f64 {
    0.2
}

fn default_source_quality_weight() -> f64 {
    0.1
}

fn default_target_count() -> usize {
    5
}

fn default_contradiction_penalty() -> f64 {
    0.3
}

fn default_low_confidence_threshold() -> f64 {
    0.5
}

fn default_consistency_warning_threshold() -> f64 {
    0.4
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in PAPERGRAPH_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("PAPERGRAPH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml(&config_str)?;
        log::debug!("Loaded configuration from {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).context("Failed to parse config.toml")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.papergraph.db_path.as_os_str().is_empty() {
            anyhow::bail!("papergraph.db_path must not be empty");
        }

        if self.oracle.endpoint.trim().is_empty() {
            anyhow::bail!("oracle.endpoint must not be empty");
        }

        if self.oracle.timeout_secs == 0 {
            anyhow::bail!("oracle.timeout_secs must be greater than 0");
        }

        if self.oracle.max_retries > MAX_RETRIES {
            anyhow::bail!("oracle.max_retries must be at most {}", MAX_RETRIES);
        }

        if self.oracle.initial_backoff_ms > MAX_INITIAL_BACKOFF_MS {
            anyhow::bail!(
                "oracle.initial_backoff_ms must be at most {}",
                MAX_INITIAL_BACKOFF_MS
            );
        }

        if self.oracle.max_calls_per_minute > MAX_CALLS_PER_MINUTE {
            anyhow::bail!(
                "oracle.max_calls_per_minute must be at most {} (0 disables limiting)",
                MAX_CALLS_PER_MINUTE
            );
        }

        if !(0.0..=2.0).contains(&self.oracle.temperature) {
            anyhow::bail!("oracle.temperature must be between 0.0 and 2.0");
        }

        for relationship_type in RelationshipType::ALL {
            let minimum = self.thresholds.minimum(relationship_type);
            if !(0.0..=1.0).contains(&minimum) {
                anyhow::bail!(
                    "thresholds.{} must be between 0.0 and 1.0",
                    relationship_type
                );
            }
        }

        if self.engine.concurrency == 0 {
            anyhow::bail!("engine.concurrency must be greater than 0");
        }

        // Weight sum and ranges are checked by the aggregator itself
        self.confidence_aggregator()?;

        Ok(())
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.papergraph.db_path
    }

    /// Read the oracle API key from the configured environment variable
    pub fn oracle_api_key(&self) -> Result<String> {
        std::env::var(&self.oracle.api_key_env).with_context(|| {
            format!(
                "Environment variable {} not set. Set it in your .env file or as an environment variable with your oracle API key.",
                self.oracle.api_key_env
            )
        })
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.oracle.max_retries,
            initial_backoff: Duration::from_millis(self.oracle.initial_backoff_ms),
            timeout: self.oracle_timeout(),
        }
    }

    pub fn overwrite_policy(&self) -> OverwritePolicy {
        if self.engine.allow_overwrite {
            OverwritePolicy::ReplaceOnHigherConfidence
        } else {
            OverwritePolicy::Skip
        }
    }

    pub fn confidence_aggregator(&self) -> Result<ConfidenceAggregator> {
        ConfidenceAggregator::new(self.confidence.weights(), self.confidence.options())
            .context("Invalid [confidence] configuration")
    }
}
