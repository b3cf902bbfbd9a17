use thiserror::Error;

use crate::oracle::OracleError;

/// Main error type for Papergraph
#[derive(Error, Debug)]
pub enum PapergraphError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Relationship oracle errors
    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    /// Paper not found in the repository
    #[error("Paper not found: {0}")]
    PaperNotFound(String),

    /// JSON (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Blocking task failed to complete
    #[error("Task error: {0}")]
    Task(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Convenient Result type using PapergraphError
pub type Result<T> = std::result::Result<T, PapergraphError>;
