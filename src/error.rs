//! Error types for chainsight

use thiserror::Error;

use crate::annotate::ParseError;

/// Result type alias using chainsight Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in chainsight operations
#[derive(Error, Debug)]
pub enum Error {
    /// A required credential or setting is missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network failure, timeout or non-2xx status from an upstream service
    #[error("Transport error: {0}")]
    Transport(String),

    /// The block explorer answered with a non-success status
    #[error("Upstream API error: {0}")]
    Upstream(String),

    /// LLM reply could not be read as a single JSON object
    #[error("Malformed response: {0}")]
    MalformedResponse(#[from] ParseError),

    /// Failure confined to one transaction during ingestion
    #[error("Transaction {hash}: {message}")]
    Item { hash: String, message: String },

    /// Unexpected failure inside an analysis stage
    #[error("Stage {stage} failed: {message}")]
    Stage { stage: String, message: String },

    /// Workflow definition errors (unknown dependency, cycle)
    #[error("Workflow error: {0}")]
    Workflow(String),

    /// Unix time that RFC 3339 cannot represent
    #[error("Timestamp {0} is outside the RFC 3339 range")]
    Timestamp(i64),

    /// Wei / ether conversion errors
    #[error("Amount error: {0}")]
    Amount(String),

    /// SQLite errors
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Store errors not originating in SQLite (lock poisoning)
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Transport(format!("request timed out: {e}"))
        } else {
            Error::Transport(e.to_string())
        }
    }
}

impl Error {
    /// Whether an annotation call that failed this way should degrade to a
    /// default result instead of surfacing to the caller.
    pub fn is_contained(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::MalformedResponse(_))
    }
}
