//! Error types for Tolk.

use thiserror::Error;

/// Library-level error type for Tolk operations.
#[derive(Error, Debug)]
pub enum TolkError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Job {0} not found")]
    JobNotFound(uuid::Uuid),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Job invocation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Result type alias for Tolk operations.
pub type Result<T> = std::result::Result<T, TolkError>;

/// Failure raised by an external collaborator while executing a stage.
///
/// Each collaborator tags its failures with the variant that describes what
/// actually went wrong; the retry policy is derived from the variant alone,
/// never from message contents.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("Network failure: {0}")]
    Network(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource access denied: {0}")]
    AccessDenied(String),

    #[error("Invalid input format: {0}")]
    InvalidInput(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("External tool not found: {0}. Please install it and ensure it's in your PATH.")]
    ToolNotFound(String),

    #[error("External tool failed: {0}")]
    ToolFailed(String),

    #[error("Transcription service error: {0}")]
    Transcription(String),

    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Segment integrity violation: {0}")]
    Integrity(String),

    #[error("Stage cancelled")]
    Cancelled,
}

impl StageError {
    /// Short machine-readable name of the variant, recorded in failure
    /// context and dead-letter snapshots.
    pub fn kind(&self) -> &'static str {
        match self {
            StageError::Network(_) => "network",
            StageError::Timeout(_) => "timeout",
            StageError::NotFound(_) => "not_found",
            StageError::AccessDenied(_) => "access_denied",
            StageError::InvalidInput(_) => "invalid_input",
            StageError::ResourceExhausted(_) => "resource_exhausted",
            StageError::ToolNotFound(_) => "tool_not_found",
            StageError::ToolFailed(_) => "tool_failed",
            StageError::Transcription(_) => "transcription",
            StageError::Storage(_) => "storage",
            StageError::Integrity(_) => "integrity",
            StageError::Cancelled => "cancelled",
        }
    }

    /// Check whether this failure is a cancellation, which must propagate
    /// instead of being classified.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StageError::Cancelled)
    }
}
