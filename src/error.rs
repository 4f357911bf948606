//! Error types for the Invigil engine

use thiserror::Error;

/// Errors that can occur while ingesting telemetry or querying sessions
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("Engine lock poisoned")]
    LockPoisoned,
}
