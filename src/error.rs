//! Error taxonomy.
//!
//! Data-layer errors (`SourceError`, `GatherError`, `NarrativeError`) are
//! absorbed by the routine engine and surface as warnings on the envelope.
//! Only `EngineError` escapes to the caller.

use crate::models::SourceId;
use thiserror::Error;

/// Failure of a single metric source fetch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// Network, authentication or timeout failure.
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// The call was valid but returned zero rows. Not an error condition.
    #[error("source returned no rows")]
    Empty,

    /// The response did not match the expected schema.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SourceError::Malformed(e.to_string())
        } else if e.is_timeout() {
            SourceError::Unavailable("request timed out".to_string())
        } else if e.is_connect() {
            SourceError::Unavailable(format!("cannot connect: {}", e))
        } else {
            SourceError::Unavailable(e.to_string())
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        SourceError::Malformed(e.to_string())
    }
}

/// Aggregation-level failure.
#[derive(Debug, Error)]
pub enum GatherError {
    /// Non-optional fields had no successful source. Carries the best-effort
    /// bundle and warnings so the caller can still build a degraded envelope.
    #[error("insufficient data: missing {}", .missing.join(", "))]
    InsufficientData {
        missing: Vec<String>,
        bundle: crate::models::MetricsBundle,
        warnings: Vec<crate::models::Warning>,
    },
}

/// Failure of the narrative generation service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NarrativeError {
    #[error("narrative service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("narrative service timed out after {0}s")]
    Timeout(u64),
}

/// Configuration-class errors. These are the only errors that escape
/// `RoutineEngine::handle_request`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("unknown routine: {0}")]
    UnknownRoutine(String),

    #[error("invalid routine catalog: {0}")]
    InvalidCatalog(String),

    #[error("invalid scoring configuration: {0}")]
    InvalidScoring(String),

    #[error("source {0} is registered twice")]
    DuplicateSource(SourceId),
}
