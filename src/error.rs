//! Error types for the pipeline engine.
//!
//! Every failure a stage can hit is classified as transient (worth a retry)
//! or permanent (fail the item immediately). Stage handlers never raise past
//! the dispatcher; the worker loop maps errors onto work item status.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Store read/write failure. Callers must treat this as "unknown",
    /// never as "known" or "absent".
    #[error("store error: {0}")]
    Store(String),

    /// HTTP failure. `status` is None for connection-level errors.
    #[error("http error{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Http {
        status: Option<u16>,
        message: String,
    },

    /// AI provider failure (connection, API error, or disabled).
    #[error("ai provider error: {0}")]
    Ai(String),

    /// Input that cannot be parsed and will not parse better on retry.
    #[error("parse error: {0}")]
    Parse(String),

    /// Stage exceeded its time budget.
    #[error("stage timed out after {0}s")]
    Timeout(u64),

    /// A persisted item violates a lineage invariant. Never repaired,
    /// always failed with a diagnostic.
    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("config error: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether this error should count against the retry budget rather
    /// than failing the item outright.
    ///
    /// Transient: network errors, 5xx, 429, timeouts, store errors.
    /// Permanent: other 4xx, parse failures, invariant violations.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Store(_) => true,
            EngineError::Timeout(_) => true,
            EngineError::Ai(_) => true,
            EngineError::Http { status, .. } => match status {
                None => true,
                Some(429) => true,
                Some(s) => *s >= 500,
            },
            EngineError::Parse(_) => false,
            EngineError::Invariant(_) => false,
            EngineError::Config(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(EngineError::Store("locked".into()).is_transient());
        assert!(EngineError::Timeout(300).is_transient());
        assert!(EngineError::Http {
            status: None,
            message: "connection refused".into()
        }
        .is_transient());
        assert!(EngineError::Http {
            status: Some(429),
            message: "rate limited".into()
        }
        .is_transient());
        assert!(EngineError::Http {
            status: Some(503),
            message: "unavailable".into()
        }
        .is_transient());
    }

    #[test]
    fn test_permanent_classification() {
        assert!(!EngineError::Http {
            status: Some(404),
            message: "not found".into()
        }
        .is_transient());
        assert!(!EngineError::Http {
            status: Some(403),
            message: "forbidden".into()
        }
        .is_transient());
        assert!(!EngineError::Parse("bad json".into()).is_transient());
        assert!(!EngineError::Invariant("depth mismatch".into()).is_transient());
    }
}
