//! Error types for the Casework engine.
//!
//! Every engine operation returns [`EngineResult`]. The variants follow the
//! failure taxonomy of the engine: a lost optimistic lock is expected under
//! contention and is usually handled by the caller, everything else aborts
//! the current unit of work.

use thiserror::Error;

/// Engine-level errors.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Entity or registration not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Operation does not apply to the entity's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A version-checked write lost against a concurrent writer
    #[error("Optimistic lock failure: {0}")]
    OptimisticLock(String),

    /// Engine or pipeline misconfiguration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A job handler reported failure
    #[error("Job handler error: {0}")]
    JobHandler(String),

    /// A service task delegate reported failure
    #[error("Delegate error: {0}")]
    Delegate(String),

    /// Persistence backend error
    #[error("Store error: {0}")]
    Store(String),

    /// Message channel error
    #[error("Message channel error: {0}")]
    Channel(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether this error means another writer got there first.
    pub fn is_optimistic_lock(&self) -> bool {
        matches!(self, EngineError::OptimisticLock(_))
    }
}

/// Result type alias using EngineError.
pub type EngineResult<T> = Result<T, EngineError>;

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}

impl From<envy::Error> for EngineError {
    fn from(err: envy::Error) -> Self {
        EngineError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let err = EngineError::NotFound("process definition 'order'".to_string());
        assert_eq!(
            err.to_string(),
            "Resource not found: process definition 'order'"
        );
    }

    #[test]
    fn test_optimistic_lock_detection() {
        assert!(EngineError::OptimisticLock("job 1".to_string()).is_optimistic_lock());
        assert!(!EngineError::Store("timeout".to_string()).is_optimistic_lock());
    }

    #[test]
    fn test_anyhow_conversion() {
        let err: EngineError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, EngineError::Internal(msg) if msg == "boom"));
    }
}
