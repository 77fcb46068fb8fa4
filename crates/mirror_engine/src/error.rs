//! Error types for the engine.

use mirror_core::CacheError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in manager and router operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Cache or origin error.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// A message reached a manager for a different entity type.
    #[error("kind mismatch: manager handles {expected:?}, message carries {actual:?}")]
    KindMismatch {
        /// Entity-type tag the manager handles.
        expected: String,
        /// Entity-type tag the message carried.
        actual: String,
    },

    /// Resolved entities could not be serialized for the router result.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl EngineError {
    /// Returns true if this is the not-found condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::Cache(CacheError::NotFound { .. }))
    }

    /// Returns true if a later attempt can be expected to succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Cache(cache) if cache.is_retryable())
    }
}
