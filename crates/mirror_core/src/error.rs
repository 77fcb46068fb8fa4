//! Error types for the cache core.

use mirror_protocol::{EntityId, Version};
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur in cache operations.
///
/// All variants are `Clone`: the outcome of a coalesced fetch is
/// broadcast to every waiting caller, so a failure must be shareable
/// as-is.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The origin confirmed the entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity type name.
        entity: &'static str,
        /// The id that was not found.
        id: EntityId,
    },

    /// The origin could not be reached or the call failed.
    #[error("origin error: {message}")]
    Origin {
        /// Error message.
        message: String,
        /// Whether a later call can be expected to succeed.
        retryable: bool,
    },

    /// A query named an index that was never declared.
    #[error("unknown index: {name}")]
    UnknownIndex {
        /// The undeclared index name.
        name: String,
    },

    /// A change-set carried a version not newer than the cached one.
    #[error("stale change-set for {id}: cached {current}, incoming {incoming}")]
    StaleChangeSet {
        /// Target entity id.
        id: EntityId,
        /// Version currently cached.
        current: Version,
        /// Version the change-set carried.
        incoming: Version,
    },

    /// Change application produced a value the entity type cannot represent.
    #[error("resolve error: {message}")]
    Resolve {
        /// Description of the failure.
        message: String,
    },
}

impl CacheError {
    /// Creates a not-found error.
    pub fn not_found(entity: &'static str, id: EntityId) -> Self {
        Self::NotFound { entity, id }
    }

    /// Creates a retryable origin error.
    pub fn origin_retryable(message: impl Into<String>) -> Self {
        Self::Origin {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable origin error.
    pub fn origin_fatal(message: impl Into<String>) -> Self {
        Self::Origin {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a resolve error.
    pub fn resolve(message: impl Into<String>) -> Self {
        Self::Resolve {
            message: message.into(),
        }
    }

    /// Returns true if a later attempt can be expected to succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::Origin { retryable: true, .. })
    }

    /// Returns true if this is the stale change-set no-op condition.
    pub fn is_stale(&self) -> bool {
        matches!(self, CacheError::StaleChangeSet { .. })
    }
}
