//! Manager configuration.

/// Configuration for one [`EntityManager`].
///
/// [`EntityManager`]: crate::EntityManager
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Entity-type tag this manager handles in real-time messages
    /// (e.g. `"streams"`).
    pub kind: String,
    /// When true, a cache miss during resolution always fetches the
    /// full entity from the origin, even when the message carried a
    /// usable snapshot. Useful for entity types whose notifications
    /// are partial projections of the origin record.
    pub force_fetch_to_resolve_on_cache_miss: bool,
}

impl ManagerConfig {
    /// Creates a configuration for the given entity-type tag.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            force_fetch_to_resolve_on_cache_miss: false,
        }
    }

    /// Forces origin fetches for cache misses during resolution.
    #[must_use]
    pub fn force_fetch_on_miss(mut self) -> Self {
        self.force_fetch_to_resolve_on_cache_miss = true;
        self
    }
}
