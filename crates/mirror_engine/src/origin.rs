//! The origin retrieval contract.

use mirror_core::{CacheError, CacheResult, MirrorEntity};
use mirror_protocol::EntityId;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Retrieval of entities from the authoritative origin.
///
/// One implementation per entity type, typically an RPC call into the
/// CRUD server. Timeout semantics belong to the transport; the engine
/// treats any failure as a normal per-item error outcome.
pub trait EntityOrigin<T: MirrorEntity>: Send + Sync + 'static {
    /// Retrieves one entity by id.
    ///
    /// Fails with [`CacheError::NotFound`] when the origin reports no
    /// such entity, or [`CacheError::Origin`] when the call fails.
    fn fetch(&self, id: &EntityId) -> impl Future<Output = CacheResult<T>> + Send;

    /// Retrieves all entities of this type for a full reload.
    fn fetch_all(&self) -> impl Future<Output = CacheResult<Vec<T>>> + Send;
}

/// An in-memory origin for testing.
///
/// Entities, per-id failure injection, bulk failure, artificial
/// latency, and call counters are all settable after construction.
#[derive(Debug)]
pub struct MockOrigin<T> {
    entities: Mutex<HashMap<EntityId, T>>,
    failing: Mutex<HashSet<EntityId>>,
    fail_all: AtomicBool,
    latency: Mutex<Option<Duration>>,
    fetch_calls: AtomicUsize,
    fetch_all_calls: AtomicUsize,
}

impl<T: MirrorEntity> MockOrigin<T> {
    /// Creates an empty mock origin.
    pub fn new() -> Self {
        Self {
            entities: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            fail_all: AtomicBool::new(false),
            latency: Mutex::new(None),
            fetch_calls: AtomicUsize::new(0),
            fetch_all_calls: AtomicUsize::new(0),
        }
    }

    /// Adds or replaces an entity.
    pub fn insert(&self, entity: T) {
        self.entities.lock().insert(entity.id().clone(), entity);
    }

    /// Adds or replaces several entities.
    pub fn insert_all(&self, entities: impl IntoIterator<Item = T>) {
        let mut map = self.entities.lock();
        for entity in entities {
            map.insert(entity.id().clone(), entity);
        }
    }

    /// Makes `fetch` fail for the given id.
    pub fn fail_fetch_for(&self, id: impl Into<EntityId>) {
        self.failing.lock().insert(id.into());
    }

    /// Makes `fetch_all` fail.
    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Adds artificial latency to every call.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Returns the number of `fetch` calls so far.
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Returns the number of `fetch_all` calls so far.
    pub fn fetch_all_calls(&self) -> usize {
        self.fetch_all_calls.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl<T: MirrorEntity> Default for MockOrigin<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: MirrorEntity> EntityOrigin<T> for MockOrigin<T> {
    async fn fetch(&self, id: &EntityId) -> CacheResult<T> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if self.failing.lock().contains(id) {
            return Err(CacheError::origin_retryable(format!(
                "injected failure for {id}"
            )));
        }
        self.entities
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| CacheError::not_found(T::ENTITY_NAME, id.clone()))
    }

    async fn fetch_all(&self) -> CacheResult<Vec<T>> {
        self.fetch_all_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(CacheError::origin_retryable("injected bulk failure"));
        }
        Ok(self.entities.lock().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_protocol::Version;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        id: EntityId,
        version: Version,
    }

    impl MirrorEntity for Item {
        const ENTITY_NAME: &'static str = "item";

        fn id(&self) -> &EntityId {
            &self.id
        }

        fn version(&self) -> Version {
            self.version
        }
    }

    fn item(id: &str) -> Item {
        Item {
            id: EntityId::from(id),
            version: Version::new(1),
        }
    }

    #[tokio::test]
    async fn fetch_and_counters() {
        let origin = MockOrigin::new();
        origin.insert(item("a"));

        let fetched = origin.fetch(&EntityId::from("a")).await.unwrap();
        assert_eq!(fetched.id.as_str(), "a");
        assert_eq!(origin.fetch_calls(), 1);

        let err = origin.fetch(&EntityId::from("missing")).await.unwrap_err();
        assert!(matches!(err, CacheError::NotFound { .. }));
        assert_eq!(origin.fetch_calls(), 2);
    }

    #[tokio::test]
    async fn failure_injection() {
        let origin = MockOrigin::new();
        origin.insert(item("a"));
        origin.fail_fetch_for("a");

        let err = origin.fetch(&EntityId::from("a")).await.unwrap_err();
        assert!(err.is_retryable());

        origin.set_fail_all(true);
        assert!(origin.fetch_all().await.is_err());
        origin.set_fail_all(false);
        assert_eq!(origin.fetch_all().await.unwrap().len(), 1);
    }
}
