//! The indexed entity cache.

use crate::entity::MirrorEntity;
use crate::error::{CacheError, CacheResult};
use crate::index::{HashIndex, IndexKey, IndexSpec};
use mirror_protocol::EntityId;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

type FetchOutcome<T> = Result<Arc<T>, CacheError>;

/// In-memory store for entities of one type, keyed by id, with
/// declared secondary indexes and fetch-on-miss mediation.
///
/// The primary id-map and every index bucket are updated under a
/// single lock, so no reader ever observes an entry in one but not the
/// other. Entities are handed out as `Arc<T>` — callers never receive
/// a mutable handle into internal storage.
///
/// Concurrent misses for the same id coalesce: at most one underlying
/// fetch is in flight per id, and every waiting caller observes the
/// same entity or the same error. Nothing is stored on failure, and
/// the pending slot is cleared either way so the next call starts a
/// fresh fetch.
pub struct IndexedCache<T: MirrorEntity> {
    state: RwLock<CacheState<T>>,
    /// Pending fetch per id. Lock order: `pending` before `state`.
    pending: Mutex<HashMap<EntityId, broadcast::Sender<FetchOutcome<T>>>>,
}

struct CacheState<T: MirrorEntity> {
    entries: HashMap<EntityId, Arc<T>>,
    indexes: Vec<HashIndex<T>>,
}

impl<T: MirrorEntity> IndexedCache<T> {
    /// Creates an empty cache with the given index declarations.
    pub fn new(specs: Vec<IndexSpec<T>>) -> Self {
        Self {
            state: RwLock::new(CacheState {
                entries: HashMap::new(),
                indexes: specs.into_iter().map(HashIndex::new).collect(),
            }),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached copy for an id without ever fetching.
    pub fn get_cached(&self, id: &EntityId) -> Option<Arc<T>> {
        self.state.read().entries.get(id).cloned()
    }

    /// Returns the cached copy, or runs `fetch`, stores the result and
    /// returns it.
    ///
    /// Concurrent calls for the same missing id result in at most one
    /// invocation of `fetch`; all callers resolve to the same outcome.
    pub async fn get_or_fetch<F, Fut>(&self, id: &EntityId, fetch: F) -> CacheResult<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        if let Some(hit) = self.get_cached(id) {
            return Ok(hit);
        }

        let mut waiter = {
            let mut pending = self.pending.lock();
            // The leading fetch may have landed between the miss above
            // and taking the pending lock.
            if let Some(hit) = self.get_cached(id) {
                return Ok(hit);
            }
            match pending.get(id) {
                Some(tx) => Some(tx.subscribe()),
                None => {
                    let (tx, _) = broadcast::channel(1);
                    pending.insert(id.clone(), tx);
                    None
                }
            }
        };

        if let Some(rx) = waiter.as_mut() {
            return match rx.recv().await {
                Ok(outcome) => outcome,
                // The leading fetch was dropped before completing.
                Err(_) => Err(CacheError::origin_retryable(format!(
                    "fetch for {} was cancelled",
                    id
                ))),
            };
        }

        let guard = PendingFetch {
            cache: self,
            id: id.clone(),
            completed: false,
        };
        let outcome = match fetch().await {
            Ok(entity) => Ok(self.set(entity, None)),
            Err(e) => {
                debug!(entity = %T::ENTITY_NAME, id = %id, error = %e, "fetch failed");
                Err(e)
            }
        };
        guard.complete(outcome.clone());
        outcome
    }

    /// Inserts or replaces an entry, updating index memberships.
    ///
    /// Index membership is a function of field values, so the buckets
    /// keyed by the previous copy must be vacated before filing the new
    /// one. When `previous` is not supplied, the currently stored entry
    /// for the id serves as the previous copy.
    pub fn set(&self, entity: T, previous: Option<&T>) -> Arc<T> {
        let mut state = self.state.write();
        let state = &mut *state;
        let id = entity.id().clone();

        match previous {
            Some(prev) => {
                for index in &mut state.indexes {
                    index.remove(prev);
                }
            }
            None => {
                if let Some(prev) = state.entries.get(&id).cloned() {
                    for index in &mut state.indexes {
                        index.remove(prev.as_ref());
                    }
                }
            }
        }

        let entry = Arc::new(entity);
        for index in &mut state.indexes {
            index.insert(entry.as_ref());
        }
        state.entries.insert(id, Arc::clone(&entry));
        entry
    }

    /// Atomically replaces the entire content and rebuilds all indexes.
    pub fn reset(&self, entities: Vec<T>) {
        let mut state = self.state.write();
        let state = &mut *state;
        state.entries.clear();
        for index in &mut state.indexes {
            index.clear();
        }
        for entity in entities {
            // Duplicate ids in the input: last one wins.
            if let Some(prev) = state.entries.get(entity.id()).cloned() {
                for index in &mut state.indexes {
                    index.remove(prev.as_ref());
                }
            }
            let entry = Arc::new(entity);
            for index in &mut state.indexes {
                index.insert(entry.as_ref());
            }
            state.entries.insert(entry.id().clone(), entry);
        }
    }

    /// Removes all entries and index memberships.
    pub fn invalidate(&self) {
        let mut state = self.state.write();
        state.entries.clear();
        for index in &mut state.indexes {
            index.clear();
        }
    }

    /// Returns all cached entities filed under a key in the named index.
    ///
    /// Index queries are cache-only and never trigger a fetch; callers
    /// needing completeness must load the cache first.
    pub fn match_index(&self, name: &str, key: &IndexKey) -> CacheResult<Vec<Arc<T>>> {
        let state = self.state.read();
        let index = state
            .indexes
            .iter()
            .find(|index| index.spec().name() == name)
            .ok_or_else(|| CacheError::UnknownIndex {
                name: name.to_owned(),
            })?;
        Ok(index
            .lookup(key)
            .into_iter()
            .filter_map(|id| state.entries.get(&id).cloned())
            .collect())
    }

    /// Returns all cached entities, in no particular order.
    pub fn entries(&self) -> Vec<Arc<T>> {
        self.state.read().entries.values().cloned().collect()
    }

    /// Returns the number of cached entities.
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Returns true if the cache holds no entities.
    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }
}

/// Clears the pending slot for a leading fetch.
///
/// Dropping the guard without completing (the fetch future was
/// cancelled) removes the slot so waiters fail fast and the next
/// caller starts fresh, instead of waiting on a sender that will never
/// send.
struct PendingFetch<'a, T: MirrorEntity> {
    cache: &'a IndexedCache<T>,
    id: EntityId,
    completed: bool,
}

impl<T: MirrorEntity> PendingFetch<'_, T> {
    fn complete(mut self, outcome: FetchOutcome<T>) {
        if let Some(tx) = self.cache.pending.lock().remove(&self.id) {
            let _ = tx.send(outcome);
        }
        self.completed = true;
    }
}

impl<T: MirrorEntity> Drop for PendingFetch<'_, T> {
    fn drop(&mut self) {
        if !self.completed {
            self.cache.pending.lock().remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_protocol::Version;
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::task::JoinSet;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Record {
        id: EntityId,
        version: Version,
        stream_id: String,
    }

    impl MirrorEntity for Record {
        const ENTITY_NAME: &'static str = "record";

        fn id(&self) -> &EntityId {
            &self.id
        }

        fn version(&self) -> Version {
            self.version
        }
    }

    fn record(id: &str, stream_id: &str) -> Record {
        Record {
            id: EntityId::from(id),
            version: Version::new(1),
            stream_id: stream_id.to_owned(),
        }
    }

    fn indexed() -> IndexedCache<Record> {
        IndexedCache::new(vec![IndexSpec::new("by_stream", |r: &Record| {
            Some(IndexKey::single(r.stream_id.as_str()))
        })])
    }

    #[test]
    fn get_cached_miss_and_hit() {
        let cache = indexed();
        let id = EntityId::from("a");
        assert!(cache.get_cached(&id).is_none());

        cache.set(record("a", "s1"), None);
        assert_eq!(cache.get_cached(&id).unwrap().stream_id, "s1");
    }

    #[test]
    fn set_updates_index_membership() {
        let cache = indexed();
        let old = record("a", "s1");
        cache.set(old.clone(), None);

        let mut moved = old.clone();
        moved.stream_id = "s2".to_owned();
        cache.set(moved, Some(&old));

        assert!(cache
            .match_index("by_stream", &IndexKey::single("s1"))
            .unwrap()
            .is_empty());
        let hits = cache
            .match_index("by_stream", &IndexKey::single("s2"))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id.as_str(), "a");
    }

    #[test]
    fn set_without_previous_uses_stored_entry() {
        let cache = indexed();
        cache.set(record("a", "s1"), None);

        let mut moved = record("a", "s2");
        moved.version = Version::new(2);
        cache.set(moved, None);

        assert!(cache
            .match_index("by_stream", &IndexKey::single("s1"))
            .unwrap()
            .is_empty());
        assert_eq!(
            cache
                .match_index("by_stream", &IndexKey::single("s2"))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn reset_is_idempotent() {
        let cache = indexed();
        cache.set(record("old", "s0"), None);

        let entities = vec![record("a", "s1"), record("b", "s1"), record("c", "s2")];
        cache.reset(entities.clone());
        let first: Vec<_> = cache
            .match_index("by_stream", &IndexKey::single("s1"))
            .unwrap()
            .iter()
            .map(|r| r.id.clone())
            .collect();

        cache.reset(entities);
        let second: Vec<_> = cache
            .match_index("by_stream", &IndexKey::single("s1"))
            .unwrap()
            .iter()
            .map(|r| r.id.clone())
            .collect();

        assert_eq!(first.len(), 2);
        let mut first = first;
        let mut second = second;
        first.sort();
        second.sort();
        assert_eq!(first, second);
        assert!(cache.get_cached(&EntityId::from("old")).is_none());
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn match_index_unknown_name() {
        let cache = indexed();
        let err = cache
            .match_index("by_team", &IndexKey::single("t"))
            .unwrap_err();
        assert!(matches!(err, CacheError::UnknownIndex { .. }));
    }

    #[test]
    fn invalidate_clears_everything() {
        let cache = indexed();
        cache.set(record("a", "s1"), None);
        cache.invalidate();
        assert!(cache.is_empty());
        assert!(cache
            .match_index("by_stream", &IndexKey::single("s1"))
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn concurrent_gets_coalesce_to_one_fetch() {
        let cache = Arc::new(indexed());
        let fetches = Arc::new(AtomicUsize::new(0));
        let id = EntityId::from("a");

        let mut tasks = JoinSet::new();
        for _ in 0..5 {
            let cache = Arc::clone(&cache);
            let fetches = Arc::clone(&fetches);
            let id = id.clone();
            tasks.spawn(async move {
                cache
                    .get_or_fetch(&id, || async {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(record("a", "s1"))
                    })
                    .await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let entity = joined.unwrap().unwrap();
            assert_eq!(entity.id.as_str(), "a");
            assert_eq!(entity.version, Version::new(1));
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn coalesced_failure_reaches_all_callers() {
        let cache = Arc::new(indexed());
        let fetches = Arc::new(AtomicUsize::new(0));
        let id = EntityId::from("a");

        let mut tasks = JoinSet::new();
        for _ in 0..3 {
            let cache = Arc::clone(&cache);
            let fetches = Arc::clone(&fetches);
            let id = id.clone();
            tasks.spawn(async move {
                cache
                    .get_or_fetch(&id, || async {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Err(CacheError::origin_retryable("origin down"))
                    })
                    .await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let err = joined.unwrap().unwrap_err();
            assert!(err.is_retryable());
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        // No partial entry was stored.
        assert!(cache.get_cached(&id).is_none());

        // A subsequent call starts a fresh fetch.
        let entity = cache
            .get_or_fetch(&id, || async {
                fetches.fetch_add(1, Ordering::SeqCst);
                Ok(record("a", "s1"))
            })
            .await
            .unwrap();
        assert_eq!(entity.id.as_str(), "a");
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn hit_never_invokes_fetch() {
        let cache = indexed();
        cache.set(record("a", "s1"), None);
        let entity = cache
            .get_or_fetch(&EntityId::from("a"), || async {
                panic!("fetch must not run on a hit")
            })
            .await
            .unwrap();
        assert_eq!(entity.stream_id, "s1");
    }

    #[tokio::test]
    async fn cancelled_leader_releases_waiters() {
        let cache = Arc::new(indexed());
        let id = EntityId::from("a");

        let leader = {
            let cache = Arc::clone(&cache);
            let id = id.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch(&id, || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(record("a", "s1"))
                    })
                    .await
            })
        };
        // Let the leader claim the pending slot, then pile on a waiter.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let waiter = {
            let cache = Arc::clone(&cache);
            let id = id.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch(&id, || async {
                        panic!("waiter must subscribe, not fetch")
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        leader.abort();
        assert!(leader.await.unwrap_err().is_cancelled());

        // The waiter fails tidily instead of hanging.
        let err = waiter.await.unwrap().unwrap_err();
        assert!(err.is_retryable());

        // The slot was cleared, so the next call starts a fresh fetch.
        let entity = cache
            .get_or_fetch(&id, || async { Ok(record("a", "s1")) })
            .await
            .unwrap();
        assert_eq!(entity.stream_id, "s1");
    }

    proptest! {
        // Every stored entity is reachable through its index bucket,
        // regardless of insertion order and bucket moves.
        #[test]
        fn index_stays_consistent(ops in prop::collection::vec((0u8..5, 0u8..3), 1..40)) {
            let cache = indexed();
            for (id, stream) in ops {
                let entity = record(&format!("e{id}"), &format!("s{stream}"));
                cache.set(entity, None);
            }
            for entity in cache.entries() {
                let hits = cache
                    .match_index("by_stream", &IndexKey::single(entity.stream_id.as_str()))
                    .unwrap();
                prop_assert!(hits.iter().any(|hit| hit.id == entity.id));
            }
            // And no bucket holds an entity whose field no longer matches.
            for entity in cache.entries() {
                for stream in 0u8..3 {
                    let key = format!("s{stream}");
                    if key != entity.stream_id {
                        let hits = cache.match_index("by_stream", &IndexKey::single(key.as_str())).unwrap();
                        prop_assert!(!hits.iter().any(|hit| hit.id == entity.id));
                    }
                }
            }
        }
    }
}
