//! The per-entity-type manager.
//!
//! An `EntityManager` owns one indexed cache and one origin, and
//! reconciles the cache against incoming real-time messages. One
//! manager exists per entity type; the router hands each message to
//! exactly one of them.

use crate::config::ManagerConfig;
use crate::error::{EngineError, EngineResult};
use crate::origin::EntityOrigin;
use mirror_core::{
    apply_change_set, classify, snapshot_entity, CacheError, IndexKey, IndexSpec, IndexedCache,
    MirrorEntity, UpdateAction,
};
use mirror_protocol::{EntityChange, EntityId, MessageSource, RealTimeMessage};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

/// Options for [`EntityManager::get`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    /// Answer from the cache only; a miss returns `None` instead of
    /// consulting the origin.
    pub avoid_fetch: bool,
}

/// Options for [`EntityManager::resolve`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    /// Report only entities the message actually changed; entities
    /// whose change was dropped as stale are omitted from the result
    /// instead of echoing the cached copy.
    pub only_if_needed: bool,
}

/// Resolution of messages arriving over a bridged transport.
///
/// The primary transport carries change-sets in the origin's own
/// format; bridged backends (Slack) carry third-party payloads that
/// need translation before they can touch the cache. Implementations
/// return the full entities the message maps to; the manager stores
/// and reports them like any other resolution.
pub trait BridgeResolver<T: MirrorEntity>: Send + Sync {
    /// Translates a bridged message into full entities.
    fn resolve<'a>(
        &'a self,
        message: &'a RealTimeMessage,
    ) -> Pin<Box<dyn Future<Output = EngineResult<Vec<T>>> + Send + 'a>>;
}

/// Manages the local mirror of one entity type.
///
/// Reads are cache-first with fetch-on-miss; writes arrive only
/// through [`resolve`](Self::resolve) (real-time reconciliation) and
/// [`load_cache`](Self::load_cache) (full reload). All operations are
/// safe to call concurrently.
pub struct EntityManager<T: MirrorEntity, O: EntityOrigin<T>> {
    config: ManagerConfig,
    cache: IndexedCache<T>,
    origin: O,
    bridge: Option<Box<dyn BridgeResolver<T>>>,
}

impl<T: MirrorEntity, O: EntityOrigin<T>> EntityManager<T, O> {
    /// Creates a manager with the given configuration, origin and
    /// secondary indexes.
    pub fn new(config: ManagerConfig, origin: O, indexes: Vec<IndexSpec<T>>) -> Self {
        Self {
            config,
            cache: IndexedCache::new(indexes),
            origin,
            bridge: None,
        }
    }

    /// Attaches a resolver for bridged (Slack) messages.
    #[must_use]
    pub fn with_bridge_resolver(mut self, bridge: Box<dyn BridgeResolver<T>>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Returns the manager configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Returns the origin this manager fetches from.
    pub fn origin(&self) -> &O {
        &self.origin
    }

    /// Retrieves one entity, consulting the origin on a cache miss.
    ///
    /// A not-found outcome is `Ok(None)`; other origin failures
    /// propagate. With [`GetOptions::avoid_fetch`] the origin is never
    /// consulted.
    pub async fn get(&self, id: &EntityId, options: GetOptions) -> EngineResult<Option<Arc<T>>> {
        if options.avoid_fetch {
            return Ok(self.cache.get_cached(id));
        }
        match self.cache.get_or_fetch(id, || self.origin.fetch(id)).await {
            Ok(entity) => Ok(Some(entity)),
            Err(CacheError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Retrieves one entity that is expected to exist.
    ///
    /// Unlike [`get`](Self::get), a not-found outcome is an error.
    pub async fn get_by_id(&self, id: &EntityId) -> EngineResult<Arc<T>> {
        self.cache
            .get_or_fetch(id, || self.origin.fetch(id))
            .await
            .map_err(EngineError::from)
    }

    /// Replaces the whole cache with the origin's current state.
    ///
    /// Returns the number of entities loaded. On failure the previous
    /// cache content is left intact.
    pub async fn load_cache(&self) -> EngineResult<usize> {
        let entities = self.origin.fetch_all().await?;
        let count = entities.len();
        self.cache.reset(entities);
        debug!(entity = %T::ENTITY_NAME, count, "cache loaded");
        Ok(count)
    }

    /// Drops all cached entries and index content.
    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    /// Returns all cached entities matching a secondary-index key.
    pub fn match_index(&self, name: &str, key: &IndexKey) -> EngineResult<Vec<Arc<T>>> {
        self.cache.match_index(name, key).map_err(EngineError::from)
    }

    /// Returns every cached entity.
    pub fn entries(&self) -> Vec<Arc<T>> {
        self.cache.entries()
    }

    /// Returns the number of cached entities.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Stores an entity directly, bypassing resolution.
    ///
    /// Used by callers that obtain entities out of band (e.g. embedded
    /// in an unrelated origin response).
    pub fn cache_set(&self, entity: T) -> Arc<T> {
        self.cache.set(entity, None)
    }

    /// Reconciles the cache against one real-time message.
    ///
    /// Items resolve independently and in order: a failing item is
    /// logged and skipped, never aborting its siblings. When several
    /// items target the same id, the result reports that entity once,
    /// in its final state. Messages from unrecognized sources resolve
    /// to an empty result.
    pub async fn resolve(
        &self,
        message: &RealTimeMessage,
        options: ResolveOptions,
    ) -> EngineResult<Vec<Arc<T>>> {
        if message.kind != self.config.kind {
            return Err(EngineError::KindMismatch {
                expected: self.config.kind.clone(),
                actual: message.kind.clone(),
            });
        }

        match message.source {
            MessageSource::CodeStream => Ok(self.resolve_changes(message, options).await),
            MessageSource::Slack => self.resolve_bridged(message).await,
            MessageSource::Unknown => {
                warn!(kind = %message.kind, "dropping message from unrecognized source");
                Ok(Vec::new())
            }
        }
    }

    async fn resolve_changes(
        &self,
        message: &RealTimeMessage,
        options: ResolveOptions,
    ) -> Vec<Arc<T>> {
        let mut resolved: Vec<Arc<T>> = Vec::new();
        let mut slots: HashMap<EntityId, usize> = HashMap::new();

        for change in &message.changes {
            let Some(id) = change.id() else {
                warn!(entity = %T::ENTITY_NAME, "dropping change without an id");
                continue;
            };
            match self.resolve_change(&id, change, options).await {
                Ok(Some(entity)) => match slots.get(&id) {
                    // Later items for the same id supersede earlier
                    // ones in the report.
                    Some(&slot) => resolved[slot] = entity,
                    None => {
                        slots.insert(id, resolved.len());
                        resolved.push(entity);
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    warn!(entity = %T::ENTITY_NAME, id = %id, error = %e, "change failed to resolve");
                }
            }
        }
        resolved
    }

    /// Resolves a single item of a message.
    ///
    /// `Ok(None)` means the item changed nothing worth reporting: it
    /// was stale, or resolved to the copy already cached while
    /// [`ResolveOptions::only_if_needed`] is set.
    async fn resolve_change(
        &self,
        id: &EntityId,
        change: &EntityChange,
        options: ResolveOptions,
    ) -> EngineResult<Option<Arc<T>>> {
        let cached = self.cache.get_cached(id);

        match (classify(change, cached.as_deref()), change) {
            (UpdateAction::Skip, _) => {
                debug!(entity = %T::ENTITY_NAME, id = %id, "dropping stale change");
                if options.only_if_needed {
                    Ok(None)
                } else {
                    Ok(cached)
                }
            }
            (UpdateAction::Apply, EntityChange::Delta(change_set)) => {
                // Apply on a delta implies a cached copy exists.
                let Some(existing) = cached else {
                    return self.refetch(id).await;
                };
                match apply_change_set(&*existing, change_set) {
                    Ok(updated) => Ok(Some(self.cache.set(updated, Some(&*existing)))),
                    Err(e) if e.is_stale() => {
                        debug!(entity = %T::ENTITY_NAME, id = %id, "dropping stale change");
                        if options.only_if_needed {
                            Ok(None)
                        } else {
                            Ok(Some(existing))
                        }
                    }
                    Err(e) => Err(e.into()),
                }
            }
            (UpdateAction::Apply, EntityChange::Snapshot(snapshot)) => {
                if cached.is_none() && self.config.force_fetch_to_resolve_on_cache_miss {
                    return self.refetch(id).await;
                }
                let entity: T = snapshot_entity(snapshot)?;
                Ok(Some(self.cache.set(entity, cached.as_deref())))
            }
            (UpdateAction::Fetch, _) => self.refetch(id).await,
        }
    }

    async fn refetch(&self, id: &EntityId) -> EngineResult<Option<Arc<T>>> {
        let entity = self.origin.fetch(id).await?;
        let previous = self.cache.get_cached(id);
        Ok(Some(self.cache.set(entity, previous.as_deref())))
    }

    async fn resolve_bridged(&self, message: &RealTimeMessage) -> EngineResult<Vec<Arc<T>>> {
        let Some(bridge) = self.bridge.as_ref() else {
            debug!(entity = %T::ENTITY_NAME, "no bridge resolver attached, dropping message");
            return Ok(Vec::new());
        };
        let entities = bridge.resolve(message).await?;
        let mut resolved: Vec<Arc<T>> = Vec::new();
        let mut slots: HashMap<EntityId, usize> = HashMap::new();
        for entity in entities {
            let previous = self.cache.get_cached(entity.id());
            let stored = self.cache.set(entity, previous.as_deref());
            match slots.get(stored.id()) {
                // As on the primary path, one entry per id: later
                // entities supersede earlier ones in the report.
                Some(&slot) => resolved[slot] = stored,
                None => {
                    slots.insert(stored.id().clone(), resolved.len());
                    resolved.push(stored);
                }
            }
        }
        Ok(resolved)
    }
}
