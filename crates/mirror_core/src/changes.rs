//! Change classification and application.
//!
//! Incoming real-time items are classified against the cached copy
//! before anything is mutated: a change may be applied in place,
//! dropped as stale, or escalated to a full refetch when it was
//! produced against a version the cache does not hold. Application is
//! copy-on-write: the cached copy is never mutated, so holders of a
//! previously returned reference are unaffected.

use crate::entity::MirrorEntity;
use crate::error::{CacheError, CacheResult};
use mirror_protocol::{ChangeSet, EntityChange, VersionMatch};
use serde_json::Value;

/// What to do with an incoming change, given the cached copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateAction {
    /// Merge the change into the cached copy (or take the snapshot).
    Apply,
    /// The change is stale; keep the cached copy untouched.
    Skip,
    /// Fetch the full entity from the origin instead.
    Fetch,
}

/// Classifies an incoming change against the cached copy.
///
/// Decision table:
/// - snapshot, nothing cached → `Apply` (materialize from the snapshot)
/// - snapshot with a version not newer than cached → `Skip`
/// - unversioned snapshot against a cached copy → `Fetch` (it cannot
///   prove freshness either way, so the origin settles it)
/// - delta, nothing cached → `Fetch` (a partial update cannot
///   materialize an entity)
/// - delta whose expected version matches the cached one (or `Any`)
///   → `Apply`
/// - delta with a version not newer than cached → `Skip`
/// - delta produced against a version the cache does not hold
///   → `Fetch`
pub fn classify<T: MirrorEntity>(change: &EntityChange, cached: Option<&T>) -> UpdateAction {
    match change {
        EntityChange::Snapshot(_) => {
            let Some(existing) = cached else {
                return UpdateAction::Apply;
            };
            match change.version() {
                Some(incoming) if incoming > existing.version() => UpdateAction::Apply,
                Some(_) => UpdateAction::Skip,
                // Unversioned snapshots cannot prove freshness.
                None => UpdateAction::Fetch,
            }
        }
        EntityChange::Delta(change) => {
            let Some(existing) = cached else {
                return UpdateAction::Fetch;
            };
            match change.expected {
                Some(VersionMatch::Any) => return UpdateAction::Apply,
                Some(VersionMatch::Exact(expected)) if expected == existing.version() => {
                    return UpdateAction::Apply;
                }
                _ => {}
            }
            if change.version <= existing.version() {
                return UpdateAction::Skip;
            }
            match change.expected {
                None => UpdateAction::Apply,
                // Newer than cached but produced against a version we
                // do not hold: the cache missed an intermediate state.
                Some(_) => UpdateAction::Fetch,
            }
        }
    }
}

/// Applies a change-set to an entity, producing a new entity value.
///
/// `existing` is never mutated. `$set` fields overwrite, `$unset`
/// fields are removed, and the result carries the change-set's
/// version; the `id` and `version` fields themselves cannot be set or
/// unset. Fails with [`CacheError::StaleChangeSet`] when the incoming
/// version is not strictly newer — callers treat that as a no-op.
pub fn apply_change_set<T: MirrorEntity>(existing: &T, change: &ChangeSet) -> CacheResult<T> {
    if change.version <= existing.version() {
        return Err(CacheError::StaleChangeSet {
            id: change.id.clone(),
            current: existing.version(),
            incoming: change.version,
        });
    }

    let mut value = serde_json::to_value(existing)
        .map_err(|e| CacheError::resolve(format!("cannot serialize {}: {e}", T::ENTITY_NAME)))?;
    let object = value
        .as_object_mut()
        .ok_or_else(|| CacheError::resolve(format!("{} is not an object", T::ENTITY_NAME)))?;

    for (field, incoming) in &change.set {
        if field == "id" || field == "version" {
            continue;
        }
        object.insert(field.clone(), incoming.clone());
    }
    for field in &change.unset {
        if field == "id" || field == "version" {
            continue;
        }
        object.remove(field);
    }
    object.insert("version".to_owned(), Value::from(change.version.as_u64()));

    serde_json::from_value(value)
        .map_err(|e| CacheError::resolve(format!("merged {} is invalid: {e}", T::ENTITY_NAME)))
}

/// Materializes an entity from a full snapshot payload.
pub fn snapshot_entity<T: MirrorEntity>(snapshot: &Value) -> CacheResult<T> {
    serde_json::from_value(snapshot.clone())
        .map_err(|e| CacheError::resolve(format!("snapshot is not a {}: {e}", T::ENTITY_NAME)))
}
