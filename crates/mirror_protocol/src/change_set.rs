//! Change-set types for partial entity updates.
//!
//! A real-time notification carries one item per affected entity. Each
//! item is either a full entity snapshot (the origin sent the whole
//! record, typical for creations) or a delta: a `ChangeSet` with
//! field-level `$set` overwrites and `$unset` removals, stamped with
//! the version the entity holds after the change is applied.

use crate::id::{EntityId, Version};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// The version a change-set was produced against.
///
/// A delta may declare which cached version it expects to find. `Any`
/// (the `"*"` wildcard on the wire) applies regardless of the cached
/// version; `Exact` applies only when the cached version matches, and
/// a mismatch forces a refetch from the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionMatch {
    /// Applies against any cached version.
    Any,
    /// Applies only against the given cached version.
    Exact(Version),
}

impl Serialize for VersionMatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            VersionMatch::Any => serializer.serialize_str("*"),
            VersionMatch::Exact(version) => serializer.serialize_u64(version.as_u64()),
        }
    }
}

impl<'de> Deserialize<'de> for VersionMatch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MatchVisitor;

        impl Visitor<'_> for MatchVisitor {
            type Value = VersionMatch;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a version number or \"*\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(VersionMatch::Exact(Version::new(v)))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                if v < 0 {
                    return Err(E::custom("version must be non-negative"));
                }
                Ok(VersionMatch::Exact(Version::new(v as u64)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                if v == "*" {
                    Ok(VersionMatch::Any)
                } else {
                    Err(E::custom(format!("unknown version match {v:?}")))
                }
            }
        }

        deserializer.deserialize_any(MatchVisitor)
    }
}

/// A partial update description for one entity.
///
/// `set` fields overwrite the cached values; `unset` fields are removed
/// entirely (the explicit "remove this field" sentinel, as opposed to
/// "set to null"). The `id` and `version` fields of the entity itself
/// can never be set or unset through a change-set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Target entity id.
    pub id: EntityId,
    /// Entity version after this change is applied.
    pub version: Version,
    /// Cached version this change was produced against, if declared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<VersionMatch>,
    /// Field overwrites.
    #[serde(rename = "$set")]
    pub set: serde_json::Map<String, Value>,
    /// Field removals.
    #[serde(rename = "$unset", default, skip_serializing_if = "Vec::is_empty")]
    pub unset: Vec<String>,
}

impl ChangeSet {
    /// Creates an empty change-set for the given entity and target version.
    pub fn new(id: impl Into<EntityId>, version: Version) -> Self {
        Self {
            id: id.into(),
            version,
            expected: None,
            set: serde_json::Map::new(),
            unset: Vec::new(),
        }
    }

    /// Declares the cached version this change was produced against.
    #[must_use]
    pub fn expecting(mut self, expected: VersionMatch) -> Self {
        self.expected = Some(expected);
        self
    }

    /// Adds a field overwrite.
    #[must_use]
    pub fn set_field(mut self, field: impl Into<String>, value: Value) -> Self {
        self.set.insert(field.into(), value);
        self
    }

    /// Adds a field removal.
    #[must_use]
    pub fn unset_field(mut self, field: impl Into<String>) -> Self {
        self.unset.push(field.into());
        self
    }
}

/// One item of a real-time notification: a full snapshot or a delta.
///
/// On the wire the two are distinguished by the presence of a `$set`
/// member; anything without one is taken as a full entity object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityChange {
    /// A partial update to an already-known entity.
    Delta(ChangeSet),
    /// A complete entity as the origin currently holds it.
    Snapshot(Value),
}

impl EntityChange {
    /// Returns the target entity id, if the item carries one.
    pub fn id(&self) -> Option<EntityId> {
        match self {
            EntityChange::Delta(change) => Some(change.id.clone()),
            EntityChange::Snapshot(value) => {
                value.get("id").and_then(Value::as_str).map(EntityId::from)
            }
        }
    }

    /// Returns the version the entity holds after this item, if present.
    pub fn version(&self) -> Option<Version> {
        match self {
            EntityChange::Delta(change) => Some(change.version),
            EntityChange::Snapshot(value) => {
                value.get("version").and_then(Value::as_u64).map(Version::new)
            }
        }
    }

    /// Returns true if this item is a delta.
    #[must_use]
    pub fn is_delta(&self) -> bool {
        matches!(self, EntityChange::Delta(_))
    }
}

impl From<ChangeSet> for EntityChange {
    fn from(change: ChangeSet) -> Self {
        EntityChange::Delta(change)
    }
}
