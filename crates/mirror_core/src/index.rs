//! Secondary index support.
//!
//! A cache declares zero or more named indexes at construction. Each
//! index is defined by an extractor that maps an entity to the key it
//! files under; entities for which the extractor returns `None` do not
//! participate in that index. Keys are composites of one or more field
//! values, so "by stream" and "by team + kind" are both single
//! declarations.

use crate::entity::MirrorEntity;
use mirror_protocol::EntityId;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// One field value inside an index key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexValue {
    /// A string field.
    Text(String),
    /// An integer field.
    Integer(i64),
    /// A boolean field.
    Bool(bool),
}

impl From<&str> for IndexValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for IndexValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for IndexValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for IndexValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&EntityId> for IndexValue {
    fn from(value: &EntityId) -> Self {
        Self::Text(value.as_str().to_owned())
    }
}

impl fmt::Display for IndexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexValue::Text(s) => f.write_str(s),
            IndexValue::Integer(n) => write!(f, "{n}"),
            IndexValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// A composite lookup key: the values of one or more indexed fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexKey(Vec<IndexValue>);

impl IndexKey {
    /// Creates a single-field key.
    pub fn single(value: impl Into<IndexValue>) -> Self {
        Self(vec![value.into()])
    }

    /// Creates a composite key from field values in declaration order.
    pub fn composite(values: impl IntoIterator<Item = IndexValue>) -> Self {
        Self(values.into_iter().collect())
    }

    /// Returns the field values of this key.
    #[must_use]
    pub fn values(&self) -> &[IndexValue] {
        &self.0
    }
}

impl From<IndexValue> for IndexKey {
    fn from(value: IndexValue) -> Self {
        Self(vec![value])
    }
}

/// Declaration of one secondary index over an entity type.
///
/// Declared once at cache construction; immutable thereafter.
pub struct IndexSpec<T> {
    name: String,
    extract: fn(&T) -> Option<IndexKey>,
}

impl<T> IndexSpec<T> {
    /// Creates an index specification.
    ///
    /// The extractor returns the key an entity files under, or `None`
    /// when the entity does not participate in this index.
    pub fn new(name: impl Into<String>, extract: fn(&T) -> Option<IndexKey>) -> Self {
        Self {
            name: name.into(),
            extract,
        }
    }

    /// Returns the index name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Extracts the key for an entity.
    pub fn key_for(&self, entity: &T) -> Option<IndexKey> {
        (self.extract)(entity)
    }
}

impl<T> Clone for IndexSpec<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            extract: self.extract,
        }
    }
}

impl<T> fmt::Debug for IndexSpec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexSpec").field("name", &self.name).finish()
    }
}

/// Hash-based index for O(1) equality lookups.
///
/// Stores a mapping from key to the set of entity ids filed under it
/// (non-unique). Membership is a function of the entity's field values:
/// updating an entity may move it between buckets, which is why removal
/// is keyed by the previous copy of the entity.
pub struct HashIndex<T> {
    spec: IndexSpec<T>,
    buckets: HashMap<IndexKey, HashSet<EntityId>>,
    count: usize,
}

impl<T: MirrorEntity> HashIndex<T> {
    /// Creates an empty index for the given specification.
    pub fn new(spec: IndexSpec<T>) -> Self {
        Self {
            spec,
            buckets: HashMap::new(),
            count: 0,
        }
    }

    /// Returns the index specification.
    pub fn spec(&self) -> &IndexSpec<T> {
        &self.spec
    }

    /// Files an entity under its extracted key, if it has one.
    pub fn insert(&mut self, entity: &T) {
        if let Some(key) = self.spec.key_for(entity) {
            let bucket = self.buckets.entry(key).or_default();
            if bucket.insert(entity.id().clone()) {
                self.count += 1;
            }
        }
    }

    /// Removes an entity's membership keyed by this (previous) copy.
    pub fn remove(&mut self, entity: &T) {
        if let Some(key) = self.spec.key_for(entity) {
            if let Some(bucket) = self.buckets.get_mut(&key) {
                if bucket.remove(entity.id()) {
                    self.count -= 1;
                    if bucket.is_empty() {
                        self.buckets.remove(&key);
                    }
                }
            }
        }
    }

    /// Returns the ids filed under a key.
    pub fn lookup(&self, key: &IndexKey) -> Vec<EntityId> {
        match self.buckets.get(key) {
            Some(bucket) => bucket.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Returns the number of entries across all buckets.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns true if the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Removes all entries.
    pub fn clear(&mut self) {
        self.buckets.clear();
        self.count = 0;
    }
}
