//! Core identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for an entity, assigned by the origin.
///
/// Entity ids are opaque strings. They are immutable for the lifetime
/// of the entity and never reused.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Creates an entity id from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Version counter for an entity.
///
/// Versions are assigned by the origin and increase monotonically with
/// every write. Higher versions indicate later states; a change
/// carrying a version not greater than the cached one is stale.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(pub u64);

impl Version {
    /// Creates a new version.
    #[must_use]
    pub const fn new(version: u64) -> Self {
        Self(version)
    }

    /// Returns the raw version value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next version in sequence.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_display() {
        let id = EntityId::from("abc");
        assert_eq!(id.as_str(), "abc");
        assert_eq!(format!("{id}"), "abc");
    }

    #[test]
    fn version_ordering() {
        let v1 = Version::new(1);
        let v2 = v1.next();
        assert!(v1 < v2);
        assert_eq!(v2.as_u64(), 2);
    }

    #[test]
    fn version_display() {
        assert_eq!(format!("{}", Version::new(7)), "v7");
    }

    #[test]
    fn id_serde_transparent() {
        let id = EntityId::from("abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"abc\"");

        let version = Version::new(3);
        assert_eq!(serde_json::to_string(&version).unwrap(), "3");
    }
}
