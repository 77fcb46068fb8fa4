//! The cacheable entity contract.

use mirror_protocol::{EntityId, Version};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// An origin-owned entity that can live in an [`IndexedCache`].
///
/// Entities are plain serde types carrying an immutable id and a
/// monotonically increasing version counter assigned by the origin.
/// The cache only ever holds derived copies; `Clone` is required so a
/// change-set can be applied copy-on-write without disturbing holders
/// of the previous value.
///
/// [`IndexedCache`]: crate::IndexedCache
pub trait MirrorEntity:
    Clone + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Entity type name used in logs and errors (e.g. `"stream"`).
    const ENTITY_NAME: &'static str;

    /// The unique, immutable entity id.
    fn id(&self) -> &EntityId;

    /// The origin-assigned version of this copy.
    fn version(&self) -> Version;
}
