//! # Mirror Core
//!
//! Indexed entity cache and change-set resolution for entity-mirror.
//!
//! This crate provides:
//! - `MirrorEntity` trait for cacheable origin entities
//! - `IndexedCache` with secondary indexes and fetch coalescing
//! - Change classification and copy-on-write change-set application
//!
//! ## Key Invariants
//!
//! - The origin is authoritative; the cache holds derived copies
//! - Primary map and index buckets update atomically
//! - At most one fetch is in flight per entity id
//! - Applying a change-set never mutates the cached copy in place

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod changes;
mod entity;
mod error;
mod index;

pub use cache::IndexedCache;
pub use changes::{apply_change_set, classify, snapshot_entity, UpdateAction};
pub use entity::MirrorEntity;
pub use error::{CacheError, CacheResult};
pub use index::{HashIndex, IndexKey, IndexSpec, IndexValue};

pub use mirror_protocol::{EntityId, Version};
