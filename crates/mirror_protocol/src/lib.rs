//! # Mirror Protocol
//!
//! Real-time message and change-set types for entity-mirror.
//!
//! This crate provides:
//! - `EntityId` and `Version` newtypes
//! - `ChangeSet` for partial entity updates
//! - `EntityChange` (snapshot vs. delta)
//! - `RealTimeMessage` and `MessageSource`
//!
//! This is a pure types crate with no I/O operations. The physical
//! transport (pub/sub channel framing, authentication, delivery order)
//! is owned by the collaborating transport layer.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_set;
mod id;
mod message;

pub use change_set::{ChangeSet, EntityChange, VersionMatch};
pub use id::{EntityId, Version};
pub use message::{MessageSource, RealTimeMessage};
