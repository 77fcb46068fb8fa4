//! # Mirror Engine
//!
//! Entity managers and real-time message routing for entity-mirror.
//!
//! This crate provides:
//! - `EntityOrigin` — the origin retrieval contract (fetch, fetch_all)
//! - `EntityManager` — one per entity type, owning an indexed cache
//! - `MessageRouter` — explicit-registration dispatch of real-time
//!   messages to the matching manager
//!
//! ## Architecture
//!
//! The origin (CRUD server) is authoritative; each manager maintains a
//! lazily-populated local mirror of one entity type and reconciles it
//! against real-time change notifications. Resolution is per-item: one
//! failing change never aborts its siblings, and stale changes are
//! dropped silently.
//!
//! ## Key Invariants
//!
//! - At most one origin fetch in flight per entity id
//! - Change application is copy-on-write
//! - A failed full reload leaves the previous cache content intact
//! - Unrecognized message sources are ignored, never propagated

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod manager;
mod origin;
mod router;

pub use config::ManagerConfig;
pub use error::{EngineError, EngineResult};
pub use manager::{BridgeResolver, EntityManager, GetOptions, ResolveOptions};
pub use origin::{EntityOrigin, MockOrigin};
pub use router::{MessageRouter, Registration, RouteFuture, RouteHandler};
