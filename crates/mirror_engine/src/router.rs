//! Real-time message routing.
//!
//! One router serves the whole session. Routes are declared up front
//! as an explicit registration table keyed by (source, entity-type
//! tag); a message whose key has no route is logged and dropped, so
//! new notification kinds on the wire degrade to no-ops until a route
//! is registered for them.

use crate::error::{EngineError, EngineResult};
use crate::manager::{EntityManager, ResolveOptions};
use crate::origin::EntityOrigin;
use mirror_core::MirrorEntity;
use mirror_protocol::{MessageSource, RealTimeMessage};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

/// Future returned by a route handler.
pub type RouteFuture = Pin<Box<dyn Future<Output = EngineResult<Vec<serde_json::Value>>> + Send>>;

/// A route handler: consumes one message, reports the resolved
/// entities as JSON values.
pub type RouteHandler = Box<dyn Fn(RealTimeMessage) -> RouteFuture + Send + Sync>;

/// One entry of the routing table.
pub struct Registration {
    source: MessageSource,
    kind: String,
    handler: RouteHandler,
}

impl Registration {
    /// Registers a handler for messages with the given source and
    /// entity-type tag.
    pub fn new(source: MessageSource, kind: impl Into<String>, handler: RouteHandler) -> Self {
        Self {
            source,
            kind: kind.into(),
            handler,
        }
    }

    /// Registers a manager as the handler for its entity type.
    ///
    /// The entity-type tag comes from the manager's configuration;
    /// resolved entities are reported in serialized form.
    pub fn for_manager<T, O>(source: MessageSource, manager: Arc<EntityManager<T, O>>) -> Self
    where
        T: MirrorEntity,
        O: EntityOrigin<T>,
    {
        let kind = manager.config().kind.clone();
        let handler: RouteHandler = Box::new(move |message| {
            let manager = Arc::clone(&manager);
            Box::pin(async move {
                let resolved = manager.resolve(&message, ResolveOptions::default()).await?;
                resolved
                    .iter()
                    .map(|entity| {
                        serde_json::to_value(&**entity)
                            .map_err(|e| EngineError::Serialization(e.to_string()))
                    })
                    .collect()
            })
        });
        Self::new(source, kind, handler)
    }
}

/// Dispatches real-time messages to registered handlers.
pub struct MessageRouter {
    routes: HashMap<(MessageSource, String), RouteHandler>,
}

impl MessageRouter {
    /// Builds the routing table. A later registration for the same
    /// (source, kind) replaces the earlier one.
    pub fn new(registrations: Vec<Registration>) -> Self {
        let mut routes = HashMap::new();
        for registration in registrations {
            routes.insert(
                (registration.source, registration.kind),
                registration.handler,
            );
        }
        Self { routes }
    }

    /// Returns true if a route exists for the given key.
    pub fn handles(&self, source: MessageSource, kind: &str) -> bool {
        self.routes.contains_key(&(source, kind.to_owned()))
    }

    /// Dispatches one message.
    ///
    /// Returns the resolved entities in serialized form. Messages with
    /// no matching route and handler failures both resolve to an empty
    /// result; routing never propagates an error to the transport.
    pub async fn route(&self, message: RealTimeMessage) -> Vec<serde_json::Value> {
        let key = (message.source, message.kind.clone());
        let Some(handler) = self.routes.get(&key) else {
            debug!(source = %message.source, kind = %message.kind, "no route for message, dropping");
            return Vec::new();
        };
        match handler(message).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(source = %key.0, kind = %key.1, error = %e, "route handler failed");
                Vec::new()
            }
        }
    }
}
