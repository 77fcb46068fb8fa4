//! Real-time message envelope.

use crate::change_set::EntityChange;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The transport backend a real-time message arrived on.
///
/// `CodeStream` is the primary pub/sub backend and its messages are
/// fully specified change notifications. `Slack` is the chat-bridge
/// backend with a message shape of its own; its resolution path is a
/// distinct extension point. Tags outside the known set deserialize to
/// `Unknown` so a router can drop them without failing the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageSource {
    /// Primary pub/sub backend.
    CodeStream,
    /// Chat-bridge backend.
    Slack,
    /// Any unrecognized source tag.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for MessageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            MessageSource::CodeStream => "CodeStream",
            MessageSource::Slack => "Slack",
            MessageSource::Unknown => "unknown",
        };
        f.write_str(tag)
    }
}

/// An inbound real-time notification for a single entity type.
///
/// Constructed by the transport layer, consumed exactly once by the
/// router, discarded after resolution. Changes are ordered; when one
/// message carries several changes for the same id, later entries win.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealTimeMessage {
    /// Originating transport backend.
    pub source: MessageSource,
    /// Entity-type tag this message applies to (e.g. `"streams"`).
    pub kind: String,
    /// Ordered changes, one per affected entity.
    pub changes: Vec<EntityChange>,
}

impl RealTimeMessage {
    /// Creates a message for the given source and entity type.
    pub fn new(
        source: MessageSource,
        kind: impl Into<String>,
        changes: Vec<EntityChange>,
    ) -> Self {
        Self {
            source,
            kind: kind.into(),
            changes,
        }
    }
}
