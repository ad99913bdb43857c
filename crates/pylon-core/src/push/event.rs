//! Entity events fanned out to push sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of mutation an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

/// A single entity mutation pushed to event sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub kind: EventKind,
    /// Identity of the entity the event is about.
    pub identity: String,
    /// When the mutation happened. Sessions drop events stamped before they
    /// started.
    pub timestamp: DateTime<Utc>,
    /// Opaque representation of the mutated entity.
    #[serde(default)]
    pub entity: serde_json::Value,
}

impl Event {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(kind: EventKind, identity: &str, entity: serde_json::Value) -> Self {
        Self {
            kind,
            identity: identity.to_string(),
            timestamp: Utc::now(),
            entity,
        }
    }
}
