//! Client-supplied event filters.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::event::EventKind;

/// Predicate a client installs on its event session to narrow delivery.
///
/// An event passes when its identity is a key of the filter; an empty kind
/// list accepts every kind for that identity, a non-empty list only the
/// listed kinds. A filter with no identities suppresses everything.
///
/// The session write loop works on a point-in-time clone, so installing a
/// new filter never mutates one that is mid-evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushFilter {
    #[serde(default)]
    pub identities: HashMap<String, Vec<EventKind>>,
}

impl PushFilter {
    /// Creates a filter that suppresses everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interest in `identity`, optionally narrowed to `kinds`.
    ///
    /// An empty `kinds` slice means every kind of event for that identity.
    pub fn filter_identity(&mut self, identity: &str, kinds: &[EventKind]) {
        self.identities.insert(identity.to_string(), kinds.to_vec());
    }

    /// Returns `true` when events for `identity`/`kind` must not be
    /// delivered.
    #[must_use]
    pub fn is_filtered_out(&self, identity: &str, kind: EventKind) -> bool {
        match self.identities.get(identity) {
            None => true,
            Some(kinds) if kinds.is_empty() => false,
            Some(kinds) => !kinds.contains(&kind),
        }
    }
}
