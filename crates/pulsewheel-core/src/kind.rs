//! Event kind registry: numeric tags with human-readable labels.
//!
//! The scheduler itself is kind-agnostic; it only compares tags for
//! equality and asks this registry for a label when an admin command or a
//! warning log wants one. Collaborators register one kind per distinct
//! deferred behavior (delayed damage, casting, regen, object decay, ...)
//! at startup and hold on to the returned [`EventKindId`]s.

use std::collections::HashMap;

use crate::id::EventKindId;

/// Label returned for an id this registry never issued.
const INVALID_KIND_NAME: &str = "!invalid!";

/// Errors from kind registration.
#[derive(Debug, thiserror::Error)]
pub enum KindError {
    #[error("duplicate kind name: {0}")]
    Duplicate(String),
    #[error("kind ids exhausted")]
    Exhausted,
}

/// Register-then-query table of event kinds.
#[derive(Debug, Default)]
pub struct KindRegistry {
    names: Vec<String>,
    by_name: HashMap<String, EventKindId>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind. Returns a dense id; names must be unique.
    pub fn register(&mut self, name: &str) -> Result<EventKindId, KindError> {
        if self.by_name.contains_key(name) {
            return Err(KindError::Duplicate(name.to_string()));
        }
        let raw = u16::try_from(self.names.len()).map_err(|_| KindError::Exhausted)?;
        let id = EventKindId(raw);
        self.names.push(name.to_string());
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    /// Label for a kind. Unknown ids get the `"!invalid!"` sentinel
    /// rather than a panic, so diagnostics can print any tag.
    pub fn name_of(&self, kind: EventKindId) -> &str {
        self.names
            .get(kind.0 as usize)
            .map(String::as_str)
            .unwrap_or(INVALID_KIND_NAME)
    }

    /// Lookup a kind id by its registered name.
    pub fn lookup(&self, name: &str) -> Option<EventKindId> {
        self.by_name.get(name).copied()
    }

    /// Number of registered kinds.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no kinds are registered.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Iterate `(id, name)` pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (EventKindId, &str)> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, n)| (EventKindId(i as u16), n.as_str()))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
