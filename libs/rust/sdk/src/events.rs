//! Observation events emitted by engines.

use crate::error::SdkResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A structured observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event type, e.g. `database/creds/create/success`
    pub event_type: String,
    /// Flat string metadata
    pub metadata: BTreeMap<String, String>,
}

impl Event {
    /// Create an event with no metadata.
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Add a metadata pair.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Metadata value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// Sink for observation events.
pub trait EventSender: Send + Sync + std::fmt::Debug {
    /// Deliver an event.
    ///
    /// # Errors
    ///
    /// Implementations may fail; engines log and continue.
    fn send_event(&self, event: Event) -> SdkResult<()>;
}
