/*
    event.rs - Audit events

    An event is immutable once created. Its ordering key within a log is `id`;
    ids are strictly increasing per (target, log) but may have gaps.
*/

use crate::core_log::descriptor::LogKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single timestamped record in a target's log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Target that produced the event
    pub target_id: String,

    /// Log the event belongs to
    pub log_id: u64,

    /// Id, unique and increasing within the log
    pub id: u64,

    /// Milliseconds since the Unix epoch
    pub timestamp: i64,

    /// Application defined event type
    pub event_type: i32,

    /// Free-form properties; sorted so the textual form is stable
    pub properties: BTreeMap<String, String>,
}

impl Event {
    pub fn new(
        target_id: impl Into<String>,
        log_id: u64,
        id: u64,
        timestamp: i64,
        event_type: i32,
    ) -> Self {
        Event {
            target_id: target_id.into(),
            log_id,
            id,
            timestamp,
            event_type,
            properties: BTreeMap::new(),
        }
    }

    /// Builder-style property setter
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.properties = properties;
        self
    }

    /// The log this event belongs to
    pub fn key(&self) -> LogKey {
        LogKey::new(self.target_id.clone(), self.log_id)
    }
}
