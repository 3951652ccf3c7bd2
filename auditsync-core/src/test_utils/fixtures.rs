//! Test fixtures for creating common test objects
//!
//! Provides builder patterns and factory functions for creating test data.

use crate::core_log::event::Event;
use crate::core_log::store::{LogStore, LogStoreConfig};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating test events
pub struct TestEventBuilder {
    target_id: String,
    log_id: u64,
    id: u64,
    timestamp: i64,
    event_type: i32,
    properties: Vec<(String, String)>,
}

impl TestEventBuilder {
    pub fn new(id: u64) -> Self {
        Self {
            target_id: "target-1".to_string(),
            log_id: 1,
            id,
            timestamp: 1_700_000_000_000 + id as i64,
            event_type: 1,
            properties: Vec::new(),
        }
    }

    pub fn with_target(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = target_id.into();
        self
    }

    pub fn with_log(mut self, log_id: u64) -> Self {
        self.log_id = log_id;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }

    pub fn build(self) -> Event {
        let mut event = Event::new(self.target_id, self.log_id, self.id, self.timestamp, self.event_type);
        for (key, value) in self.properties {
            event = event.with_property(key, value);
        }
        event
    }
}

/// Events with the given ids for one log
pub fn events(target_id: &str, log_id: u64, ids: &[u64]) -> Vec<Event> {
    ids.iter()
        .map(|id| {
            TestEventBuilder::new(*id)
                .with_target(target_id)
                .with_log(log_id)
                .with_property("seq", id.to_string())
                .build()
        })
        .collect()
}

/// Store configuration rooted at `dir` with fast lock retries
pub fn store_config(dir: &Path) -> LogStoreConfig {
    LogStoreConfig {
        data_dir: dir.to_path_buf(),
        lock_attempts: 3,
        lock_backoff: Duration::from_millis(5),
        ..Default::default()
    }
}

/// Open a store rooted at `dir`
pub fn store_in(dir: &Path) -> Arc<LogStore> {
    match LogStore::new(store_config(dir)) {
        Ok(store) => Arc::new(store),
        Err(e) => panic!("cannot open test store in {}: {}", dir.display(), e),
    }
}
