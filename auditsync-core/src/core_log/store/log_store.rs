/*
    log_store.rs - Persistent append-only event store

    Events are addressed by (target id, log id). Every operation touching a
    log's persisted state holds that log's lock from the LockTable, so work
    on different logs proceeds in parallel while work on the same log is
    serialized.

    Write path (put):
    - group incoming events per log
    - drop duplicates and ids below the log's low watermark
    - cheap append when the lowest new id directly follows the highest stored
      id, otherwise merge, sort and rewrite
    - trim the oldest events beyond `max_events`, advancing the watermark
    - notify observers of every newly stored event

    The stored-id RangeSet of each log is cached and refreshed on every write.
*/

use crate::core_log::descriptor::{Descriptor, LogKey, LowWatermark};
use crate::core_log::event::Event;
use crate::core_log::range_set::RangeSet;
use crate::core_log::store::errors::{StoreError, StoreResult};
use crate::core_log::store::lock_table::LockTable;
use crate::core_log::store::log_file::{self, LogFile};
use crate::core_log::store::notifier::{EventNotifier, NoopNotifier};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, trace};

/// Configuration for a log store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogStoreConfig {
    /// Base directory for all logs
    pub data_dir: PathBuf,

    /// Name carried by notifications, e.g. "auditlog"
    pub name: String,

    /// Maximum events kept per log; 0 keeps everything
    pub max_events: usize,

    /// Lock acquisition attempts before failing with `Busy`
    pub lock_attempts: u32,

    /// Wait between lock attempts
    #[serde(with = "humantime_serde")]
    pub lock_backoff: Duration,
}

impl Default for LogStoreConfig {
    fn default() -> Self {
        LogStoreConfig {
            data_dir: PathBuf::from("./data/auditlog"),
            name: "auditlog".to_string(),
            max_events: 0,
            lock_attempts: 10,
            lock_backoff: Duration::from_millis(50),
        }
    }
}

/// Durable per-target, per-log event storage
pub struct LogStore {
    config: LogStoreConfig,
    locks: LockTable,
    /// Stored ids per log (watermark not applied)
    stored_ids: Mutex<HashMap<LogKey, RangeSet>>,
    notifier: Arc<dyn EventNotifier>,
}

impl LogStore {
    /// Open (or create) a store rooted at `config.data_dir`
    pub fn new(config: LogStoreConfig) -> StoreResult<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        info!(dir = %config.data_dir.display(), name = %config.name, "opened log store");

        Ok(LogStore {
            locks: LockTable::new(config.lock_attempts, config.lock_backoff),
            config,
            stored_ids: Mutex::new(HashMap::new()),
            notifier: Arc::new(NoopNotifier),
        })
    }

    /// Replace the notifier that receives newly stored events
    pub fn with_notifier(mut self, notifier: Arc<dyn EventNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &LogStoreConfig {
        &self.config
    }

    fn log_file(&self, key: &LogKey) -> LogFile {
        LogFile::new(&self.config.data_dir, key)
    }

    /// Cached stored ids; caller must hold the log's lock
    fn stored_ids_locked(&self, key: &LogKey, file: &LogFile) -> StoreResult<RangeSet> {
        if let Some(ids) = self.cache().get(key) {
            return Ok(ids.clone());
        }

        let ids: Vec<u64> = file.read_events()?.iter().map(|e| e.id).collect();
        let ids = RangeSet::from_ids(&ids);
        self.cache().insert(key.clone(), ids.clone());
        Ok(ids)
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, HashMap<LogKey, RangeSet>> {
        self.stored_ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Events whose id is in `descriptor.range_set` and at or above the watermark
    pub fn get(&self, descriptor: &Descriptor) -> StoreResult<Vec<Event>> {
        let key = descriptor.key();
        let _guard = self.locks.acquire(&key)?;
        let file = self.log_file(&key);

        let watermark = file.read_watermark()?;
        let events = file
            .read_events()?
            .into_iter()
            .filter(|e| e.id >= watermark && descriptor.range_set.contains(e.id))
            .collect();
        Ok(events)
    }

    /// Every visible event of one log
    pub fn get_all(&self, target_id: &str, log_id: u64) -> StoreResult<Vec<Event>> {
        let key = LogKey::new(target_id, log_id);
        let _guard = self.locks.acquire(&key)?;
        let file = self.log_file(&key);

        let watermark = file.read_watermark()?;
        Ok(file.read_events()?.into_iter().filter(|e| e.id >= watermark).collect())
    }

    /// Descriptor of one log, clipped to its watermark
    pub fn get_descriptor(&self, target_id: &str, log_id: u64) -> StoreResult<Descriptor> {
        let key = LogKey::new(target_id, log_id);
        let _guard = self.locks.acquire(&key)?;
        let file = self.log_file(&key);

        let ids = self.stored_ids_locked(&key, &file)?;
        let watermark = file.read_watermark()?;
        Ok(Descriptor::new(target_id, log_id, ids.at_or_above(watermark)))
    }

    /// Descriptors of every log, or of one target's logs
    pub fn get_descriptors(&self, target_id: Option<&str>) -> StoreResult<Vec<Descriptor>> {
        let targets = match target_id {
            Some(target) => vec![target.to_string()],
            None => self.targets()?,
        };

        let mut descriptors = Vec::new();
        for target in targets {
            for log_id in self.log_ids(&target)? {
                descriptors.push(self.get_descriptor(&target, log_id)?);
            }
        }
        Ok(descriptors)
    }

    /// Targets with at least one log on disk
    pub fn targets(&self) -> StoreResult<Vec<String>> {
        let mut targets = BTreeSet::new();
        for entry in std::fs::read_dir(&self.config.data_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            match name.to_str().and_then(log_file::target_from_dir_name) {
                Some(target) => {
                    targets.insert(target);
                }
                None => debug!(dir = ?name, "ignoring foreign directory"),
            }
        }
        Ok(targets.into_iter().collect())
    }

    /// Log ids of a target, from data and watermark files alike
    pub fn log_ids(&self, target_id: &str) -> StoreResult<Vec<u64>> {
        if target_id.is_empty() {
            return Ok(Vec::new());
        }
        let dir = self.config.data_dir.join(log_file::target_dir_name(target_id));
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut log_ids = BTreeSet::new();
        for entry in entries {
            let entry = entry?;
            if let Some(log_id) = entry.file_name().to_str().and_then(log_file::log_id_from_file_name) {
                log_ids.insert(log_id);
            }
        }
        Ok(log_ids.into_iter().collect())
    }

    /// Merge events into the store; returns how many were newly stored.
    ///
    /// Idempotent: events already present (same id) are ignored.
    pub fn put(&self, events: &[Event]) -> StoreResult<usize> {
        let mut groups: BTreeMap<LogKey, Vec<Event>> = BTreeMap::new();
        for event in events {
            if event.target_id.is_empty() {
                return Err(StoreError::InvalidArgument(format!(
                    "event {} has an empty target id",
                    event.id
                )));
            }
            groups.entry(event.key()).or_default().push(event.clone());
        }

        let mut stored = 0;
        for (key, group) in groups {
            let added = {
                let _guard = self.locks.acquire(&key)?;
                self.merge_locked(&key, group)?
            };
            stored += added.len();
            self.notify(&added);
        }
        Ok(stored)
    }

    /// Create a new event with the next free id and store it.
    ///
    /// This is how producers on a target record events.
    pub fn log(
        &self,
        target_id: &str,
        log_id: u64,
        event_type: i32,
        properties: BTreeMap<String, String>,
    ) -> StoreResult<Event> {
        if target_id.is_empty() {
            return Err(StoreError::InvalidArgument("target id must not be empty".to_string()));
        }

        let key = LogKey::new(target_id, log_id);
        let (event, added) = {
            let _guard = self.locks.acquire(&key)?;
            let file = self.log_file(&key);

            let highest = self.stored_ids_locked(&key, &file)?.high().unwrap_or(0);
            let watermark = file.read_watermark()?;
            let id = highest
                .max(watermark.saturating_sub(1))
                .checked_add(1)
                .ok_or_else(|| StoreError::InvalidArgument(format!("log {} has no ids left", key)))?;

            let event = Event::new(target_id, log_id, id, now_millis(), event_type)
                .with_properties(properties);
            let added = self.merge_locked(&key, vec![event.clone()])?;
            (event, added)
        };

        self.notify(&added);
        Ok(event)
    }

    /// Merge one log's events; caller must hold the log's lock.
    /// Returns the events that were newly stored and survived trimming.
    fn merge_locked(&self, key: &LogKey, mut incoming: Vec<Event>) -> StoreResult<Vec<Event>> {
        let file = self.log_file(key);
        let watermark = file.read_watermark()?;
        let existing = self.stored_ids_locked(key, &file)?;

        incoming.sort_by_key(|e| e.id);
        incoming.dedup_by_key(|e| e.id);
        incoming.retain(|e| e.id >= watermark && !existing.contains(e.id));

        let Some(first) = incoming.first() else {
            trace!(log = %key, "nothing new to store");
            return Ok(Vec::new());
        };

        let incoming_ids: Vec<u64> = incoming.iter().map(|e| e.id).collect();
        let mut ids = existing.union(&RangeSet::from_ids(&incoming_ids));

        let cheap_append = match existing.high() {
            None => true,
            Some(high) => high.checked_add(1) == Some(first.id),
        };

        let mut merged = None;
        if cheap_append {
            file.append_events(&incoming)?;
        } else {
            let mut all = file.read_events()?;
            all.extend(incoming.iter().cloned());
            all.sort_by_key(|e| e.id);
            all.dedup_by_key(|e| e.id);
            file.rewrite_events(&all)?;
            merged = Some(all);
        }
        debug!(log = %key, count = incoming.len(), cheap_append, "stored events");

        let max_events = self.config.max_events as u64;
        if max_events > 0 && ids.len() > max_events {
            let mut all = match merged {
                Some(all) => all,
                None => file.read_events()?,
            };
            let excess = all.len().saturating_sub(self.config.max_events);
            all.drain(..excess);
            file.rewrite_events(&all)?;

            if let Some(lowest) = all.first().map(|e| e.id) {
                if lowest > watermark {
                    file.write_watermark(lowest)?;
                }
                incoming.retain(|e| e.id >= lowest);
            }
            let kept: Vec<u64> = all.iter().map(|e| e.id).collect();
            ids = RangeSet::from_ids(&kept);
            info!(log = %key, trimmed = excess, "trimmed log to retention limit");
        }

        self.cache().insert(key.clone(), ids);
        metrics::counter!("store.events.written").increment(incoming.len() as u64);
        Ok(incoming)
    }

    /// Hold a log's lock from outside the store
    #[cfg(test)]
    pub(crate) fn lock_log(&self, target_id: &str, log_id: u64) -> StoreResult<super::LogGuard<'_>> {
        self.locks.acquire(&LogKey::new(target_id, log_id))
    }

    fn notify(&self, events: &[Event]) {
        for event in events {
            self.notifier.post(&self.config.name, event);
        }
    }

    /// Advance the low watermark. Returns `false` (and changes nothing) when
    /// `value` does not exceed the current watermark.
    pub fn set_lowest_id(&self, target_id: &str, log_id: u64, value: u64) -> StoreResult<bool> {
        let key = LogKey::new(target_id, log_id);
        let _guard = self.locks.acquire(&key)?;
        let file = self.log_file(&key);

        let current = file.read_watermark()?;
        if value <= current {
            trace!(log = %key, current, value, "watermark not advanced");
            return Ok(false);
        }

        file.write_watermark(value)?;
        debug!(log = %key, from = current, to = value, "advanced low watermark");
        Ok(true)
    }

    pub fn get_lowest_id(&self, target_id: &str, log_id: u64) -> StoreResult<u64> {
        let key = LogKey::new(target_id, log_id);
        let _guard = self.locks.acquire(&key)?;
        self.log_file(&key).read_watermark()
    }

    /// Non-zero watermarks of every log, or of one target's logs
    pub fn get_watermarks(&self, target_id: Option<&str>) -> StoreResult<Vec<LowWatermark>> {
        let targets = match target_id {
            Some(target) => vec![target.to_string()],
            None => self.targets()?,
        };

        let mut watermarks = Vec::new();
        for target in targets {
            for log_id in self.log_ids(&target)? {
                let lowest_id = self.get_lowest_id(&target, log_id)?;
                if lowest_id > 0 {
                    watermarks.push(LowWatermark::new(target.clone(), log_id, lowest_id));
                }
            }
        }
        Ok(watermarks)
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
