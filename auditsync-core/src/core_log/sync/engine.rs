/*
    engine.rs - Reconciles a local LogStore with one remote endpoint

    Data sync:
    - push: local descriptors vs. remote `query`, clipped to the remote
      watermarks from `receiveids`, missing events go to `send`
    - pull: remote descriptors vs. local, each missing range via `receive`,
      clipped to the local watermark, merged with `put`
    - pushpull: both, independently

    Watermark sync sends or fetches (target, log, lowest id) tuples without a
    delta; applying them is monotonic and therefore idempotent.

    A cycle runs watermark sync then data sync, never propagates errors and
    never overlaps with another cycle of the same engine. Nothing about a
    partial cycle is persisted; the next cycle starts from scratch.
*/

use crate::core_log::codec;
use crate::core_log::descriptor::{calculate_delta, Descriptor, LogKey, LowWatermark};
use crate::core_log::store::{LogStore, StoreError, StoreResult};
use crate::core_log::sync::connection::ConnectionFactory;
use crate::core_log::sync::discovery::Discovery;
use crate::core_log::sync::endpoint::Command;
use crate::core_log::sync::errors::{SyncError, SyncResult};
use crate::telemetry::{Timer, TracedOperation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn, Instrument};
use url::Url;

/// Direction of a sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    #[default]
    None,
    Push,
    Pull,
    PushPull,
}

impl SyncMode {
    pub fn pushes(&self) -> bool {
        matches!(self, SyncMode::Push | SyncMode::PushPull)
    }

    pub fn pulls(&self) -> bool {
        matches!(self, SyncMode::Pull | SyncMode::PushPull)
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncMode::None => "none",
            SyncMode::Push => "push",
            SyncMode::Pull => "pull",
            SyncMode::PushPull => "pushpull",
        };
        f.write_str(name)
    }
}

impl FromStr for SyncMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(SyncMode::None),
            "push" => Ok(SyncMode::Push),
            "pull" => Ok(SyncMode::Pull),
            "pushpull" => Ok(SyncMode::PushPull),
            other => Err(SyncError::Configuration(format!("unknown sync mode '{}'", other))),
        }
    }
}

/// Settings of one sync task
#[derive(Debug, Clone)]
pub struct SyncEngineConfig {
    /// Name used in logs and spans
    pub name: String,
    /// Path prefix of the remote endpoint, e.g. "auditlog"
    pub endpoint: String,
    /// Restrict the sync to one target's logs
    pub target_id: Option<String>,
    pub data_mode: SyncMode,
    pub watermark_mode: SyncMode,
}

impl SyncEngineConfig {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            target_id: None,
            data_mode: SyncMode::PushPull,
            watermark_mode: SyncMode::None,
        }
    }
}

/// Records moved in each direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transfer {
    pub sent: usize,
    pub received: usize,
}

impl Transfer {
    fn merge(self, other: Transfer) -> Transfer {
        Transfer { sent: self.sent + other.sent, received: self.received + other.received }
    }
}

/// Outcome of one scheduled cycle
#[derive(Debug, Default)]
pub struct CycleReport {
    pub cycle_id: String,
    /// Another cycle of the same engine was still running
    pub skipped: bool,
    pub events: Transfer,
    pub watermarks: Transfer,
    pub errors: Vec<SyncError>,
}

impl CycleReport {
    pub fn is_success(&self) -> bool {
        !self.skipped && self.errors.is_empty()
    }
}

/// Synchronizes a local store with the endpoint found by discovery
pub struct SyncEngine {
    config: SyncEngineConfig,
    store: Arc<LogStore>,
    discovery: Arc<dyn Discovery>,
    connections: Arc<dyn ConnectionFactory>,
    in_flight: Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        config: SyncEngineConfig,
        store: Arc<LogStore>,
        discovery: Arc<dyn Discovery>,
        connections: Arc<dyn ConnectionFactory>,
    ) -> Self {
        Self { config, store, discovery, connections, in_flight: Mutex::new(()) }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &SyncEngineConfig {
        &self.config
    }

    /// Run watermark sync then data sync in the configured modes.
    ///
    /// Failures are logged and collected in the report. A call made while
    /// another cycle is in flight returns at once with `skipped` set.
    pub async fn run_cycle(&self) -> CycleReport {
        let Ok(_slot) = self.in_flight.try_lock() else {
            debug!(sync = %self.config.name, "previous cycle still running, skipping");
            return CycleReport { skipped: true, ..Default::default() };
        };

        let op = TracedOperation::for_subject("sync_cycle", &self.config.name);
        let timer = Timer::new("sync.cycle.duration_ms");
        metrics::counter!("sync.cycles.total").increment(1);

        let mut report = CycleReport { cycle_id: op.id().to_string(), ..Default::default() };
        let span = op.span().clone();

        async {
            let base = match self.discovery.discover() {
                Ok(base) => base,
                Err(e) => {
                    self.log_failure("discovery", &e);
                    report.errors.push(e);
                    return;
                }
            };

            match self.sync_watermarks(&base, self.config.watermark_mode).await {
                Ok(transfer) => report.watermarks = transfer,
                Err(e) => {
                    self.log_failure("watermark sync", &e);
                    report.errors.push(e);
                }
            }

            match self.sync_data(&base, self.config.data_mode).await {
                Ok(transfer) => report.events = transfer,
                Err(e) => {
                    self.log_failure("data sync", &e);
                    report.errors.push(e);
                }
            }
        }
        .instrument(span)
        .await;

        if !report.errors.is_empty() {
            metrics::counter!("sync.cycles.failed").increment(1);
        }
        timer.stop();
        let elapsed = op.complete();
        info!(
            sync = %self.config.name,
            cycle_id = %report.cycle_id,
            pushed = report.events.sent,
            pulled = report.events.received,
            failures = report.errors.len(),
            duration_ms = elapsed.as_millis() as u64,
            "sync cycle finished"
        );
        report
    }

    fn log_failure(&self, phase: &str, err: &SyncError) {
        let sync = self.config.name.as_str();
        match err {
            SyncError::Configuration(_) => error!(sync, phase, error = %err, "sync misconfigured"),
            SyncError::TransientNetwork(_) => warn!(sync, phase, error = %err, "remote unreachable, retrying next cycle"),
            SyncError::Protocol(_) => warn!(sync, phase, error = %err, "remote rejected sync"),
            SyncError::Store(StoreError::Busy { .. }) => debug!(sync, phase, error = %err, "log busy, retrying next cycle"),
            SyncError::Store(_) => error!(sync, phase, error = %err, "local store failure"),
        }
    }

    async fn sync_data(&self, base: &Url, mode: SyncMode) -> SyncResult<Transfer> {
        match mode {
            SyncMode::None => Ok(Transfer::default()),
            SyncMode::Push => self.push_to(base).await,
            SyncMode::Pull => self.pull_from(base).await,
            SyncMode::PushPull => self.push_pull_with(base).await,
        }
    }

    async fn sync_watermarks(&self, base: &Url, mode: SyncMode) -> SyncResult<Transfer> {
        match mode {
            SyncMode::None => Ok(Transfer::default()),
            SyncMode::Push => self.push_ids_to(base).await,
            SyncMode::Pull => self.pull_ids_from(base).await,
            SyncMode::PushPull => self.push_pull_ids_with(base).await,
        }
    }

    /// Send local events the remote is missing
    pub async fn push(&self) -> SyncResult<Transfer> {
        self.push_to(&self.discovery.discover()?).await
    }

    /// Fetch remote events missing locally
    pub async fn pull(&self) -> SyncResult<Transfer> {
        self.pull_from(&self.discovery.discover()?).await
    }

    pub async fn push_pull(&self) -> SyncResult<Transfer> {
        self.push_pull_with(&self.discovery.discover()?).await
    }

    /// Send local low watermarks
    pub async fn push_ids(&self) -> SyncResult<Transfer> {
        self.push_ids_to(&self.discovery.discover()?).await
    }

    /// Apply remote low watermarks locally
    pub async fn pull_ids(&self) -> SyncResult<Transfer> {
        self.pull_ids_from(&self.discovery.discover()?).await
    }

    pub async fn push_pull_ids(&self) -> SyncResult<Transfer> {
        self.push_pull_ids_with(&self.discovery.discover()?).await
    }

    async fn push_to(&self, base: &Url) -> SyncResult<Transfer> {
        let target = self.target_id().map(str::to_string);
        let local = self.with_store(move |store| store.get_descriptors(target.as_deref())).await?;
        let remote = self.remote_descriptors(base).await?;
        let remote_watermarks: HashMap<LogKey, u64> = self
            .remote_watermarks(base)
            .await?
            .into_iter()
            .map(|w| (LogKey::new(w.target_id, w.log_id), w.lowest_id))
            .collect();

        let mut sent = 0;
        for delta in calculate_delta(&local, &remote) {
            // Ids below the remote's watermark are gone there on purpose.
            let floor = remote_watermarks.get(&delta.key()).copied().unwrap_or(0);
            let missing = Descriptor::new(delta.target_id.clone(), delta.log_id, delta.range_set.at_or_above(floor));
            if missing.range_set.is_empty() {
                continue;
            }
            let events = {
                let missing = missing.clone();
                self.with_store(move |store| store.get(&missing)).await?
            };
            if events.is_empty() {
                continue;
            }

            // One failed send ends the whole push.
            self.request(base, Command::Send, &[], Some(codec::encode_events(&events))).await?;
            debug!(log = %missing.key(), range = %missing.range_set, count = events.len(), "pushed events");
            sent += events.len();
        }

        metrics::counter!("sync.events.pushed").increment(sent as u64);
        Ok(Transfer { sent, received: 0 })
    }

    async fn pull_from(&self, base: &Url) -> SyncResult<Transfer> {
        let remote = self.remote_descriptors(base).await?;
        let target = self.target_id().map(str::to_string);
        let local = self.with_store(move |store| store.get_descriptors(target.as_deref())).await?;

        let mut received = 0;
        for delta in calculate_delta(&remote, &local) {
            // Ids below our watermark are gone on purpose, not missing.
            let key = delta.key();
            let watermark = self
                .with_store(move |store| store.get_lowest_id(&key.target_id, key.log_id))
                .await?;
            let missing = delta.range_set.at_or_above(watermark);
            if missing.is_empty() {
                continue;
            }

            let log_id = delta.log_id.to_string();
            let range = missing.to_string();
            let params = [("tid", delta.target_id.as_str()), ("logid", log_id.as_str()), ("range", range.as_str())];
            let body = self.request(base, Command::Receive, &params, None).await?;

            let events = codec::decode_events(&body).map_err(|e| malformed(Command::Receive, e))?;
            let stored = self.with_store(move |store| store.put(&events)).await?;
            debug!(log = %delta.key(), range = %missing, count = stored, "pulled events");
            received += stored;
        }

        metrics::counter!("sync.events.pulled").increment(received as u64);
        Ok(Transfer { sent: 0, received })
    }

    /// Both directions; the pull runs even when the push failed
    async fn push_pull_with(&self, base: &Url) -> SyncResult<Transfer> {
        let pushed = self.push_to(base).await;
        let pulled = self.pull_from(base).await;
        Ok(pushed?.merge(pulled?))
    }

    async fn push_ids_to(&self, base: &Url) -> SyncResult<Transfer> {
        let target = self.target_id().map(str::to_string);
        let watermarks = self.with_store(move |store| store.get_watermarks(target.as_deref())).await?;
        if watermarks.is_empty() {
            return Ok(Transfer::default());
        }

        let body = codec::encode_lines(&watermarks, codec::encode_watermark);
        self.request(base, Command::SendIds, &[], Some(body)).await?;
        debug!(count = watermarks.len(), "pushed watermarks");
        Ok(Transfer { sent: watermarks.len(), received: 0 })
    }

    async fn pull_ids_from(&self, base: &Url) -> SyncResult<Transfer> {
        let target = self.target_id().map(str::to_string);
        let watermarks: Vec<LowWatermark> = self
            .remote_watermarks(base)
            .await?
            .into_iter()
            .filter(|w| target.as_deref().map_or(true, |t| t == w.target_id))
            .collect();

        let applied = self
            .with_store(move |store| {
                let mut applied: usize = 0;
                for watermark in &watermarks {
                    if store.set_lowest_id(&watermark.target_id, watermark.log_id, watermark.lowest_id)? {
                        applied += 1;
                    }
                }
                Ok(applied)
            })
            .await?;

        metrics::counter!("sync.watermarks.applied").increment(applied as u64);
        Ok(Transfer { sent: 0, received: applied })
    }

    async fn push_pull_ids_with(&self, base: &Url) -> SyncResult<Transfer> {
        let pushed = self.push_ids_to(base).await;
        let pulled = self.pull_ids_from(base).await;
        Ok(pushed?.merge(pulled?))
    }

    async fn remote_descriptors(&self, base: &Url) -> SyncResult<Vec<Descriptor>> {
        let params = self.target_param();
        let body = self.request(base, Command::Query, &params, None).await?;
        codec::decode_lines(&body, codec::decode_descriptor).map_err(|e| malformed(Command::Query, e))
    }

    async fn remote_watermarks(&self, base: &Url) -> SyncResult<Vec<LowWatermark>> {
        let params = self.target_param();
        let body = self.request(base, Command::ReceiveIds, &params, None).await?;
        codec::decode_lines(&body, codec::decode_watermark).map_err(|e| malformed(Command::ReceiveIds, e))
    }

    /// Run store work on the blocking pool; the store does file I/O and
    /// may wait on a log lock.
    async fn with_store<T, F>(&self, work: F) -> SyncResult<T>
    where
        F: FnOnce(&LogStore) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        let result = tokio::task::spawn_blocking(move || work(&store))
            .await
            .map_err(|e| StoreError::Storage(format!("store task failed: {}", e)))?;
        Ok(result?)
    }

    fn target_id(&self) -> Option<&str> {
        self.config.target_id.as_deref()
    }

    fn target_param(&self) -> Vec<(&str, &str)> {
        self.target_id().map(|t| vec![("tid", t)]).unwrap_or_default()
    }

    /// `{base}/{endpoint}/{command}?{params}`
    pub fn command_url(&self, base: &Url, command: Command, params: &[(&str, &str)]) -> SyncResult<Url> {
        let mut url = base.clone();
        url.set_query(None);
        url.path_segments_mut()
            .map_err(|_| SyncError::Configuration(format!("'{}' cannot be a base URL", base)))?
            .pop_if_empty()
            .extend(self.config.endpoint.split('/').filter(|s| !s.is_empty()))
            .push(command.as_str());

        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        Ok(url)
    }

    async fn request(
        &self,
        base: &Url,
        command: Command,
        params: &[(&str, &str)],
        body: Option<String>,
    ) -> SyncResult<String> {
        let url = self.command_url(base, command, params)?;
        let connection = self.connections.create_connection(&url)?;
        let response = match body {
            Some(body) => connection.post(body).await?,
            None => connection.get().await?,
        };

        if !response.is_success() {
            return Err(SyncError::Protocol(format!(
                "{} answered {}: {}",
                command,
                response.status,
                response.body.trim()
            )));
        }
        Ok(response.body)
    }
}

fn malformed(command: Command, err: codec::CodecError) -> SyncError {
    SyncError::Protocol(format!("malformed {} response: {}", command, err))
}
