//! In-process network for sync tests
//!
//! `LoopbackConnectionFactory` routes every request straight into a
//! `LogEndpoint` over a second store and counts requests per command.

use crate::core_log::store::LogStore;
use crate::core_log::sync::connection::{ConnectionFactory, HttpConnection, HttpResponse};
use crate::core_log::sync::endpoint::{Command, LogEndpoint};
use crate::core_log::sync::errors::{SyncError, SyncResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use url::Url;

#[derive(Default)]
struct Shared {
    calls: Mutex<HashMap<Command, usize>>,
    failures: Mutex<HashMap<Command, u16>>,
    offline: AtomicBool,
}

impl Shared {
    fn record(&self, command: Command) {
        *self.calls.lock().unwrap_or_else(PoisonError::into_inner).entry(command).or_default() += 1;
    }

    fn failure(&self, command: Command) -> Option<u16> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner).get(&command).copied()
    }
}

/// Connection factory answering from an in-process endpoint
pub struct LoopbackConnectionFactory {
    endpoint: LogEndpoint,
    shared: Arc<Shared>,
}

impl LoopbackConnectionFactory {
    pub fn new(remote: Arc<LogStore>) -> Self {
        Self { endpoint: LogEndpoint::new(remote), shared: Arc::new(Shared::default()) }
    }

    /// Requests made for `command`, failed ones included
    pub fn calls(&self, command: Command) -> usize {
        self.shared.calls.lock().unwrap_or_else(PoisonError::into_inner).get(&command).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.shared.calls.lock().unwrap_or_else(PoisonError::into_inner).values().sum()
    }

    /// Requests that move events or watermarks
    pub fn transfer_calls(&self) -> usize {
        self.calls(Command::Send) + self.calls(Command::Receive) + self.calls(Command::SendIds)
    }

    pub fn reset_calls(&self) {
        self.shared.calls.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Answer every `command` request with `status`
    pub fn fail_command(&self, command: Command, status: u16) {
        self.shared.failures.lock().unwrap_or_else(PoisonError::into_inner).insert(command, status);
    }

    /// While offline, connecting fails as if the remote refused it
    pub fn set_offline(&self, offline: bool) {
        self.shared.offline.store(offline, Ordering::SeqCst);
    }
}

impl ConnectionFactory for LoopbackConnectionFactory {
    fn create_connection(&self, url: &Url) -> SyncResult<Box<dyn HttpConnection>> {
        if self.shared.offline.load(Ordering::SeqCst) {
            return Err(SyncError::TransientNetwork(format!("connection refused: {}", url)));
        }

        let command = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default()
            .parse::<Command>()
            .map_err(|e| SyncError::Protocol(e.to_string()))?;
        let params = url.query_pairs().into_owned().collect();

        Ok(Box::new(LoopbackConnection {
            endpoint: self.endpoint.clone(),
            shared: self.shared.clone(),
            command,
            params,
        }))
    }
}

struct LoopbackConnection {
    endpoint: LogEndpoint,
    shared: Arc<Shared>,
    command: Command,
    params: HashMap<String, String>,
}

impl LoopbackConnection {
    fn answer(&self, body: &str) -> HttpResponse {
        self.shared.record(self.command);
        match self.shared.failure(self.command) {
            Some(status) => HttpResponse::new(status, "injected failure"),
            None => self.endpoint.dispatch(self.command, &self.params, body),
        }
    }
}

#[async_trait]
impl HttpConnection for LoopbackConnection {
    async fn get(&self) -> SyncResult<HttpResponse> {
        Ok(self.answer(""))
    }

    async fn post(&self, body: String) -> SyncResult<HttpResponse> {
        Ok(self.answer(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fixtures::{events, store_in};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_routes_and_counts() {
        let dir = tempdir().unwrap();
        let remote = store_in(dir.path());
        remote.put(&events("t", 1, &[1, 2])).unwrap();
        let network = LoopbackConnectionFactory::new(remote);

        let url = Url::parse("http://remote/auditlog/query?tid=t").unwrap();
        let response = network.create_connection(&url).unwrap().get().await.unwrap();
        assert_eq!(response.body, "t,1,1-2\n");
        assert_eq!(network.calls(Command::Query), 1);
        assert_eq!(network.transfer_calls(), 0);

        network.reset_calls();
        assert_eq!(network.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let dir = tempdir().unwrap();
        let network = LoopbackConnectionFactory::new(store_in(dir.path()));
        let url = Url::parse("http://remote/auditlog/send").unwrap();

        network.fail_command(Command::Send, 503);
        let response = network.create_connection(&url).unwrap().post(String::new()).await.unwrap();
        assert_eq!(response.status, 503);

        network.set_offline(true);
        assert!(matches!(network.create_connection(&url), Err(SyncError::TransientNetwork(_))));
    }
}
