//! Discovery of the remote sync endpoint

use crate::core_log::sync::errors::{SyncError, SyncResult};
use url::Url;

/// Locates the current remote endpoint. The answer may change between cycles.
pub trait Discovery: Send + Sync {
    fn discover(&self) -> SyncResult<Url>;
}

/// Discovery from a fixed, configured URL.
///
/// The URL is parsed on every call so a malformed value surfaces as a
/// configuration error of the cycle rather than at startup.
#[derive(Debug, Clone)]
pub struct StaticDiscovery {
    server_url: String,
}

impl StaticDiscovery {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self { server_url: server_url.into() }
    }
}

impl Discovery for StaticDiscovery {
    fn discover(&self) -> SyncResult<Url> {
        if self.server_url.trim().is_empty() {
            return Err(SyncError::Configuration("no server URL configured".to_string()));
        }
        Ok(Url::parse(self.server_url.trim())?)
    }
}
