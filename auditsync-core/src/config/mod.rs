//! Configuration management for AuditSync
//!
//! Configuration is read from a TOML file or from `AUDITSYNC_*` environment
//! variables, and validated before use.

use crate::core_log::store::LogStoreConfig;
use crate::core_log::sync::{SyncEngineConfig, SyncMode};
use crate::core_repo::RepositoryConfig;
use crate::logging::LogLevel;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

const ENV_PREFIX: &str = "AUDITSYNC_";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,

    /// Local event store
    pub store: LogStoreConfig,

    /// Sync endpoint served to remote peers
    pub server: ServerConfig,

    /// Scheduled sync tasks
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sync: Vec<SyncTaskConfig>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub repositories: Vec<RepositoryConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,

    /// Emit JSON lines instead of human readable output
    pub json_format: bool,

    pub with_target: bool,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,

    pub bind_address: SocketAddr,

    /// Path prefix of the sync commands, e.g. "auditlog"
    pub endpoint: String,

    /// How long shutdown waits for running components
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// One scheduled sync with a remote endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncTaskConfig {
    pub name: String,

    /// Base URL of the remote, parsed on every cycle
    pub server_url: String,

    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub target_id: Option<String>,

    #[serde(default = "default_data_mode")]
    pub data_mode: SyncMode,

    #[serde(default)]
    pub watermark_mode: SyncMode,

    #[serde(with = "humantime_serde", default = "default_interval")]
    pub interval: Duration,

    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_read_timeout")]
    pub read_timeout: Duration,
}

fn default_endpoint() -> String {
    "auditlog".to_string()
}

fn default_data_mode() -> SyncMode {
    SyncMode::PushPull
}

fn default_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(30)
}

impl SyncTaskConfig {
    pub fn new(name: impl Into<String>, server_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            server_url: server_url.into(),
            endpoint: default_endpoint(),
            target_id: None,
            data_mode: default_data_mode(),
            watermark_mode: SyncMode::None,
            interval: default_interval(),
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
        }
    }

    pub fn engine_config(&self) -> SyncEngineConfig {
        SyncEngineConfig {
            name: self.name.clone(),
            endpoint: self.endpoint.clone(),
            target_id: self.target_id.clone(),
            data_mode: self.data_mode,
            watermark_mode: self.watermark_mode,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_target: true,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            endpoint: default_endpoint(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overridden by `lookup("AUDITSYNC_…")`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));
        let mut config = Self::default();

        if let Some(level) = var("LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(json) = var("LOG_JSON") {
            config.logging.json_format = parse_value("LOG_JSON", &json)?;
        }

        if let Some(data_dir) = var("STORE_DATA_DIR") {
            config.store.data_dir = PathBuf::from(data_dir);
        }
        if let Some(name) = var("STORE_NAME") {
            config.store.name = name;
        }
        if let Some(max_events) = var("STORE_MAX_EVENTS") {
            config.store.max_events = parse_value("STORE_MAX_EVENTS", &max_events)?;
        }

        if let Some(enabled) = var("SERVER_ENABLED") {
            config.server.enabled = parse_value("SERVER_ENABLED", &enabled)?;
        }
        if let Some(addr) = var("SERVER_BIND_ADDRESS") {
            config.server.bind_address = parse_value("SERVER_BIND_ADDRESS", &addr)?;
        }
        if let Some(endpoint) = var("SERVER_ENDPOINT") {
            config.server.endpoint = endpoint;
        }

        // A single sync task can be described entirely through the environment.
        if let Some(server_url) = var("SYNC_SERVER_URL") {
            let mut task = SyncTaskConfig::new("default", server_url);
            if let Some(endpoint) = var("SYNC_ENDPOINT") {
                task.endpoint = endpoint;
            }
            task.target_id = var("SYNC_TARGET_ID");
            if let Some(mode) = var("SYNC_DATA_MODE") {
                task.data_mode = parse_value("SYNC_DATA_MODE", &mode)?;
            }
            if let Some(mode) = var("SYNC_WATERMARK_MODE") {
                task.watermark_mode = parse_value("SYNC_WATERMARK_MODE", &mode)?;
            }
            if let Some(interval) = var("SYNC_INTERVAL") {
                task.interval = humantime_serde::re::humantime::parse_duration(&interval)
                    .map_err(|e| ConfigError::InvalidValue(format!("Invalid SYNC_INTERVAL: {}", e)))?;
            }
            config.sync.push(task);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        LogLevel::from_str(&self.logging.level)
            .map_err(|_| ConfigError::ValidationFailed(format!("Invalid log level: {}", self.logging.level)))?;

        if self.store.lock_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "store.lock_attempts must be greater than 0".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for task in &self.sync {
            if !names.insert(task.name.as_str()) {
                return Err(ConfigError::ValidationFailed(format!("Duplicate sync name: {}", task.name)));
            }
            if task.server_url.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(format!("Sync {} has no server_url", task.name)));
            }
            if task.endpoint.trim_matches('/').is_empty() {
                return Err(ConfigError::ValidationFailed(format!("Sync {} has no endpoint", task.name)));
            }
            if task.interval.is_zero() {
                return Err(ConfigError::ValidationFailed(format!(
                    "Sync {} interval must be greater than 0",
                    task.name
                )));
            }
        }

        let mut names = HashSet::new();
        for repository in &self.repositories {
            if !names.insert(repository.name.as_str()) {
                return Err(ConfigError::ValidationFailed(format!(
                    "Duplicate repository name: {}",
                    repository.name
                )));
            }
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;

        Ok(())
    }
}

fn parse_value<T>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| ConfigError::InvalidValue(format!("Invalid {}{}: {}", ENV_PREFIX, name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.sync.is_empty());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.store.lock_attempts = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.sync.push(SyncTaskConfig::new("a", ""));
        assert!(config.validate().is_err());

        config = Config::default();
        let mut task = SyncTaskConfig::new("a", "http://server/");
        task.interval = Duration::ZERO;
        config.sync.push(task);
        assert!(config.validate().is_err());

        config = Config::default();
        config.sync.push(SyncTaskConfig::new("a", "http://server/"));
        config.sync.push(SyncTaskConfig::new("a", "http://other/"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_url_passes_validation() {
        let mut config = Config::default();
        config.sync.push(SyncTaskConfig::new("a", "not a url"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_log_level_validation() {
        let mut config = Config::default();

        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "warning".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("auditsync.toml");
        std::fs::write(
            &path,
            r#"
[logging]
level = "debug"

[store]
data_dir = "/var/lib/auditsync"
name = "auditlog"
max_events = 1000
lock_attempts = 5
lock_backoff = "20ms"

[server]
enabled = true
bind_address = "0.0.0.0:9000"

[[sync]]
name = "upstream"
server_url = "http://server:8080/"
watermark_mode = "pull"
interval = "30s"

[[repositories]]
name = "deployment"
dir = "/var/lib/auditsync/repo"
master = true
retention_limit = 10
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.store.max_events, 1000);
        assert_eq!(config.store.lock_backoff, Duration::from_millis(20));
        assert!(config.server.enabled);
        assert_eq!(config.server.endpoint, "auditlog");

        let task = &config.sync[0];
        assert_eq!(task.data_mode, SyncMode::PushPull);
        assert_eq!(task.watermark_mode, SyncMode::Pull);
        assert_eq!(task.interval, Duration::from_secs(30));
        assert_eq!(task.engine_config().endpoint, "auditlog");

        assert_eq!(config.repositories[0].retention_limit, 10);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("saved.toml");

        let mut config = Config::default();
        config.sync.push(SyncTaskConfig::new("upstream", "http://server/"));
        config.save_to_file(&path).unwrap();

        let reloaded = Config::from_file(&path).unwrap();
        assert_eq!(reloaded.sync[0].name, "upstream");
        assert_eq!(reloaded.server.bind_address, config.server.bind_address);
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("AUDITSYNC_LOG_LEVEL", "debug"),
            ("AUDITSYNC_STORE_MAX_EVENTS", "50"),
            ("AUDITSYNC_SYNC_SERVER_URL", "http://server/"),
            ("AUDITSYNC_SYNC_DATA_MODE", "push"),
            ("AUDITSYNC_SYNC_INTERVAL", "5s"),
        ]
        .into_iter()
        .collect();

        let config = Config::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.store.max_events, 50);
        assert_eq!(config.sync.len(), 1);
        assert_eq!(config.sync[0].data_mode, SyncMode::Push);
        assert_eq!(config.sync[0].interval, Duration::from_secs(5));

        let bad = Config::from_lookup(|key| (key == "AUDITSYNC_STORE_MAX_EVENTS").then(|| "many".to_string()));
        assert!(matches!(bad, Err(ConfigError::InvalidValue(_))));
    }
}
