//! Logging subsystem for AuditSync
//!
//! A `tracing` subscriber with an `EnvFilter` (`RUST_LOG` wins over the
//! configured level) and either human readable or JSON output.

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod error;
mod level;

pub use error::LoggingError;
pub use level::LogLevel;

/// Configuration for the logging subsystem
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// The minimum log level to display
    pub level: LogLevel,
    /// Whether to include target module information
    pub with_target: bool,
    /// Whether to use JSON formatting
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            with_target: true,
            json_format: false,
        }
    }
}

impl LogConfig {
    /// Create a new LogConfig with specified level
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Set whether to include target information
    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    /// Set whether to use JSON formatting
    pub fn json_format(mut self, enabled: bool) -> Self {
        self.json_format = enabled;
        self
    }
}

impl TryFrom<&LoggingConfig> for LogConfig {
    type Error = LoggingError;

    fn try_from(config: &LoggingConfig) -> Result<Self, Self::Error> {
        Ok(LogConfig::new(config.level.parse()?)
            .with_target(config.with_target)
            .json_format(config.json_format))
    }
}

/// Initialize the logging subsystem with default configuration
pub fn init_logging() -> Result<(), LoggingError> {
    init_logging_with_config(LogConfig::default())
}

/// Initialize the logging subsystem with custom configuration
///
/// # Example
/// ```
/// use auditsync_core::logging::{init_logging_with_config, LogConfig, LogLevel};
///
/// let config = LogConfig::new(LogLevel::Debug).with_target(false);
///
/// init_logging_with_config(config).expect("Failed to initialize logging");
/// ```
pub fn init_logging_with_config(config: LogConfig) -> Result<(), LoggingError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let fmt_layer = fmt::layer().with_target(config.with_target);

    if config.json_format {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer.json())
            .try_init()
            .map_err(|e| LoggingError::InitializationFailed(e.to_string()))?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| LoggingError::InitializationFailed(e.to_string()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_builder() {
        let config = LogConfig::new(LogLevel::Debug).with_target(false).json_format(true);

        assert_eq!(config.level, LogLevel::Debug);
        assert!(!config.with_target);
        assert!(config.json_format);
    }

    #[test]
    fn test_from_logging_section() {
        let section = LoggingConfig {
            level: "warning".to_string(),
            json_format: true,
            with_target: false,
        };
        let config = LogConfig::try_from(&section).unwrap();
        assert_eq!(config.level, LogLevel::Warn);
        assert!(config.json_format);

        let section = LoggingConfig { level: "loud".to_string(), ..section };
        assert!(LogConfig::try_from(&section).is_err());
    }

    #[test]
    fn test_second_init_fails() {
        // Whichever call comes second in this process must report the error.
        let first = init_logging_with_config(LogConfig::new(LogLevel::Error));
        let second = init_logging();
        assert!(first.is_err() || second.is_err());
    }
}
