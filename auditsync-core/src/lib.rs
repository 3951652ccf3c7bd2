//! AuditSync core library
//!
//! Replication of append-only audit logs between intermittently connected
//! targets and a central server, plus versioned whole-document repositories.

pub mod config;
pub mod core_log;
pub mod core_repo;
pub mod logging;
pub mod shutdown;
pub mod telemetry;
pub mod test_utils;

pub use config::Config;
pub use core_log::{Event, LogStore, RangeSet, SyncEngine, SyncMode};
pub use logging::{init_logging, LogLevel};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let _ = LogLevel::Info;
        let _ = SyncMode::PushPull;
        assert!(RangeSet::new().is_empty());
    }
}
