/*
    Store subsystem - Persistence layer for audit logs
*/

pub mod errors;
pub mod lock_table;
pub mod log_file;
pub mod log_store;
pub mod notifier;

pub use errors::*;
pub use lock_table::{LockTable, LogGuard};
pub use log_file::LogFile;
pub use log_store::{LogStore, LogStoreConfig};
pub use notifier::{BroadcastNotifier, EventNotice, EventNotifier, NoopNotifier};
