/*
    core_log - Audit-log replication

    The replication core for remote, intermittently connected targets:
    - RangeSet algebra over event ids
    - Descriptors and delta computation
    - Line-oriented text codec shared by disk and wire
    - Persistent per-(target, log) event store with low watermarks
    - Sync engine reconciling two stores over HTTP
*/

pub mod codec;
pub mod descriptor;
pub mod event;
pub mod range_set;
pub mod store;
pub mod sync;

// Re-export commonly used types
pub use codec::{CodecError, CodecResult};
pub use descriptor::{calculate_delta, Descriptor, LogKey, LowWatermark};
pub use event::Event;
pub use range_set::{Range, RangeParseError, RangeSet};
pub use store::{LogStore, LogStoreConfig, StoreError, StoreResult};
pub use sync::{SyncEngine, SyncError, SyncMode, SyncResult};
