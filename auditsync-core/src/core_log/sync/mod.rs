//! Log synchronization over HTTP
//!
//! Client side: [`SyncEngine`] driven by [`SyncScheduler`]. Server side:
//! [`LogEndpoint`] served by the axum router in [`server`].

pub mod connection;
pub mod discovery;
pub mod endpoint;
pub mod engine;
pub mod errors;
pub mod scheduler;
pub mod server;

pub use connection::{ConnectionFactory, HttpConnection, HttpResponse, ReqwestConnectionFactory};
pub use discovery::{Discovery, StaticDiscovery};
pub use endpoint::{Command, EndpointError, LogEndpoint};
pub use engine::{CycleReport, SyncEngine, SyncEngineConfig, SyncMode, Transfer};
pub use errors::{SyncError, SyncResult};
pub use scheduler::SyncScheduler;
pub use server::{build_router, SyncServer};
