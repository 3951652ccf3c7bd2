//! Test utilities and helpers for AuditSync
//!
//! Fixtures, an in-process sync network and async helpers shared by unit and
//! integration tests.

pub mod async_helpers;
pub mod fixtures;
pub mod loopback;

pub use async_helpers::*;
pub use fixtures::*;
pub use loopback::LoopbackConnectionFactory;
