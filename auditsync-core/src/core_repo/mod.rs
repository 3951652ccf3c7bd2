//! Versioned repositories for whole-document history

pub mod errors;
pub mod repository;

pub use errors::{RepositoryError, RepositoryResult};
pub use repository::{RepositoryConfig, VersionedRepository};
