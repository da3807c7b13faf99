pub mod error;
#[cfg(feature = "postgres")]
pub mod postgresql;
#[cfg(feature = "sqlite")]
pub mod sqlite;
#[allow(clippy::module_inception)]
pub mod storage;
pub mod storage_factory;

pub use error::StorageError;
pub use storage::StorageInstance;

/// Rows written per statement when upserting.
pub const UPSERT_CHUNK_SIZE: usize = 500;
