use std::sync::Arc;

use anyhow::Result;

use super::{StorageError, StorageInstance};

#[cfg(feature = "postgres")]
use super::postgresql::PostgresStorage;

#[cfg(feature = "sqlite")]
use super::sqlite::SqliteStorage;

pub async fn create_storage_from_connection_string(
    connection_string: &str,
) -> Result<Arc<dyn StorageInstance>> {
    Ok(match connection_string {
        #[cfg(feature = "postgres")]
        s if s.starts_with("postgres:") || s.starts_with("postgresql:") => {
            Arc::new(PostgresStorage::connect(s).await?)
        }

        #[cfg(feature = "sqlite")]
        s if s.starts_with("sqlite:") => Arc::new(SqliteStorage::connect(s).await?),

        // Provide helpful error messages for disabled backends
        #[cfg(not(feature = "postgres"))]
        s if s.starts_with("postgres:") || s.starts_with("postgresql:") => {
            return Err(StorageError::Configuration(
                "PostgreSQL storage backend is not enabled. Enable with --features postgres"
                    .to_string(),
            )
            .into());
        }

        #[cfg(not(feature = "sqlite"))]
        s if s.starts_with("sqlite:") => {
            return Err(StorageError::Configuration(
                "SQLite storage backend is not enabled. Enable with --features sqlite".to_string(),
            )
            .into());
        }

        _ => {
            return Err(StorageError::Configuration(format!(
                "Unsupported storage type: {}",
                connection_string
            ))
            .into());
        }
    })
}
