use thiserror::Error;

/// Storage-specific errors that can occur during database operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database connection or query execution error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Unsupported or disabled backend
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Generic storage operation error with context
    #[error("Storage operation failed: {operation} - {details}")]
    OperationFailed { operation: String, details: String },
}

impl StorageError {
    pub fn operation_failed(operation: &str, details: impl ToString) -> Self {
        StorageError::OperationFailed {
            operation: operation.to_string(),
            details: details.to_string(),
        }
    }
}
