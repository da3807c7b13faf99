use thiserror::Error;

/// Errors raised by the aggregation engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Bad name, value or label shape. Nothing was mutated.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Counters only accept non-negative deltas.
    #[error("Invalid counter delta: {0}")]
    InvalidCounterDelta(f64),

    /// The backing store could not be reached during a flush.
    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    /// A persisted row could not be replayed at startup.
    #[error("Restore row error: {0}")]
    RestoreRow(String),
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation(message.into())
    }

    pub fn restore_row(message: impl Into<String>) -> Self {
        EngineError::RestoreRow(message.into())
    }
}
