pub mod batcher;
pub mod restore;

use std::fmt::Debug;

use crate::datamodel::PersistedMetric;

pub use batcher::PersistenceBatcher;
pub use restore::{RestoreReport, decode_row, restore_from_storage};

/// Receives the absolute value of every successful counter or gauge update.
///
/// Called while the series is locked: implementations must not block.
pub trait PersistenceSink: Send + Sync + Debug {
    fn enqueue(&self, record: PersistedMetric);
}
