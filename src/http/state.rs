use std::sync::Arc;

use crate::engine::AggregationStore;
use crate::persistence::PersistenceBatcher;
use crate::storage::StorageInstance;

#[derive(Clone, Debug)]
pub struct HttpServerState {
    pub name: Arc<String>,
    pub store: Arc<AggregationStore>,
    /// Absent when persistence is disabled.
    pub batcher: Option<Arc<PersistenceBatcher>>,
    pub storage: Arc<dyn StorageInstance>,
}
