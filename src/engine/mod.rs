pub mod clock;
pub mod error;
pub mod eviction;
pub mod periodic;
pub mod registry;
pub mod settings;
pub mod state;
pub mod store;
pub mod summary;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::EngineError;
pub use eviction::EvictionSweeper;
pub use periodic::{PeriodicTask, join_tasks};
pub use registry::{ANY_TENANT, MetricConfigRegistry, MetricTypeResolver, NoMetricConfig};
pub use settings::EngineSettings;
pub use store::{
    AggregationStore, AppliedResult, BatchOutcome, ItemOutcome, SampleSnapshot, SeriesSnapshot,
    TenantStats,
};
