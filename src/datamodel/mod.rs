pub mod labels;
pub mod metric_definition;
pub mod metric_type;
pub mod observation;
pub mod persisted_metric;
pub mod sanitize;
pub mod series_key;

pub use labels::{MetricLabels, MetricLabelsExt, label_value_from_json};
pub use metric_definition::MetricDefinition;
pub use metric_type::MetricType;
pub use observation::{GaugeOperation, Observation};
pub use persisted_metric::{MetricValueRow, PersistedMetric};
pub use series_key::{SeriesKey, resolve_key};
