pub mod prometheus;

pub use prometheus::PrometheusTextConverter;
