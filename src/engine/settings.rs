use anyhow::{Result, bail};
use std::time::Duration;

/// Values the engine consumes. Built from [`crate::config::PromHubConfig`]
/// in production and directly in tests.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub metric_ttl: Duration,
    pub cleanup_interval: Duration,
    pub flush_interval: Duration,
    pub flush_timeout: Duration,
    pub max_flush_retries: u32,
    pub max_label_count: usize,
    pub max_metric_name_length: usize,
    pub clamp_gauges_at_zero: bool,
    pub summary_buffer_size: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            metric_ttl: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(60),
            flush_interval: Duration::from_secs(10),
            flush_timeout: Duration::from_secs(5),
            max_flush_retries: 5,
            max_label_count: 20,
            max_metric_name_length: 200,
            clamp_gauges_at_zero: true,
            summary_buffer_size: 128,
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<()> {
        if self.cleanup_interval.is_zero() {
            bail!("cleanup interval must be greater than zero");
        }
        if self.flush_interval.is_zero() {
            bail!("flush interval must be greater than zero");
        }
        if self.flush_timeout.is_zero() {
            bail!("flush timeout must be greater than zero");
        }
        if self.max_flush_retries == 0 {
            bail!("max flush retries must be at least 1");
        }
        if self.max_metric_name_length == 0 {
            bail!("max metric name length must be greater than zero");
        }
        if self.summary_buffer_size == 0 {
            bail!("summary buffer size must be greater than zero");
        }
        Ok(())
    }
}
