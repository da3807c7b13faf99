//! Per-series state and the update algorithm of every metric type.

use super::{EngineError, EngineSettings, summary::SummaryState};
use crate::datamodel::{GaugeOperation, MetricLabels, MetricType};

/// Prometheus client default buckets.
pub const DEFAULT_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

#[derive(Debug, Clone, PartialEq)]
pub struct HistogramState {
    pub boundaries: Vec<f64>,
    /// Cumulative: `counts[i]` includes every lower bucket.
    pub counts: Vec<u64>,
    pub sum: f64,
    pub count: u64,
}

impl HistogramState {
    pub fn new(boundaries: Vec<f64>) -> Self {
        let counts = vec![0; boundaries.len()];
        Self {
            boundaries,
            counts,
            sum: 0.0,
            count: 0,
        }
    }

    pub fn observe(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        for (boundary, count) in self.boundaries.iter().zip(self.counts.iter_mut()) {
            if value <= *boundary {
                *count += 1;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SeriesState {
    Counter(f64),
    Gauge(f64),
    Histogram(HistogramState),
    Summary(SummaryState),
}

impl SeriesState {
    pub fn metric_type(&self) -> MetricType {
        match self {
            SeriesState::Counter(_) => MetricType::Counter,
            SeriesState::Gauge(_) => MetricType::Gauge,
            SeriesState::Histogram(_) => MetricType::Histogram,
            SeriesState::Summary(_) => MetricType::Summary,
        }
    }
}

/// Layout of a new series. Buckets and quantiles only matter for
/// histograms and summaries.
#[derive(Debug, Clone, Copy)]
pub struct SeriesShape<'a> {
    pub metric_type: MetricType,
    pub buckets: Option<&'a [f64]>,
    pub quantiles: Option<&'a [f64]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: String,
    pub labels: MetricLabels,
    pub state: SeriesState,
    pub last_updated_ms: u64,
}

impl Series {
    pub fn new(
        name: String,
        labels: MetricLabels,
        shape: SeriesShape<'_>,
        settings: &EngineSettings,
        now_ms: u64,
    ) -> Self {
        let state = match shape.metric_type {
            MetricType::Counter => SeriesState::Counter(0.0),
            MetricType::Gauge => SeriesState::Gauge(0.0),
            MetricType::Histogram => SeriesState::Histogram(HistogramState::new(
                shape.buckets.unwrap_or(&DEFAULT_BUCKETS).to_vec(),
            )),
            MetricType::Summary => SeriesState::Summary(SummaryState::new(
                shape
                    .quantiles
                    .unwrap_or(&super::summary::DEFAULT_QUANTILES)
                    .to_vec(),
                settings.summary_buffer_size,
            )),
        };
        Self {
            name,
            labels,
            state,
            last_updated_ms: now_ms,
        }
    }

    pub fn metric_type(&self) -> MetricType {
        self.state.metric_type()
    }

    /// Applies one observation. The state is left untouched on error.
    ///
    /// Returns the new absolute value for counters and gauges.
    pub fn apply(
        &mut self,
        value: f64,
        operation: Option<GaugeOperation>,
        settings: &EngineSettings,
    ) -> Result<Option<f64>, EngineError> {
        match &mut self.state {
            SeriesState::Counter(current) => {
                if value < 0.0 {
                    return Err(EngineError::InvalidCounterDelta(value));
                }
                match operation {
                    None | Some(GaugeOperation::Increment) => {}
                    Some(GaugeOperation::Set) | Some(GaugeOperation::Decrement) => {
                        return Err(EngineError::InvalidCounterDelta(value));
                    }
                }
                *current += value;
                Ok(Some(*current))
            }
            SeriesState::Gauge(current) => {
                let operation = operation.unwrap_or_else(|| GaugeOperation::infer(value));
                let mut next = match operation {
                    GaugeOperation::Set => value,
                    GaugeOperation::Increment => *current + value.abs(),
                    GaugeOperation::Decrement => *current - value.abs(),
                };
                if settings.clamp_gauges_at_zero && next < 0.0 {
                    next = 0.0;
                }
                *current = next;
                Ok(Some(next))
            }
            SeriesState::Histogram(histogram) => {
                histogram.observe(value);
                Ok(None)
            }
            SeriesState::Summary(summary) => {
                summary.observe(value);
                Ok(None)
            }
        }
    }

    /// Sets a counter or gauge to an absolute value, used when restoring.
    pub fn seed(&mut self, value: f64) -> Result<(), EngineError> {
        match &mut self.state {
            SeriesState::Counter(current) => {
                if value < 0.0 {
                    return Err(EngineError::restore_row(format!(
                        "negative counter value {}",
                        value
                    )));
                }
                *current = value;
                Ok(())
            }
            SeriesState::Gauge(current) => {
                *current = value;
                Ok(())
            }
            other => Err(EngineError::restore_row(format!(
                "{} series cannot be restored from a single value",
                other.metric_type()
            ))),
        }
    }
}
