//! Streaming quantile estimation for summaries.
//!
//! Observations are buffered and merged into a t-digest in batches. The
//! digest keeps a bounded number of centroids, so memory stays constant
//! whatever the observation count.

use tdigest::TDigest;

pub const DEFAULT_QUANTILES: [f64; 3] = [0.5, 0.9, 0.99];

/// Centroids kept by each digest.
pub const DIGEST_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryState {
    quantiles: Vec<f64>,
    digest: TDigest,
    /// Observations not merged into `digest` yet.
    buffer: Vec<f64>,
    buffer_size: usize,
    pub sum: f64,
    pub count: u64,
}

impl SummaryState {
    pub fn new(quantiles: Vec<f64>, buffer_size: usize) -> Self {
        let buffer_size = buffer_size.max(1);
        Self {
            quantiles,
            digest: TDigest::new_with_size(DIGEST_SIZE),
            buffer: Vec::with_capacity(buffer_size.min(64)),
            buffer_size,
            sum: 0.0,
            count: 0,
        }
    }

    pub fn observe(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.buffer.push(value);

        if self.buffer.len() >= self.buffer_size {
            let values = std::mem::take(&mut self.buffer);
            self.digest = self.digest.merge_unsorted(values);
        }
    }

    /// `(quantile, estimate)` pairs in configuration order. Estimates are
    /// `NaN` before the first observation.
    pub fn quantile_values(&self) -> Vec<(f64, f64)> {
        let digest = if self.buffer.is_empty() {
            self.digest.clone()
        } else {
            self.digest.merge_unsorted(self.buffer.clone())
        };

        self.quantiles
            .iter()
            .map(|&q| {
                let estimate = if digest.is_empty() {
                    f64::NAN
                } else {
                    digest.estimate_quantile(q)
                };
                (q, estimate)
            })
            .collect()
    }
}
