use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;

use super::{MetricLabels, MetricType};

/// How a gauge observation moves the current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum GaugeOperation {
    Set,
    #[serde(alias = "inc")]
    Increment,
    #[serde(alias = "dec")]
    Decrement,
}

impl GaugeOperation {
    /// Untagged observations infer the operation from the sign of the value.
    pub fn infer(value: f64) -> Self {
        if value > 0.0 {
            GaugeOperation::Increment
        } else if value < 0.0 {
            GaugeOperation::Decrement
        } else {
            GaugeOperation::Set
        }
    }
}

impl fmt::Display for GaugeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GaugeOperation::Set => "set",
            GaugeOperation::Increment => "increment",
            GaugeOperation::Decrement => "decrement",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for GaugeOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "set" => Ok(GaugeOperation::Set),
            "increment" | "inc" => Ok(GaugeOperation::Increment),
            "decrement" | "dec" => Ok(GaugeOperation::Decrement),
            _ => Err(format!("Unknown gauge operation: {}", s)),
        }
    }
}

/// A single observation handed to the engine by an upstream collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub metric_name: String,
    /// Type declared by the client. Server-side configuration overrides it.
    pub metric_type: MetricType,
    pub value: f64,
    pub labels: MetricLabels,
    pub operation: Option<GaugeOperation>,
}

impl Observation {
    pub fn new(metric_name: impl Into<String>, metric_type: MetricType, value: f64) -> Self {
        Self {
            metric_name: metric_name.into(),
            metric_type,
            value,
            labels: MetricLabels::new(),
            operation: None,
        }
    }

    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((name.into(), value.into()));
        self
    }

    pub fn with_operation(mut self, operation: GaugeOperation) -> Self {
        self.operation = Some(operation);
        self
    }
}
