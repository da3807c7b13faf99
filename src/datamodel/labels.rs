use std::collections::BTreeMap;

use serde_json::Value as JsonValue;
use smallvec::SmallVec;

use super::sanitize::sanitize_label_name;
use crate::engine::EngineError;

/// Label pairs. Input order is irrelevant; canonical labels are sorted by name.
pub type MetricLabels = SmallVec<[(String, String); 8]>;

pub trait MetricLabelsExt {
    /// Sanitizes the label names, sorts them and keeps the first
    /// `max_label_count` entries.
    ///
    /// Two raw names that sanitize to the same name cannot be truncated
    /// deterministically, so they are rejected.
    fn canonicalize(&self, max_label_count: usize) -> Result<MetricLabels, EngineError>;

    fn get_label(&self, name: &str) -> Option<&str>;

    /// Compact JSON object with sorted keys, used as the persisted form.
    fn to_json(&self) -> String;

    fn from_json(json: &str) -> Result<MetricLabels, serde_json::Error>;
}

impl MetricLabelsExt for MetricLabels {
    fn canonicalize(&self, max_label_count: usize) -> Result<MetricLabels, EngineError> {
        let mut sorted = BTreeMap::new();
        for (name, value) in self {
            let name = sanitize_label_name(name);
            if sorted.contains_key(&name) {
                return Err(EngineError::Validation(format!(
                    "label name collision on '{}'",
                    name
                )));
            }
            sorted.insert(name, value.clone());
        }

        if sorted.len() > max_label_count {
            tracing::debug!(
                labels = sorted.len(),
                max_label_count,
                "truncating label set"
            );
        }

        Ok(sorted.into_iter().take(max_label_count).collect())
    }

    fn get_label(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn to_json(&self) -> String {
        let map: BTreeMap<&str, &str> = self
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect();
        // A map of strings always serializes.
        serde_json::to_string(&map).unwrap_or_else(|_| "{}".to_string())
    }

    fn from_json(json: &str) -> Result<MetricLabels, serde_json::Error> {
        let map: BTreeMap<String, String> = serde_json::from_str(json)?;
        Ok(map.into_iter().collect())
    }
}

/// Converts a JSON label value to its string form. `null` becomes `"null"`,
/// strings are kept verbatim and everything else uses its JSON text.
pub fn label_value_from_json(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "null".to_string(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}
