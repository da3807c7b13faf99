use std::fmt;

use super::{MetricLabels, sanitize::sanitize_label_value};

/// Canonical identity of a series: `tenant|name|k1="v1",k2="v2"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey(String);

impl SeriesKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds the series key. Label names are sorted here, so the key does not
/// depend on the order labels were supplied in. Values are escaped and
/// quoted so that separators inside values cannot collide.
pub fn resolve_key(tenant_id: &str, metric_name: &str, labels: &MetricLabels) -> SeriesKey {
    let mut pairs: Vec<(&str, &str)> = labels
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_str()))
        .collect();
    pairs.sort_unstable();

    let mut key = String::with_capacity(tenant_id.len() + metric_name.len() + 16 * pairs.len());
    key.push_str(tenant_id);
    key.push('|');
    key.push_str(metric_name);
    key.push('|');
    for (index, (name, value)) in pairs.into_iter().enumerate() {
        if index > 0 {
            key.push(',');
        }
        key.push_str(name);
        key.push_str("=\"");
        key.push_str(&sanitize_label_value(Some(value)));
        key.push('"');
    }
    SeriesKey(key)
}
