use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write};
use tracing::error;

use crate::datamodel::{
    MetricLabels, MetricLabelsExt, MetricType, sanitize::escape_help, sanitize::sanitize_label_value,
};
use crate::engine::{AggregationStore, SampleSnapshot, SeriesSnapshot};

/// Body returned when there is nothing to expose.
pub const EMPTY_EXPOSITION: &str = "# No metrics yet\n";

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Label injected on every line of the registry exposition.
pub const TENANT_LABEL: &str = "tenant_id";

/// Converter for aggregated series to the Prometheus text format 0.0.4
pub struct PrometheusTextConverter;

impl PrometheusTextConverter {
    /// Renders one tenant, or every tenant with a leading `tenant_id` label.
    /// Never fails: a formatting error degrades to the placeholder.
    pub fn render(store: &AggregationStore, tenant_id: Option<&str>) -> String {
        let snapshots = store.snapshot(tenant_id);
        match Self::to_text(&snapshots, tenant_id.is_none()) {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => EMPTY_EXPOSITION.to_string(),
            Err(err) => {
                error!(tenant_id, "Failed to render the exposition: {}", err);
                EMPTY_EXPOSITION.to_string()
            }
        }
    }

    /// Groups by metric name, sorted, and sorts the lines of a group by
    /// their label string.
    ///
    /// A name carries a single `# TYPE`. Tenants pin types independently,
    /// so in the registry exposition the first series of a group decides the
    /// type and series of any other type are left out.
    pub fn to_text(
        snapshots: &[SeriesSnapshot],
        include_tenant: bool,
    ) -> Result<String, fmt::Error> {
        let mut groups: BTreeMap<&str, Vec<(String, &SeriesSnapshot)>> = BTreeMap::new();
        for snapshot in snapshots {
            let labels = base_labels(snapshot, include_tenant);
            groups
                .entry(snapshot.name.as_str())
                .or_default()
                .push((render_labels(&labels, None), snapshot));
        }

        let mut output = String::new();
        for (name, mut series) in groups {
            series.sort_by(|a, b| a.0.cmp(&b.0));
            let Some(metric_type) = series.first().map(|(_, snapshot)| snapshot.metric_type)
            else {
                continue;
            };

            let (series, conflicting): (Vec<_>, Vec<_>) = series
                .into_iter()
                .partition(|(_, snapshot)| snapshot.metric_type == metric_type);
            let skipped: BTreeSet<(&str, MetricType)> = conflicting
                .iter()
                .map(|(_, snapshot)| (snapshot.tenant_id.as_str(), snapshot.metric_type))
                .collect();
            for (tenant_id, skipped_type) in skipped {
                error!(
                    tenant_id,
                    metric_name = name,
                    "Leaving {} series out of the exposition, the name is exposed as {}",
                    skipped_type,
                    metric_type
                );
            }

            let help = series
                .iter()
                .find_map(|(_, snapshot)| snapshot.help.as_deref())
                .map(escape_help)
                .unwrap_or_else(|| format!("Metric {}", name));
            writeln!(output, "# HELP {} {}", name, help)?;
            writeln!(output, "# TYPE {} {}", name, metric_type)?;

            for (rendered, snapshot) in series {
                write_sample(&mut output, name, &rendered, snapshot, include_tenant)?;
            }
        }
        Ok(output)
    }
}

fn write_sample(
    output: &mut String,
    name: &str,
    rendered_labels: &str,
    snapshot: &SeriesSnapshot,
    include_tenant: bool,
) -> fmt::Result {
    match &snapshot.sample {
        SampleSnapshot::Value(value) => {
            writeln!(output, "{}{} {}", name, rendered_labels, format_value(*value))
        }
        SampleSnapshot::Histogram {
            buckets,
            sum,
            count,
        } => {
            let labels = base_labels(snapshot, include_tenant);
            for (bound, bucket_count) in buckets {
                let le = ("le", format_value(*bound));
                writeln!(
                    output,
                    "{}_bucket{} {}",
                    name,
                    render_labels(&labels, Some(le)),
                    bucket_count
                )?;
            }
            let inf = ("le", "+Inf".to_string());
            writeln!(
                output,
                "{}_bucket{} {}",
                name,
                render_labels(&labels, Some(inf)),
                count
            )?;
            writeln!(output, "{}_sum{} {}", name, rendered_labels, format_value(*sum))?;
            writeln!(output, "{}_count{} {}", name, rendered_labels, count)
        }
        SampleSnapshot::Summary {
            quantiles,
            sum,
            count,
        } => {
            let labels = base_labels(snapshot, include_tenant);
            for (quantile, estimate) in quantiles {
                let q = ("quantile", format_value(*quantile));
                writeln!(
                    output,
                    "{}{} {}",
                    name,
                    render_labels(&labels, Some(q)),
                    format_value(*estimate)
                )?;
            }
            writeln!(output, "{}_sum{} {}", name, rendered_labels, format_value(*sum))?;
            writeln!(output, "{}_count{} {}", name, rendered_labels, count)
        }
    }
}

fn base_labels(snapshot: &SeriesSnapshot, include_tenant: bool) -> Vec<(Cow<'_, str>, &str)> {
    let mut labels = Vec::with_capacity(snapshot.labels.len() + 1);
    if include_tenant {
        labels.push((Cow::Borrowed(TENANT_LABEL), snapshot.tenant_id.as_str()));
    }
    for (name, value) in snapshot.labels.iter() {
        let name = if include_tenant {
            exported_name(name, &snapshot.labels)
        } else {
            Cow::Borrowed(name.as_str())
        };
        labels.push((name, value.as_str()));
    }
    labels
}

/// A user label named like the injected tenant label gets the `exported_`
/// prefix, repeated until the name is free.
fn exported_name<'a>(name: &'a str, labels: &MetricLabels) -> Cow<'a, str> {
    if name != TENANT_LABEL {
        return Cow::Borrowed(name);
    }
    let mut renamed = format!("exported_{}", name);
    while labels.get_label(&renamed).is_some() {
        renamed.insert_str(0, "exported_");
    }
    Cow::Owned(renamed)
}

/// `{a="1",b="2"}`, or nothing without labels. `extra` goes last.
pub fn render_labels(labels: &[(Cow<'_, str>, &str)], extra: Option<(&str, String)>) -> String {
    if labels.is_empty() && extra.is_none() {
        return String::new();
    }
    let mut pairs: Vec<String> = labels
        .iter()
        .map(|(name, value)| format!("{}=\"{}\"", name, sanitize_label_value(Some(*value))))
        .collect();
    if let Some((name, value)) = extra {
        pairs.push(format!("{}=\"{}\"", name, value));
    }
    format!("{{{}}}", pairs.join(","))
}

/// Prometheus spelling of a sample value.
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else if value == 0.0 {
        "0".to_string()
    } else {
        value.to_string()
    }
}
