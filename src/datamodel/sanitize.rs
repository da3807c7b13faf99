//! Prometheus naming rules.
//!
//! These functions are total: malformed input degrades to a sanitized
//! fallback instead of failing, so cosmetic issues never reject an
//! observation.

pub const UNNAMED_METRIC: &str = "unnamed_metric";
pub const UNKNOWN_LABEL: &str = "unknown";

fn is_metric_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

fn is_label_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Sanitizes a metric name to `[a-zA-Z_:][a-zA-Z0-9_:]*`.
///
/// Invalid characters become `_`, a name that does not start with a letter,
/// an underscore or a colon is prefixed with `metric_`, and the result is
/// truncated to `max_length` characters.
pub fn sanitize_metric_name(raw: &str, max_length: usize) -> String {
    let mut name: String = raw
        .chars()
        .map(|c| if is_metric_name_char(c) { c } else { '_' })
        .collect();

    if let Some(first) = name.chars().next() {
        if !(first.is_ascii_alphabetic() || first == '_' || first == ':') {
            name.insert_str(0, "metric_");
        }
    }

    // Only ASCII is left at this point, so byte truncation is safe.
    name.truncate(max_length);

    if name.is_empty() {
        return UNNAMED_METRIC.to_string();
    }
    name
}

/// Sanitizes a label name to `[a-zA-Z_][a-zA-Z0-9_]*`.
pub fn sanitize_label_name(raw: &str) -> String {
    let mut name: String = raw
        .chars()
        .map(|c| if is_label_name_char(c) { c } else { '_' })
        .collect();

    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert_str(0, "label_");
    }

    if name.is_empty() {
        return UNKNOWN_LABEL.to_string();
    }
    name
}

/// Escapes a label value for the exposition format. A missing value is
/// rendered as the literal `null`.
pub fn sanitize_label_value(value: Option<&str>) -> String {
    let Some(value) = value else {
        return "null".to_string();
    };

    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// HELP text only escapes backslashes and newlines.
pub fn escape_help(text: &str) -> String {
    text.replace('\\', "\\\\").replace('\n', "\\n")
}
