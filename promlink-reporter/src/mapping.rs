//! Mapping from host metric identities to Prometheus names and types.

use promlink_common::MetricValue;

/// Sanitize a metric name to be Prometheus-compatible.
///
/// Prometheus metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
/// This function:
/// - Replaces invalid characters with underscores
/// - Ensures the name starts with a letter or underscore
/// - Collapses multiple underscores into one
pub fn sanitize_metric_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len() + 1);
    let mut last_was_underscore = false;
    let mut chars = name.chars().peekable();

    // First character must be a letter or underscore. If it's a digit,
    // prefix with underscore and keep the digit.
    if let Some(&first) = chars.peek()
        && first.is_ascii_digit()
    {
        result.push('_');
        last_was_underscore = true;
    }

    for c in chars {
        let is_valid_char = c.is_ascii_alphanumeric() || c == '_' || c == ':';

        if is_valid_char {
            if c == '_' {
                if !last_was_underscore {
                    result.push(c);
                    last_was_underscore = true;
                }
            } else {
                result.push(c);
                last_was_underscore = false;
            }
        } else if !last_was_underscore {
            result.push('_');
            last_was_underscore = true;
        }
    }

    while result.ends_with('_') {
        result.pop();
    }

    if result.is_empty() {
        result.push_str("unnamed");
    }

    result
}

/// Sanitize a label name to be Prometheus-compatible.
///
/// Prometheus label names must match `[a-zA-Z_][a-zA-Z0-9_]*`.
/// Labels starting with `__` are reserved for internal use.
pub fn sanitize_label_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    let mut last_was_underscore = false;

    for (i, c) in name.chars().enumerate() {
        let valid = if i == 0 {
            c.is_ascii_alphabetic() || c == '_'
        } else {
            c.is_ascii_alphanumeric() || c == '_'
        };

        if valid {
            result.push(c);
            last_was_underscore = c == '_';
        } else if !last_was_underscore {
            result.push('_');
            last_was_underscore = true;
        }
    }

    while result.ends_with('_') {
        result.pop();
    }

    if result.is_empty() {
        return "label".to_string();
    }

    if result.starts_with("__") {
        result.insert(0, 'z');
    }

    result
}

/// Build a full Prometheus metric name from the naming context and identity.
///
/// Format: `{namespace}_{group}_{name}`, each component sanitized; empty
/// components are skipped.
pub fn build_metric_name(namespace: &str, group: &str, name: &str) -> String {
    let mut parts = Vec::with_capacity(3);
    for component in [namespace, group, name] {
        if !component.is_empty() {
            parts.push(sanitize_metric_name(component));
        }
    }

    if parts.is_empty() {
        "unnamed".to_string()
    } else {
        parts.join("_")
    }
}

/// Prometheus metric kind for `# TYPE` comment lines.
///
/// Text values have no kind; they are never exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
}

impl MetricKind {
    /// Determine the kind from a sampled value, if it is numeric.
    pub fn from_value(value: &MetricValue) -> Option<Self> {
        match value {
            MetricValue::Counter(_) => Some(MetricKind::Counter),
            MetricValue::Gauge(_) => Some(MetricKind::Gauge),
            MetricValue::Boolean(_) => Some(MetricKind::Gauge),
            MetricValue::Text(_) => None,
        }
    }

    /// Get the TYPE comment string for the exposition format.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}
