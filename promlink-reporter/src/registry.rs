//! Registry of metrics currently exposed for scraping.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use promlink_common::{Metric, MetricId, MetricsContext, current_time_millis};

use crate::mapping::{MetricKind, build_metric_name, sanitize_label_name};

/// Exposition identity of one metric series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    /// The full Prometheus metric name.
    pub name: String,
    /// Sorted, sanitized label key-value pairs.
    pub labels: Vec<(String, String)>,
}

impl MetricKey {
    /// Build the exposition key for a host metric under the given context.
    pub fn build(context: &MetricsContext, id: &MetricId) -> Self {
        let name = build_metric_name(context.namespace(), &id.group, &id.name);

        let mut labels: Vec<(String, String)> = id
            .tags
            .iter()
            .map(|(k, v)| (sanitize_label_name(k), v.clone()))
            .collect();

        // Sort for consistent output; tags are already ordered by key, but
        // sanitization can reorder them.
        labels.sort_by(|a, b| a.0.cmp(&b.0));

        Self { name, labels }
    }

    /// Format labels for the exposition format.
    pub fn format_labels(&self) -> String {
        if self.labels.is_empty() {
            return String::new();
        }

        let parts: Vec<String> = self
            .labels
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
            .collect();

        format!("{{{}}}", parts.join(","))
    }
}

/// One metric currently visible to scraping.
///
/// Created only for metrics that were numeric and allow-listed at event time;
/// the sample accessor is read live on every scrape.
pub struct ExposedMetric {
    /// Exposition kind at the time the metric became visible.
    pub kind: MetricKind,
    /// The host's sampling accessor.
    pub source: Arc<dyn Metric>,
}

/// Thread-safe mapping from exposition identity to exposed metric.
///
/// Structural changes and scrape renders serialize through one lock, so a
/// scrape observes either the pre-change or post-change set for any identity
/// and a removal is visible to the next scrape issued after it returns.
pub struct MetricRegistry {
    metrics: RwLock<HashMap<MetricKey, ExposedMetric>>,
}

impl MetricRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            metrics: RwLock::new(HashMap::new()),
        }
    }

    /// Add or overwrite the entry for the given key.
    pub fn insert(&self, key: MetricKey, metric: ExposedMetric) {
        let mut metrics = self.metrics.write();
        let replaced = metrics.insert(key.clone(), metric).is_some();
        debug!(metric = %key.name, replaced, "Exposed metric");
    }

    /// Retract the entry for the given key. Returns whether one was present.
    pub fn remove(&self, key: &MetricKey) -> bool {
        let removed = self.metrics.write().remove(key).is_some();
        if removed {
            debug!(metric = %key.name, "Retracted metric");
        }
        removed
    }

    /// Retract a batch of entries in one critical section.
    pub fn remove_all<'a>(&self, keys: impl IntoIterator<Item = &'a MetricKey>) {
        let mut metrics = self.metrics.write();
        for key in keys {
            metrics.remove(key);
        }
    }

    /// Number of currently exposed series.
    pub fn len(&self) -> usize {
        self.metrics.read().len()
    }

    /// Whether the registry has no exposed series.
    pub fn is_empty(&self) -> bool {
        self.metrics.read().is_empty()
    }

    /// Render all exposed metrics in the text exposition format.
    ///
    /// Comment lines start with `#`; every other line is one series sample.
    pub fn render(&self) -> String {
        let now = current_time_millis();
        let metrics = self.metrics.read();
        let mut output = Vec::with_capacity(metrics.len() * 100);

        // Group series by name for TYPE comments.
        let mut by_name: HashMap<&str, Vec<(&MetricKey, &ExposedMetric)>> = HashMap::new();
        for (key, metric) in metrics.iter() {
            by_name.entry(&key.name).or_default().push((key, metric));
        }

        let mut names: Vec<_> = by_name.keys().copied().collect();
        names.sort_unstable();

        for name in names {
            let mut series = by_name.remove(name).unwrap_or_default();
            if series.is_empty() {
                continue;
            }
            series.sort_by(|a, b| a.0.labels.cmp(&b.0.labels));

            let kind = series[0].1.kind;
            writeln!(output, "# TYPE {} {}", name, kind.as_str()).ok();

            for (key, metric) in series {
                // The accessor may have turned non-numeric since the last
                // change event; such a sample renders no line.
                if let Some(value) = metric.source.sample(now).as_f64() {
                    writeln!(
                        output,
                        "{}{} {}",
                        key.name,
                        key.format_labels(),
                        format_value(value)
                    )
                    .ok();
                }
            }
        }

        String::from_utf8(output).unwrap_or_default()
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a shareable registry handle.
pub type SharedRegistry = Arc<MetricRegistry>;

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Format a floating point value for the exposition format.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}
