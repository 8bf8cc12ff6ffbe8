use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identity of one metric instance: name, group and tag set.
///
/// Two metrics with the same name but different tags are distinct series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricId {
    /// Metric name (e.g., "requests_total").
    pub name: String,

    /// Logical group/category the metric belongs to (e.g., "socket-server").
    pub group: String,

    /// Context tags (e.g., client id, listener name).
    pub tags: BTreeMap<String, String>,
}

impl MetricId {
    /// Create a new metric identity without tags.
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
            tags: BTreeMap::new(),
        }
    }

    /// Add a tag to this identity.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add multiple tags to this identity.
    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags.extend(tags);
        self
    }
}

/// Typed sample value yielded by a metric accessor.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    /// Counter (monotonically increasing).
    Counter(u64),

    /// Gauge (can go up or down).
    Gauge(f64),

    /// Boolean value, exposed as 1/0.
    Boolean(bool),

    /// Arbitrary text value. Not numeric, never exposed for scraping.
    Text(String),
}

impl MetricValue {
    /// Numeric representation of this value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Counter(v) => Some(*v as f64),
            MetricValue::Gauge(v) => Some(*v),
            MetricValue::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
            MetricValue::Text(_) => None,
        }
    }

    /// Whether this value can be exposed as a scrape-protocol sample.
    pub fn is_numeric(&self) -> bool {
        !matches!(self, MetricValue::Text(_))
    }
}

impl From<u64> for MetricValue {
    fn from(v: u64) -> Self {
        MetricValue::Counter(v)
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Gauge(v as f64)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Gauge(v)
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        MetricValue::Boolean(v)
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::Text(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}

/// A host metric: an identity plus a sampling accessor.
///
/// The accessor is read at scrape time, so the exposed value always reflects
/// the host's current state rather than the value at registration time.
pub trait Metric: Send + Sync {
    /// The identity distinguishing this metric from every other.
    fn id(&self) -> &MetricId;

    /// Sample the current value at the given epoch-millisecond timestamp.
    fn sample(&self, now_ms: i64) -> MetricValue;
}

/// Closure-backed [`Metric`] implementation.
pub struct CallbackMetric {
    id: MetricId,
    sampler: Box<dyn Fn(i64) -> MetricValue + Send + Sync>,
}

impl CallbackMetric {
    /// Create a metric whose value is produced by the given closure.
    pub fn new(
        id: MetricId,
        sampler: impl Fn(i64) -> MetricValue + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            sampler: Box::new(sampler),
        }
    }

    /// Create a metric that always yields the same value.
    pub fn constant(id: MetricId, value: impl Into<MetricValue>) -> Self {
        let value = value.into();
        Self::new(id, move |_| value.clone())
    }
}

impl Metric for CallbackMetric {
    fn id(&self) -> &MetricId {
        &self.id
    }

    fn sample(&self, now_ms: i64) -> MetricValue {
        (self.sampler)(now_ms)
    }
}

impl std::fmt::Debug for CallbackMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackMetric").field("id", &self.id).finish()
    }
}

/// Naming context supplied by the host, used as a prefix when rendering
/// metric identities. Purely informational; it never affects filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsContext {
    namespace: String,
}

impl MetricsContext {
    /// Create a context with the given namespace (e.g., "broker.server").
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// The namespace string.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

/// The event contract a reporter exposes to its host.
///
/// The host drives the reporter with exactly these entry points: `init` once
/// with the pre-existing metrics, then `metric_change`/`metric_removal` as
/// metrics come and go, and `close` on shutdown.
pub trait MetricsReporter: Send {
    /// Supply the naming context used when rendering metric identities.
    fn context_change(&mut self, context: &MetricsContext);

    /// Seed the reporter with the metrics that already exist.
    fn init(&mut self, metrics: Vec<Arc<dyn Metric>>);

    /// A metric was added or its definition changed.
    fn metric_change(&mut self, metric: Arc<dyn Metric>);

    /// A metric was removed by the host.
    fn metric_removal(&mut self, metric: &dyn Metric);

    /// Tear down; the reporter accepts no further events.
    fn close(&mut self);
}

/// Get the current timestamp in milliseconds since Unix epoch.
///
/// Returns 0 if system time is before Unix epoch (should never happen in practice).
pub fn current_time_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_id_identity() {
        let a = MetricId::new("requests_total", "socket-server").with_tag("listener", "internal");
        let b = MetricId::new("requests_total", "socket-server").with_tag("listener", "internal");
        let c = MetricId::new("requests_total", "socket-server").with_tag("listener", "external");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(MetricValue::from(42u64), MetricValue::Counter(42));
        assert_eq!(MetricValue::from(3.14), MetricValue::Gauge(3.14));
        assert_eq!(MetricValue::from(true), MetricValue::Boolean(true));
        assert_eq!(
            MetricValue::from("idle"),
            MetricValue::Text("idle".to_string())
        );
    }

    #[test]
    fn test_numeric_extraction() {
        assert_eq!(MetricValue::Counter(100).as_f64(), Some(100.0));
        assert_eq!(MetricValue::Gauge(2.5).as_f64(), Some(2.5));
        assert_eq!(MetricValue::Boolean(true).as_f64(), Some(1.0));
        assert_eq!(MetricValue::Boolean(false).as_f64(), Some(0.0));
        assert_eq!(MetricValue::Text("up".into()).as_f64(), None);

        assert!(MetricValue::Gauge(0.0).is_numeric());
        assert!(!MetricValue::Text("up".into()).is_numeric());
    }

    #[test]
    fn test_callback_metric() {
        let metric = CallbackMetric::new(
            MetricId::new("uptime_ms", "process"),
            |now| MetricValue::Gauge(now as f64),
        );

        assert_eq!(metric.id().name, "uptime_ms");
        assert_eq!(metric.sample(1500), MetricValue::Gauge(1500.0));
    }

    #[test]
    fn test_constant_metric() {
        let metric = CallbackMetric::constant(MetricId::new("version", "app"), "1.2.3");
        assert_eq!(metric.sample(0), MetricValue::Text("1.2.3".to_string()));
    }

    #[test]
    fn test_context_namespace() {
        assert_eq!(MetricsContext::new("broker.server").namespace(), "broker.server");
        assert_eq!(MetricsContext::default().namespace(), "");
    }
}
