//! Reporter lifecycle: configure, run, receive metric events, close.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, trace};

use promlink_common::{Metric, MetricsContext, MetricsReporter, current_time_millis};

use crate::config::ReporterConfig;
use crate::error::ReporterError;
use crate::mapping::MetricKind;
use crate::registry::{ExposedMetric, MetricKey, MetricRegistry, SharedRegistry};
use crate::server::{self, SharedServer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unconfigured,
    Configured,
    Running,
    Closed,
}

/// A reporter instance exposing one host subsystem's metrics for scraping.
///
/// Lifecycle: `configure` validates and stores the listener address and
/// allow-list, `start` acquires (or attaches to) the shared listener, then
/// the host drives the [`MetricsReporter`] event contract until `close`.
/// Several instances configured with the same resolved address share one
/// listener; each instance retracts only its own metrics on close.
pub struct PrometheusReporter {
    state: State,
    config: Option<ReporterConfig>,
    context: MetricsContext,
    server: Option<SharedServer>,
    registry: Option<SharedRegistry>,
    owned: HashSet<MetricKey>,
}

impl PrometheusReporter {
    /// Create an unconfigured reporter.
    pub fn new() -> Self {
        Self {
            state: State::Unconfigured,
            config: None,
            context: MetricsContext::default(),
            server: None,
            registry: None,
            owned: HashSet::new(),
        }
    }

    /// Validate and store the configuration from a key-value property map.
    ///
    /// Never binds anything; a failed configure leaves no listener state.
    pub fn configure(&mut self, props: &HashMap<String, String>) -> Result<(), ReporterError> {
        self.configure_with(ReporterConfig::from_props(props)?)
    }

    /// Validate and store an already-built configuration.
    pub fn configure_with(&mut self, config: ReporterConfig) -> Result<(), ReporterError> {
        match self.state {
            State::Unconfigured | State::Configured => {
                self.config = Some(config);
                self.state = State::Configured;
                Ok(())
            }
            State::Running => Err(ReporterError::AlreadyRunning),
            State::Closed => Err(ReporterError::Closed),
        }
    }

    /// Transition into the running state, acquiring the shared listener for
    /// the configured address (or a private registry when the listener is
    /// disabled).
    ///
    /// Bind failures leave the reporter configured but not running.
    pub fn start(&mut self) -> Result<(), ReporterError> {
        match self.state {
            State::Configured => {}
            State::Unconfigured => return Err(ReporterError::NotConfigured),
            State::Running => return Ok(()),
            State::Closed => return Err(ReporterError::Closed),
        }

        let config = self.config.as_ref().ok_or(ReporterError::NotConfigured)?;

        if config.is_listener_enabled() {
            let server = server::acquire(config.address())?;
            self.registry = Some(server.registry().clone());
            self.server = Some(server);
        } else {
            debug!("Listener disabled, keeping metrics in a private registry");
            self.registry = Some(Arc::new(MetricRegistry::new()));
        }

        self.state = State::Running;
        Ok(())
    }

    /// The resolved port of the bound listener, while running.
    ///
    /// This is how a reporter configured with port 0 reports the port the
    /// kernel actually chose.
    pub fn local_port(&self) -> Option<u16> {
        self.server.as_ref().map(|s| s.port())
    }

    /// Number of metrics this instance currently exposes.
    pub fn exposed_metrics(&self) -> usize {
        self.owned.len()
    }

    /// Apply the eligibility rule to one metric event.
    ///
    /// Eligibility is re-evaluated on every call: the sample must be numeric
    /// and the rendered name must pass the allow-list. An identity that is no
    /// longer eligible gets retracted, not left stale.
    fn apply_metric(&mut self, metric: Arc<dyn Metric>) {
        let (Some(config), Some(registry)) = (&self.config, &self.registry) else {
            return;
        };

        let key = MetricKey::build(&self.context, metric.id());
        let value = metric.sample(current_time_millis());
        let eligible = value.is_numeric() && config.is_allowed(&key.name);

        if eligible {
            let kind = MetricKind::from_value(&value).unwrap_or(MetricKind::Gauge);
            registry.insert(
                key.clone(),
                ExposedMetric {
                    kind,
                    source: metric,
                },
            );
            self.owned.insert(key);
        } else {
            trace!(metric = %key.name, "Metric not eligible for exposition");
            if self.owned.remove(&key) {
                registry.remove(&key);
            }
        }
    }

    fn retract_metric(&mut self, metric: &dyn Metric) {
        let Some(registry) = &self.registry else {
            return;
        };

        let key = MetricKey::build(&self.context, metric.id());
        if self.owned.remove(&key) {
            registry.remove(&key);
        }
    }
}

impl MetricsReporter for PrometheusReporter {
    fn context_change(&mut self, context: &MetricsContext) {
        if self.state == State::Closed {
            debug!("Ignoring context change on closed reporter");
            return;
        }
        self.context = context.clone();
    }

    fn init(&mut self, metrics: Vec<Arc<dyn Metric>>) {
        if self.state != State::Running {
            debug!(state = ?self.state, "Ignoring init event");
            return;
        }
        for metric in metrics {
            self.apply_metric(metric);
        }
    }

    fn metric_change(&mut self, metric: Arc<dyn Metric>) {
        if self.state != State::Running {
            debug!(state = ?self.state, "Ignoring metric change event");
            return;
        }
        self.apply_metric(metric);
    }

    fn metric_removal(&mut self, metric: &dyn Metric) {
        if self.state != State::Running {
            debug!(state = ?self.state, "Ignoring metric removal event");
            return;
        }
        self.retract_metric(metric);
    }

    fn close(&mut self) {
        if self.state == State::Closed {
            return;
        }
        self.state = State::Closed;

        if let Some(registry) = self.registry.take() {
            registry.remove_all(self.owned.iter());
        }
        self.owned.clear();

        if let Some(server) = self.server.take() {
            server::release(server);
        }
        self.config = None;
    }
}

impl Default for PrometheusReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PrometheusReporter {
    fn drop(&mut self) {
        self.close();
    }
}
