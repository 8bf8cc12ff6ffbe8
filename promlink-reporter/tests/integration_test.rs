//! Integration tests for the reporter.
//!
//! These tests drive the full flow from host metric events to the scrape
//! response served on the shared HTTP listener.

use std::collections::HashMap;
use std::sync::Arc;

use promlink_common::{
    CallbackMetric, Metric, MetricId, MetricValue, MetricsContext, MetricsReporter,
};
use promlink_reporter::config::{ALLOWLIST_CONFIG, LISTENER_CONFIG};
use promlink_reporter::PrometheusReporter;

fn props(entries: &[(&str, &str)]) -> HashMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn start_reporter(listener: &str) -> PrometheusReporter {
    let mut reporter = PrometheusReporter::new();
    reporter
        .configure(&props(&[(LISTENER_CONFIG, listener)]))
        .unwrap();
    reporter.start().unwrap();
    reporter
}

fn build_metric(name: &str, group: &str, value: f64) -> Arc<dyn Metric> {
    let id = MetricId::new(name, group).with_tag("key", "value");
    Arc::new(CallbackMetric::constant(id, value))
}

fn build_non_numeric_metric(name: &str, group: &str) -> Arc<dyn Metric> {
    let id = MetricId::new(name, group).with_tag("key", "value");
    Arc::new(CallbackMetric::constant(id, MetricValue::Text("hello".into())))
}

/// Scrape the endpoint and return the data lines: everything that is not a
/// `#` comment line is one metric sample.
async fn get_metrics(port: u16) -> Vec<String> {
    let body = reqwest::get(format!("http://127.0.0.1:{}/metrics", port))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    body.lines()
        .filter(|line| !line.starts_with('#') && !line.trim().is_empty())
        .map(|line| line.to_string())
        .collect()
}

#[tokio::test]
async fn test_lifecycle() {
    let mut reporter = start_reporter("http://:0");
    reporter.context_change(&MetricsContext::new("broker.server"));
    let port = reporter.local_port().unwrap();

    let initial_metrics = get_metrics(port).await.len();

    let metric1 = build_metric("name1", "group", 0.0);
    reporter.init(vec![metric1.clone()]);
    assert_eq!(get_metrics(port).await.len(), initial_metrics + 1);

    let metric2 = build_metric("name2", "group", 0.0);
    reporter.metric_change(metric2);
    assert_eq!(get_metrics(port).await.len(), initial_metrics + 2);

    let metric3 = build_non_numeric_metric("name3", "group");
    reporter.metric_change(metric3);
    assert_eq!(get_metrics(port).await.len(), initial_metrics + 2);

    reporter.metric_removal(metric1.as_ref());
    assert_eq!(get_metrics(port).await.len(), initial_metrics + 1);

    reporter.close();

    // Last reference released: the endpoint is gone.
    assert!(
        reqwest::get(format!("http://127.0.0.1:{}/metrics", port))
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_multiple_reporters() {
    let mut reporter1 = start_reporter("http://:0");
    reporter1.context_change(&MetricsContext::new("broker.server"));
    let port = reporter1.local_port().unwrap();

    // The second reporter is configured with the port the first one actually
    // bound, and attaches to the same endpoint instead of binding again.
    let mut reporter2 = start_reporter(&format!("http://:{}", port));
    reporter2.context_change(&MetricsContext::new("broker.server"));
    assert_eq!(reporter2.local_port(), Some(port));

    reporter1.init(vec![build_metric("name1", "group", 0.0)]);
    reporter2.init(vec![build_metric("name2", "group", 0.0)]);

    let metrics = get_metrics(port).await;
    assert!(metrics.iter().any(|l| l.contains("name1")));
    assert!(metrics.iter().any(|l| l.contains("name2")));

    // Closing one reporter retracts only its own metrics.
    reporter1.close();
    let metrics = get_metrics(port).await;
    assert!(!metrics.iter().any(|l| l.contains("name1")));
    assert!(metrics.iter().any(|l| l.contains("name2")));

    reporter2.close();
    assert!(
        reqwest::get(format!("http://127.0.0.1:{}/metrics", port))
            .await
            .is_err()
    );

    // The address is fully released: a third reporter can bind it fresh.
    let mut reporter3 = start_reporter(&format!("http://:{}", port));
    assert_eq!(reporter3.local_port(), Some(port));
    reporter3.close();
}

#[tokio::test]
async fn test_scrape_output_format() {
    let mut reporter = start_reporter("http://:0");
    reporter.context_change(&MetricsContext::new("broker.server"));
    let port = reporter.local_port().unwrap();

    reporter.init(vec![build_metric("bytes_total", "net", 1024.0)]);

    let body = reqwest::get(format!("http://127.0.0.1:{}/metrics", port))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(body.contains("# TYPE broker_server_net_bytes_total gauge"));
    assert!(body.contains("broker_server_net_bytes_total{key=\"value\"} 1024"));

    reporter.close();
}

#[tokio::test]
async fn test_allowlist_filters_scrape() {
    let mut reporter = PrometheusReporter::new();
    reporter
        .configure(&props(&[
            (LISTENER_CONFIG, "http://:0"),
            (ALLOWLIST_CONFIG, "group_allowed.*"),
        ]))
        .unwrap();
    reporter.start().unwrap();
    let port = reporter.local_port().unwrap();

    reporter.init(vec![
        build_metric("allowed_metric", "group", 1.0),
        build_metric("hidden_metric", "other", 1.0),
    ]);

    let metrics = get_metrics(port).await;
    assert_eq!(metrics.len(), 1);
    assert!(metrics[0].contains("group_allowed_metric"));

    reporter.close();
}

#[tokio::test]
async fn test_idempotent_change_over_http() {
    let mut reporter = start_reporter("http://:0");
    let port = reporter.local_port().unwrap();

    reporter.metric_change(build_metric("name1", "group", 1.0));
    reporter.metric_change(build_metric("name1", "group", 2.0));

    let metrics = get_metrics(port).await;
    assert_eq!(metrics.len(), 1);
    assert!(metrics[0].ends_with(" 2"), "Line: {}", metrics[0]);

    reporter.close();
}

#[tokio::test]
async fn test_live_sample_read_at_scrape_time() {
    use std::sync::atomic::{AtomicU64, Ordering};

    let mut reporter = start_reporter("http://:0");
    let port = reporter.local_port().unwrap();

    let counter = Arc::new(AtomicU64::new(1));
    let sampled = counter.clone();
    reporter.metric_change(Arc::new(CallbackMetric::new(
        MetricId::new("requests_total", "net"),
        move |_| MetricValue::Counter(sampled.load(Ordering::Relaxed)),
    )));

    let metrics = get_metrics(port).await;
    assert!(metrics[0].ends_with(" 1"), "Line: {}", metrics[0]);

    // No further metric event: the next scrape still sees the new value.
    counter.store(42, Ordering::Relaxed);
    let metrics = get_metrics(port).await;
    assert!(metrics[0].ends_with(" 42"), "Line: {}", metrics[0]);

    reporter.close();
}

#[tokio::test]
async fn test_concurrent_changes_and_scrapes() {
    let mut reporter = start_reporter("http://:0");
    let port = reporter.local_port().unwrap();
    let initial_metrics = get_metrics(port).await.len();

    let producer = std::thread::spawn(move || {
        for i in 0..100 {
            reporter.metric_change(build_metric(&format!("metric_{}", i), "group", i as f64));
        }
        reporter
    });

    // Scrape while the producer is running; every response must be a
    // consistent snapshot with one value per data line.
    for _ in 0..10 {
        for line in get_metrics(port).await {
            let value = line.split_whitespace().last().unwrap();
            assert!(value.parse::<f64>().is_ok(), "Line: {}", line);
        }
    }

    let mut reporter = producer.join().unwrap();
    assert_eq!(get_metrics(port).await.len(), initial_metrics + 100);
    reporter.close();
}
