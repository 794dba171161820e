use crate::config::SpanConfig;
use prometheus::{IntCounterVec, Opts, Registry};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Receives the decoded label values of every record
pub trait Provider: Send + Sync {
    fn observe(&self, span: &SpanConfig, labels: &[String]);
}

/// Counts records per span and label set in a Prometheus registry.
///
/// Each span gets its own counter family, created on first use with the
/// span's configured label names.
pub struct PrometheusProvider {
    registry: Registry,
    counters: Mutex<HashMap<String, IntCounterVec>>,
}

impl PrometheusProvider {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn metric_name(span: &SpanConfig) -> String {
        format!("ringsink_span_{}_total", span.name)
    }

    fn counter(&self, span: &SpanConfig) -> Option<IntCounterVec> {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(counter) = counters.get(&span.name) {
            return Some(counter.clone());
        }

        let opts = Opts::new(
            Self::metric_name(span),
            format!("Records received on ring buffer {}", span.ring_buf),
        );
        let counter = match IntCounterVec::new(opts, &span.label_names()) {
            Ok(counter) => counter,
            Err(e) => {
                warn!(span = %span.name, "Failed to create span counter: {}", e);
                return None;
            }
        };
        if let Err(e) = self.registry.register(Box::new(counter.clone())) {
            warn!(span = %span.name, "Failed to register span counter: {}", e);
            return None;
        }

        counters.insert(span.name.clone(), counter.clone());
        Some(counter)
    }
}

impl Provider for PrometheusProvider {
    fn observe(&self, span: &SpanConfig, labels: &[String]) {
        let Some(counter) = self.counter(span) else {
            return;
        };

        let values: Vec<&str> = labels.iter().map(String::as_str).collect();
        match counter.get_metric_with_label_values(values.as_slice()) {
            Ok(series) => series.inc(),
            Err(e) => debug!(span = %span.name, "Dropping observation: {}", e),
        }
    }
}

/// Intake counters shared by every span's poller and dispatcher
pub struct SinkMetrics {
    records_polled: IntCounterVec,
    records_forwarded: IntCounterVec,
    records_dispatched: IntCounterVec,
    poll_errors: IntCounterVec,
    pipeline_panics: IntCounterVec,
    decode_errors: IntCounterVec,
}

impl SinkMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let counter = |name: &str, help: &str| IntCounterVec::new(Opts::new(name, help), &["span"]);

        Ok(Self {
            records_polled: counter(
                "ringsink_records_polled_total",
                "Records read out of kernel ring buffers",
            )?,
            records_forwarded: counter(
                "ringsink_records_forwarded_total",
                "Records handed off from the poller to the dispatcher",
            )?,
            records_dispatched: counter(
                "ringsink_records_dispatched_total",
                "Records processed by the decode pipeline",
            )?,
            poll_errors: counter(
                "ringsink_poll_errors_total",
                "Failed ring buffer polls",
            )?,
            pipeline_panics: counter(
                "ringsink_pipeline_panics_total",
                "Records whose pipeline invocation panicked",
            )?,
            decode_errors: counter(
                "ringsink_decode_errors_total",
                "Records that could not be decoded into labels",
            )?,
        })
    }

    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        for counter in [
            &self.records_polled,
            &self.records_forwarded,
            &self.records_dispatched,
            &self.poll_errors,
            &self.pipeline_panics,
            &self.decode_errors,
        ] {
            registry.register(Box::new(counter.clone()))?;
        }
        Ok(())
    }

    pub fn inc_polled(&self, span: &str, count: usize) {
        self.records_polled
            .with_label_values(&[span])
            .inc_by(count as u64);
    }

    pub fn inc_forwarded(&self, span: &str) {
        self.records_forwarded.with_label_values(&[span]).inc();
    }

    pub fn inc_dispatched(&self, span: &str) {
        self.records_dispatched.with_label_values(&[span]).inc();
    }

    pub fn inc_poll_errors(&self, span: &str) {
        self.poll_errors.with_label_values(&[span]).inc();
    }

    pub fn inc_pipeline_panics(&self, span: &str) {
        self.pipeline_panics.with_label_values(&[span]).inc();
    }

    pub fn inc_decode_errors(&self, span: &str) {
        self.decode_errors.with_label_values(&[span]).inc();
    }

    pub fn polled(&self, span: &str) -> u64 {
        self.records_polled.with_label_values(&[span]).get()
    }

    pub fn forwarded(&self, span: &str) -> u64 {
        self.records_forwarded.with_label_values(&[span]).get()
    }

    pub fn dispatched(&self, span: &str) -> u64 {
        self.records_dispatched.with_label_values(&[span]).get()
    }

    pub fn poll_errors(&self, span: &str) -> u64 {
        self.poll_errors.with_label_values(&[span]).get()
    }

    pub fn pipeline_panics(&self, span: &str) -> u64 {
        self.pipeline_panics.with_label_values(&[span]).get()
    }

    pub fn decode_errors(&self, span: &str) -> u64 {
        self.decode_errors.with_label_values(&[span]).get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LabelConfig;
    use crate::metrics::render;

    fn span_with_labels(labels: &[&str]) -> SpanConfig {
        let mut span = SpanConfig::new("exec", "exec_events");
        span.labels = labels
            .iter()
            .map(|name| LabelConfig {
                name: name.to_string(),
                size: 4,
                decoders: Vec::new(),
            })
            .collect();
        span
    }

    #[test]
    fn test_provider_counts_per_label_set() {
        let registry = Registry::new();
        let provider = PrometheusProvider::new(registry.clone());
        let span = span_with_labels(&["pid"]);

        provider.observe(&span, &["1".to_string()]);
        provider.observe(&span, &["1".to_string()]);
        provider.observe(&span, &["2".to_string()]);

        let text = render(&registry).unwrap();
        assert!(text.contains("# TYPE ringsink_span_exec_total counter"));
        assert!(text.contains("ringsink_span_exec_total{pid=\"1\"} 2"));
        assert!(text.contains("ringsink_span_exec_total{pid=\"2\"} 1"));
    }

    #[test]
    fn test_provider_ignores_label_count_mismatch() {
        let registry = Registry::new();
        let provider = PrometheusProvider::new(registry.clone());
        let span = span_with_labels(&["pid", "comm"]);

        provider.observe(&span, &["1".to_string()]);

        let text = render(&registry).unwrap();
        assert!(!text.contains("ringsink_span_exec_total{"));
    }

    #[test]
    fn test_sink_metrics_per_span() {
        let metrics = SinkMetrics::new().unwrap();
        let registry = Registry::new();
        metrics.register(&registry).unwrap();

        metrics.inc_polled("a", 3);
        metrics.inc_forwarded("a");
        metrics.inc_poll_errors("b");

        assert_eq!(metrics.polled("a"), 3);
        assert_eq!(metrics.forwarded("a"), 1);
        assert_eq!(metrics.polled("b"), 0);
        assert_eq!(metrics.poll_errors("b"), 1);
    }

    #[test]
    fn test_sink_metrics_register_twice_fails() {
        let metrics = SinkMetrics::new().unwrap();
        let registry = Registry::new();
        metrics.register(&registry).unwrap();
        assert!(metrics.register(&registry).is_err());
    }
}
