//! The production pipeline: decode labels, report them to the provider

use crate::config::SpanConfig;
use crate::decoder::Registry;
use crate::metrics::{Provider, SinkMetrics};
use crate::sink::Pipeline;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

pub struct DecodePipeline {
    decoders: Arc<Registry>,
    provider: Arc<dyn Provider>,
    metrics: Arc<SinkMetrics>,
}

impl DecodePipeline {
    pub fn new(decoders: Arc<Registry>, provider: Arc<dyn Provider>, metrics: Arc<SinkMetrics>) -> Self {
        Self {
            decoders,
            provider,
            metrics,
        }
    }
}

#[async_trait]
impl Pipeline for DecodePipeline {
    async fn handle(&self, record: Bytes, span: &SpanConfig) {
        match self.decoders.decode_labels(&record, span) {
            Ok(labels) => self.provider.observe(span, &labels),
            Err(e) => {
                self.metrics.inc_decode_errors(&span.name);
                debug!(span = %span.name, len = record.len(), "Skipping record: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DecoderConfig, LabelConfig};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        observed: Mutex<Vec<Vec<String>>>,
    }

    impl Provider for Recorder {
        fn observe(&self, _span: &SpanConfig, labels: &[String]) {
            self.observed.lock().unwrap().push(labels.to_vec());
        }
    }

    fn span() -> SpanConfig {
        let mut span = SpanConfig::new("oom", "oom_events");
        span.labels = vec![LabelConfig {
            name: "pid".to_string(),
            size: 2,
            decoders: vec![DecoderConfig::named("uint")],
        }];
        span
    }

    #[tokio::test]
    async fn test_decoded_labels_reach_provider() {
        let recorder = Arc::new(Recorder::default());
        let metrics = Arc::new(SinkMetrics::new().unwrap());
        let pipeline = DecodePipeline::new(Arc::new(Registry::new()), recorder.clone(), metrics);

        pipeline
            .handle(Bytes::copy_from_slice(&300u16.to_ne_bytes()), &span())
            .await;

        assert_eq!(*recorder.observed.lock().unwrap(), vec![vec!["300".to_string()]]);
    }

    #[tokio::test]
    async fn test_decode_error_is_counted_not_reported() {
        let recorder = Arc::new(Recorder::default());
        let metrics = Arc::new(SinkMetrics::new().unwrap());
        let pipeline =
            DecodePipeline::new(Arc::new(Registry::new()), recorder.clone(), metrics.clone());

        pipeline.handle(Bytes::from_static(b"x"), &span()).await;

        assert!(recorder.observed.lock().unwrap().is_empty());
        assert_eq!(metrics.decode_errors("oom"), 1);
    }
}
