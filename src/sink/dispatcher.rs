use super::handoff::HandoffReceiver;
use crate::config::SpanConfig;
use crate::metrics::SinkMetrics;
use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error};

/// Decode/aggregate stage fed one record at a time.
///
/// Implementations own their failures; nothing they report stops intake.
#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn handle(&self, record: Bytes, span: &SpanConfig);
}

/// Drains one span's handoff channel into the pipeline, strictly in order
pub struct Dispatcher {
    span: Arc<SpanConfig>,
    rx: HandoffReceiver,
    pipeline: Arc<dyn Pipeline>,
    metrics: Arc<SinkMetrics>,
}

impl Dispatcher {
    pub fn new(
        span: Arc<SpanConfig>,
        rx: HandoffReceiver,
        pipeline: Arc<dyn Pipeline>,
        metrics: Arc<SinkMetrics>,
    ) -> Self {
        Self {
            span,
            rx,
            pipeline,
            metrics,
        }
    }

    pub async fn run(mut self) {
        debug!(span = %self.span.name, "Dispatcher started");

        while let Some(record) = self.rx.recv().await {
            let len = record.len();
            let handled = AssertUnwindSafe(self.pipeline.handle(record, &self.span))
                .catch_unwind()
                .await;

            self.metrics.inc_dispatched(&self.span.name);
            if handled.is_err() {
                self.metrics.inc_pipeline_panics(&self.span.name);
                error!(
                    span = %self.span.name,
                    "Pipeline panicked on a {} byte record, continuing with the next one",
                    len
                );
            }
        }

        debug!(span = %self.span.name, "Handoff channel closed, dispatcher exiting");
    }
}
