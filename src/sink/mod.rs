//! Ring buffer intake: one poller and one dispatcher per span
//!
//! ```text
//! kernel ring buffer -> Poller -> handoff -> Dispatcher -> Pipeline
//! ```
//!
//! The handoff is unbuffered, so a slow pipeline stalls its poller (and the
//! kernel-side drain) instead of queueing or dropping records. Spans share
//! nothing with each other.

pub mod dispatcher;
pub mod guard;
pub mod handoff;
pub mod poller;

pub use dispatcher::{Dispatcher, Pipeline};
pub use poller::{PollOptions, Poller, PollerExit};

use crate::config::{Config, SpanConfig, DEFAULT_POLL_INTERVAL_MS};
use crate::ebpf::{Module, RingBufReader};
use crate::metrics::SinkMetrics;
use crate::Result;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Clone)]
pub struct SinkOptions {
    pub poll: PollOptions,
    pub metrics: Arc<SinkMetrics>,
}

impl SinkOptions {
    pub fn new(metrics: Arc<SinkMetrics>) -> Self {
        Self {
            poll: PollOptions {
                interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
                max_consecutive_errors: 0,
            },
            metrics,
        }
    }

    pub fn from_config(config: &Config, metrics: Arc<SinkMetrics>) -> Self {
        Self {
            poll: PollOptions {
                interval: config.poll_interval(),
                max_consecutive_errors: config.max_consecutive_poll_errors,
            },
            metrics,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll.interval = interval;
        self
    }

    pub fn with_max_consecutive_errors(mut self, max: u32) -> Self {
        self.poll.max_consecutive_errors = max;
        self
    }
}

/// The running poller/dispatcher pair of one span
pub struct SpanHandle {
    span: Arc<SpanConfig>,
    cancel: CancellationToken,
    poller: JoinHandle<PollerExit>,
    dispatcher: JoinHandle<()>,
}

impl SpanHandle {
    pub fn span(&self) -> &SpanConfig {
        &self.span
    }

    pub fn is_finished(&self) -> bool {
        self.poller.is_finished() && self.dispatcher.is_finished()
    }

    /// Stop polling, let the dispatcher drain, and report why the poller ended
    pub async fn shutdown(self) -> PollerExit {
        self.cancel.cancel();
        self.join().await
    }

    /// Wait for the poller to stop on its own
    pub async fn join(self) -> PollerExit {
        let exit = match self.poller.await {
            Ok(exit) => exit,
            Err(e) => {
                error!(span = %self.span.name, "Poller task failed: {}", e);
                PollerExit::Aborted
            }
        };

        // The poller dropped its sender, so the dispatcher finishes the
        // record in flight and exits.
        if let Err(e) = self.dispatcher.await {
            error!(span = %self.span.name, "Dispatcher task failed: {}", e);
        }

        exit
    }
}

/// Attach one span's ring buffer and start serving it.
///
/// Nothing is spawned unless the attachment succeeds.
pub fn start_tracing_sink(
    module: &mut dyn Module,
    span: SpanConfig,
    pipeline: Arc<dyn Pipeline>,
    options: &SinkOptions,
) -> Result<SpanHandle> {
    let span = Arc::new(span);
    let reader = guard::attach(module, &span)?;
    Ok(spawn_span(
        span,
        reader,
        pipeline,
        options,
        CancellationToken::new(),
        None,
    ))
}

fn spawn_span(
    span: Arc<SpanConfig>,
    reader: Box<dyn RingBufReader>,
    pipeline: Arc<dyn Pipeline>,
    options: &SinkOptions,
    cancel: CancellationToken,
    exits: Option<mpsc::UnboundedSender<(String, PollerExit)>>,
) -> SpanHandle {
    let (tx, rx) = handoff::channel();

    let dispatcher = tokio::spawn(
        Dispatcher::new(
            Arc::clone(&span),
            rx,
            pipeline,
            Arc::clone(&options.metrics),
        )
        .run(),
    );

    let poller = Poller::new(
        Arc::clone(&span),
        reader,
        tx,
        options.poll,
        Arc::clone(&options.metrics),
        cancel.clone(),
    );
    let name = span.name.clone();
    let poller = tokio::spawn(async move {
        // A panic is reported like any other exit
        let exit = match AssertUnwindSafe(poller.run()).catch_unwind().await {
            Ok(exit) => exit,
            Err(_) => {
                error!(span = %name, "Poller panicked");
                PollerExit::Aborted
            }
        };
        info!(span = %name, "Poller stopped: {}", exit);
        if let Some(exits) = exits {
            let _ = exits.send((name, exit));
        }
        exit
    });

    SpanHandle {
        span,
        cancel,
        poller,
        dispatcher,
    }
}

/// Every configured span, started together
pub struct Sink {
    spans: Vec<SpanHandle>,
    cancel: CancellationToken,
    exits: mpsc::UnboundedReceiver<(String, PollerExit)>,
    running: usize,
}

impl Sink {
    /// Attach all ring buffers, then spawn every span.
    ///
    /// If any ring buffer fails to attach, nothing is spawned and the error
    /// names the failing buffer.
    pub fn start(
        module: &mut dyn Module,
        spans: &[SpanConfig],
        pipeline: Arc<dyn Pipeline>,
        options: &SinkOptions,
    ) -> Result<Self> {
        let spans: Vec<Arc<SpanConfig>> = spans.iter().cloned().map(Arc::new).collect();
        let attached = guard::attach_all(module, &spans)?;

        let cancel = CancellationToken::new();
        let (exits_tx, exits) = mpsc::unbounded_channel();

        let handles: Vec<SpanHandle> = attached
            .into_iter()
            .map(|(span, reader)| {
                spawn_span(
                    span,
                    reader,
                    Arc::clone(&pipeline),
                    options,
                    cancel.child_token(),
                    Some(exits_tx.clone()),
                )
            })
            .collect();

        info!("Started {} span(s)", handles.len());

        Ok(Self {
            running: handles.len(),
            spans: handles,
            cancel,
            exits,
        })
    }

    pub fn spans(&self) -> &[SpanHandle] {
        &self.spans
    }

    /// Spans whose poller has not reported an exit yet
    pub fn running(&self) -> usize {
        self.running
    }

    /// Wait for the next span to stop on its own; `None` once all have
    pub async fn next_exit(&mut self) -> Option<(String, PollerExit)> {
        if self.running == 0 {
            return None;
        }
        let exit = self.exits.recv().await?;
        self.running -= 1;
        Some(exit)
    }

    /// Stop every span and wait for each dispatcher to drain
    pub async fn shutdown(self) -> Vec<(String, PollerExit)> {
        self.cancel.cancel();

        let mut exits = Vec::with_capacity(self.spans.len());
        for handle in self.spans {
            let name = handle.span.name.clone();
            exits.push((name, handle.join().await));
        }
        exits
    }
}
