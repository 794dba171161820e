use super::handoff::HandoffSender;
use crate::config::SpanConfig;
use crate::ebpf::RingBufReader;
use crate::metrics::SinkMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Records read in one poll cycle before the poller sleeps
pub const MAX_BATCH_SIZE: usize = 1024;

/// Why a poller stopped. There is no success exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerExit {
    Cancelled,
    ResourceGone,
    ErrorBudgetExhausted,
    DispatcherGone,
    /// The poller task itself panicked
    Aborted,
}

impl std::fmt::Display for PollerExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            PollerExit::Cancelled => "cancelled",
            PollerExit::ResourceGone => "ring buffer gone",
            PollerExit::ErrorBudgetExhausted => "too many consecutive poll errors",
            PollerExit::DispatcherGone => "dispatcher gone",
            PollerExit::Aborted => "aborted",
        };
        write!(f, "{}", reason)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    pub interval: Duration,
    /// 0 retries transient errors forever
    pub max_consecutive_errors: u32,
}

/// Owns one ring buffer and forwards its records onto the handoff channel
pub struct Poller {
    span: Arc<SpanConfig>,
    reader: Box<dyn RingBufReader>,
    tx: HandoffSender,
    options: PollOptions,
    metrics: Arc<SinkMetrics>,
    cancel: CancellationToken,
}

impl Poller {
    pub fn new(
        span: Arc<SpanConfig>,
        reader: Box<dyn RingBufReader>,
        tx: HandoffSender,
        options: PollOptions,
        metrics: Arc<SinkMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            span,
            reader,
            tx,
            options,
            metrics,
            cancel,
        }
    }

    /// Poll until cancelled or the ring buffer can no longer be read.
    ///
    /// Records leave the kernel ring one at a time: the next one is read
    /// only after the previous one has been handed off, so a blocked
    /// pipeline keeps the rest in the ring. Cancellation is only observed
    /// between reads, never while a taken record is waiting for handoff.
    pub async fn run(mut self) -> PollerExit {
        let name = self.span.name.clone();
        let mut slot = Vec::with_capacity(1);
        let mut consecutive_errors: u32 = 0;

        info!(
            span = %name,
            ring_buf = %self.span.ring_buf,
            "Polling ring buffer every {:?}",
            self.options.interval
        );

        loop {
            let mut read = 0;
            let mut failure = None;

            while read < MAX_BATCH_SIZE {
                if self.cancel.is_cancelled() {
                    return PollerExit::Cancelled;
                }

                match self.reader.poll(&mut slot, 1) {
                    Ok(0) => {
                        consecutive_errors = 0;
                        break;
                    }
                    Ok(taken) => {
                        consecutive_errors = 0;
                        read += taken;
                        self.metrics.inc_polled(&name, taken);

                        for record in slot.drain(..) {
                            if self.tx.send(record).await.is_err() {
                                warn!(span = %name, "Dispatcher gone, stopping poller");
                                return PollerExit::DispatcherGone;
                            }
                            self.metrics.inc_forwarded(&name);
                        }
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }

            if read > 0 {
                debug!(span = %name, "Forwarded {} records", read);
            }

            match failure {
                Some(e) if e.is_gone() => {
                    warn!(span = %name, "Ring buffer is gone, stopping poller: {}", e);
                    return PollerExit::ResourceGone;
                }
                Some(e) => {
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    self.metrics.inc_poll_errors(&name);
                    warn!(
                        span = %name,
                        consecutive = consecutive_errors,
                        "Error polling ring buffer: {}",
                        e
                    );

                    let budget = self.options.max_consecutive_errors;
                    if budget > 0 && consecutive_errors >= budget {
                        error!(
                            span = %name,
                            "Giving up after {} consecutive poll errors",
                            consecutive_errors
                        );
                        return PollerExit::ErrorBudgetExhausted;
                    }
                }
                None if read >= MAX_BATCH_SIZE => {
                    tokio::task::yield_now().await;
                    continue;
                }
                None => {}
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return PollerExit::Cancelled,
                _ = tokio::time::sleep(self.options.interval) => {}
            }
        }
    }
}
