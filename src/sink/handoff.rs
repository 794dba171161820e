//! Unbuffered single-producer/single-consumer record handoff
//!
//! `send` returns only once the receiver has taken the record, so at most
//! one record is ever in transit and a busy receiver stalls the sender.

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

struct Envelope {
    record: Bytes,
    taken: oneshot::Sender<()>,
}

/// The receiving side went away
#[derive(Error, Debug)]
#[error("handoff receiver closed")]
pub struct Closed {
    /// The record, if the receiver was already gone before it was queued
    pub record: Option<Bytes>,
}

pub struct HandoffSender {
    tx: mpsc::Sender<Envelope>,
}

pub struct HandoffReceiver {
    rx: mpsc::Receiver<Envelope>,
}

pub fn channel() -> (HandoffSender, HandoffReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (HandoffSender { tx }, HandoffReceiver { rx })
}

impl HandoffSender {
    /// Hand a record over, waiting until the receiver has taken it
    pub async fn send(&self, record: Bytes) -> Result<(), Closed> {
        let (taken_tx, taken_rx) = oneshot::channel();

        self.tx
            .send(Envelope {
                record,
                taken: taken_tx,
            })
            .await
            .map_err(|e| Closed {
                record: Some(e.0.record),
            })?;

        taken_rx.await.map_err(|_| Closed { record: None })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl HandoffReceiver {
    /// Take the next record; `None` once the sender is dropped
    pub async fn recv(&mut self) -> Option<Bytes> {
        let Envelope { record, taken } = self.rx.recv().await?;
        // The sender only stops waiting by being dropped
        let _ = taken.send(());
        Some(record)
    }
}
