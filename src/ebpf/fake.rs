//! In-memory kernel module for tests and dry runs
//!
//! Each fake ring buffer replays a script: every poll consumes one step,
//! either a batch of records or an error. An exhausted script yields no
//! records, or a "gone" error once the buffer has been closed.

use super::{AttachError, Module, PollError, RingBufReader};
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
enum Step {
    Batch(VecDeque<Bytes>),
    Fail(PollError),
}

#[derive(Debug, Default)]
struct FakeState {
    steps: VecDeque<Step>,
    closed: bool,
    polls: usize,
    taken: usize,
}

/// Test-side handle to a fake ring buffer; clones share state with the
/// reader handed to the sink.
#[derive(Clone, Debug, Default)]
pub struct FakeRingBuf {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRingBuf {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        // A panicking test thread must not hide the script from the others
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue records that become visible together on one poll
    pub fn push_batch<I>(&self, records: I)
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
    {
        let batch = records.into_iter().map(Into::into).collect();
        self.lock().steps.push_back(Step::Batch(batch));
    }

    /// Queue a failing poll
    pub fn push_error(&self, err: PollError) {
        self.lock().steps.push_back(Step::Fail(err));
    }

    /// Once the script runs out, report the buffer as gone
    pub fn close(&self) {
        self.lock().closed = true;
    }

    /// Number of poll calls made so far
    pub fn polls(&self) -> usize {
        self.lock().polls
    }

    /// Number of records read out of the buffer so far
    pub fn taken(&self) -> usize {
        self.lock().taken
    }
}

impl RingBufReader for FakeRingBuf {
    fn poll(&mut self, out: &mut Vec<Bytes>, max: usize) -> Result<usize, PollError> {
        let mut state = self.lock();
        state.polls += 1;

        let read = match state.steps.pop_front() {
            Some(Step::Batch(mut batch)) => {
                let read = batch.len().min(max);
                out.extend(batch.drain(..read));
                if !batch.is_empty() {
                    state.steps.push_front(Step::Batch(batch));
                }
                read
            }
            Some(Step::Fail(err)) => return Err(err),
            None if state.closed => return Err(PollError::gone("ring buffer closed")),
            None => 0,
        };

        state.taken += read;
        Ok(read)
    }
}

/// A module holding named fake ring buffers
#[derive(Debug, Default)]
pub struct FakeModule {
    ring_bufs: HashMap<String, FakeRingBuf>,
    failures: HashMap<String, AttachError>,
}

impl FakeModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a ring buffer and return a handle for scripting it
    pub fn add_ring_buf(&mut self, name: &str) -> FakeRingBuf {
        let ring_buf = FakeRingBuf::new();
        self.ring_bufs.insert(name.to_string(), ring_buf.clone());
        ring_buf
    }

    /// Make attaching `name` fail with `err`
    pub fn fail_ring_buf(&mut self, name: &str, err: AttachError) {
        self.failures.insert(name.to_string(), err);
    }
}

impl Module for FakeModule {
    fn ring_buf(&mut self, name: &str) -> Result<Box<dyn RingBufReader>, AttachError> {
        if let Some(err) = self.failures.get(name) {
            return Err(err.clone());
        }

        match self.ring_bufs.remove(name) {
            Some(ring_buf) => Ok(Box::new(ring_buf)),
            None => {
                let mut available: Vec<String> = self.ring_bufs.keys().cloned().collect();
                available.sort();
                Err(AttachError::NotFound { available })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batches_replay_one_per_poll() {
        let handle = FakeRingBuf::new();
        handle.push_batch([&b"a"[..], &b"b"[..]]);
        handle.push_batch([&b"c"[..]]);

        let mut reader = handle.clone();
        let mut out = Vec::new();

        assert_eq!(reader.poll(&mut out, 16).unwrap(), 2);
        assert_eq!(reader.poll(&mut out, 16).unwrap(), 1);
        assert_eq!(reader.poll(&mut out, 16).unwrap(), 0);
        assert_eq!(out, vec!["a", "b", "c"]);
        assert_eq!(handle.polls(), 3);
        assert_eq!(handle.taken(), 3);
    }

    #[test]
    fn test_batch_respects_max() {
        let handle = FakeRingBuf::new();
        handle.push_batch([&b"1"[..], &b"2"[..], &b"3"[..]]);

        let mut reader = handle.clone();
        let mut out = Vec::new();

        assert_eq!(reader.poll(&mut out, 2).unwrap(), 2);
        assert_eq!(reader.poll(&mut out, 2).unwrap(), 1);
        assert_eq!(out, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_closed_reports_gone_after_script() {
        let handle = FakeRingBuf::new();
        handle.push_error(PollError::transient("EAGAIN"));
        handle.close();

        let mut reader = handle.clone();
        let mut out = Vec::new();

        assert!(!reader.poll(&mut out, 8).unwrap_err().is_gone());
        assert!(reader.poll(&mut out, 8).unwrap_err().is_gone());
        assert!(out.is_empty());
    }

    #[test]
    fn test_module_hands_out_ring_buf_once() {
        let mut module = FakeModule::new();
        module.add_ring_buf("events");

        assert!(module.ring_buf("events").is_ok());
        assert!(matches!(
            module.ring_buf("events"),
            Err(AttachError::NotFound { .. })
        ));
    }
}
