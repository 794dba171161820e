use super::{PollError, RingBufReader};
use aya::maps::{MapData, RingBuf};
use bytes::Bytes;

/// Reader over an aya ring buffer map.
///
/// `RingBuf::next` never fails: an empty buffer just yields `None`, so this
/// reader has no transient errors to report. A map that disappears with its
/// module is released when the reader is dropped.
pub struct EbpfRingBuf {
    inner: RingBuf<MapData>,
}

impl EbpfRingBuf {
    pub fn new(inner: RingBuf<MapData>) -> Self {
        Self { inner }
    }
}

impl RingBufReader for EbpfRingBuf {
    fn poll(&mut self, out: &mut Vec<Bytes>, max: usize) -> Result<usize, PollError> {
        let mut read = 0;
        while read < max {
            let Some(item) = self.inner.next() else {
                break;
            };
            // The item borrows the mmapped ring until dropped, which
            // releases its slot back to the kernel.
            out.push(Bytes::copy_from_slice(&item));
            read += 1;
        }
        Ok(read)
    }
}
