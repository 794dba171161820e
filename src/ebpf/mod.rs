pub mod fake;
#[cfg(target_os = "linux")]
pub mod loader;
#[cfg(target_os = "linux")]
pub mod maps;

use bytes::Bytes;
use thiserror::Error;

/// A loaded kernel program module whose ring buffers can be looked up by name
pub trait Module {
    /// Attach a reader to the named ring buffer.
    ///
    /// A ring buffer can be handed out once; the returned reader owns it.
    fn ring_buf(&mut self, name: &str) -> Result<Box<dyn RingBufReader>, AttachError>;
}

/// A live attachment to one kernel ring buffer
pub trait RingBufReader: Send {
    /// Append at most `max` pending records to `out`, in publish order,
    /// and return how many were appended. On error nothing is appended.
    fn poll(&mut self, out: &mut Vec<Bytes>, max: usize) -> Result<usize, PollError>;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttachError {
    #[error("map not found (available maps: {available:?})")]
    NotFound { available: Vec<String> },

    #[error("map is not a ring buffer: {0}")]
    Incompatible(String),

    #[error("kernel resource exhausted: {0}")]
    ResourceExhausted(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollErrorKind {
    /// Worth retrying on the next interval
    Transient,
    /// The ring buffer or its module is gone
    Gone,
}

impl PollErrorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            PollErrorKind::Transient => "transient",
            PollErrorKind::Gone => "gone",
        }
    }
}

impl std::fmt::Display for PollErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} poll error: {message}")]
pub struct PollError {
    pub kind: PollErrorKind,
    pub message: String,
}

impl PollError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: PollErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn gone(message: impl Into<String>) -> Self {
        Self {
            kind: PollErrorKind::Gone,
            message: message.into(),
        }
    }

    pub fn is_gone(&self) -> bool {
        self.kind == PollErrorKind::Gone
    }
}
