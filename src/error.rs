use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Error initializing ringbuf {ring_buf:?}: {cause}")]
    RingBufAttach { ring_buf: String, cause: String },

    #[error("Ringbuf {ring_buf:?} is already attached to span {span:?}")]
    AlreadyAttached { ring_buf: String, span: String },

    #[error("Failed to load eBPF module: {0}")]
    ModuleLoad(String),

    #[error("Failed to attach eBPF program {program:?}: {cause}")]
    ProgramAttach { program: String, cause: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown decoder {name:?} for label {label:?}")]
    UnknownDecoder { name: String, label: String },

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Unsupported feature on this system: {0}")]
    UnsupportedPlatform(String),
}

impl SinkError {
    /// Errors that must terminate the process instead of leaving a span
    /// without its data source.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SinkError::RingBufAttach { .. }
                | SinkError::AlreadyAttached { .. }
                | SinkError::ModuleLoad(_)
                | SinkError::ProgramAttach { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SinkError>;
