pub mod cli;
pub mod config;
pub mod decoder;
pub mod ebpf;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod sink;

pub use error::{Result, SinkError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
