//! YAML configuration for the sink
//!
//! A configuration names the eBPF object to load, the programs to attach,
//! the polling cadence, and one span per kernel ring buffer. Spans are
//! immutable once loaded and are shared read-only with every task that
//! serves them.

use crate::decoder::Registry;
use crate::{Result, SinkError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 325;
pub const DEFAULT_METRICS_LISTEN: &str = "0.0.0.0:9435";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Compiled eBPF object, required by `run` only
    #[serde(default)]
    pub object: Option<PathBuf>,

    #[serde(default)]
    pub programs: Vec<ProgramConfig>,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Consecutive poll failures tolerated per span, 0 means unlimited
    #[serde(default)]
    pub max_consecutive_poll_errors: u32,

    #[serde(default)]
    pub metrics: MetricsConfig,

    pub spans: Vec<SpanConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_listen")]
    pub listen: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen: default_metrics_listen(),
        }
    }
}

/// An eBPF program to attach after the object is loaded.
///
/// `tracepoint` takes `category/name`, `kprobe` takes a kernel symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramConfig {
    pub name: String,
    #[serde(default)]
    pub tracepoint: Option<String>,
    #[serde(default)]
    pub kprobe: Option<String>,
}

/// One telemetry source bound to exactly one ring buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanConfig {
    pub name: String,
    pub ring_buf: String,
    #[serde(default)]
    pub labels: Vec<LabelConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelConfig {
    pub name: String,
    pub size: usize,
    #[serde(default)]
    pub decoders: Vec<DecoderConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoderConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub static_map: BTreeMap<String, String>,
    #[serde(default)]
    pub allow_unknown: bool,
}

impl DecoderConfig {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            static_map: BTreeMap::new(),
            allow_unknown: false,
        }
    }
}

impl SpanConfig {
    pub fn new(name: impl Into<String>, ring_buf: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ring_buf: ring_buf.into(),
            labels: Vec::new(),
        }
    }

    /// Total number of record bytes consumed by the configured labels
    pub fn record_size(&self) -> usize {
        self.labels.iter().map(|label| label.size).sum()
    }

    pub fn label_names(&self) -> Vec<&str> {
        self.labels.iter().map(|label| label.name.as_str()).collect()
    }
}

impl Config {
    /// Read, parse, and validate a configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&contents)?;
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(SinkError::Config(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.spans.is_empty() {
            return Err(SinkError::Config("no spans configured".to_string()));
        }

        let registry = Registry::new();
        let mut span_names = HashSet::new();
        let mut ring_bufs = HashSet::new();

        for span in &self.spans {
            if span.name.is_empty() {
                return Err(SinkError::Config("span with empty name".to_string()));
            }
            if !is_metric_safe(&span.name) {
                return Err(SinkError::Config(format!(
                    "span name {:?} must match [a-zA-Z_][a-zA-Z0-9_]*",
                    span.name
                )));
            }
            if !span_names.insert(span.name.as_str()) {
                return Err(SinkError::Config(format!(
                    "duplicate span name {:?}",
                    span.name
                )));
            }
            if span.ring_buf.is_empty() {
                return Err(SinkError::Config(format!(
                    "span {:?} has no ring_buf",
                    span.name
                )));
            }
            if !ring_bufs.insert(span.ring_buf.as_str()) {
                return Err(SinkError::Config(format!(
                    "ring_buf {:?} is used by more than one span",
                    span.ring_buf
                )));
            }

            let mut label_names = HashSet::new();
            for label in &span.labels {
                if label.size == 0 {
                    return Err(SinkError::Config(format!(
                        "label {:?} of span {:?} has zero size",
                        label.name, span.name
                    )));
                }
                if !is_metric_safe(&label.name) {
                    return Err(SinkError::Config(format!(
                        "label name {:?} of span {:?} must match [a-zA-Z_][a-zA-Z0-9_]*",
                        label.name, span.name
                    )));
                }
                if !label_names.insert(label.name.as_str()) {
                    return Err(SinkError::Config(format!(
                        "duplicate label {:?} in span {:?}",
                        label.name, span.name
                    )));
                }
                for decoder in &label.decoders {
                    if !registry.contains(&decoder.name) {
                        return Err(SinkError::UnknownDecoder {
                            name: decoder.name.clone(),
                            label: label.name.clone(),
                        });
                    }
                }
            }
        }

        for program in &self.programs {
            match (&program.tracepoint, &program.kprobe) {
                (Some(tracepoint), None) => {
                    if tracepoint.split_once('/').is_none() {
                        return Err(SinkError::Config(format!(
                            "program {:?}: tracepoint must be category/name, got {:?}",
                            program.name, tracepoint
                        )));
                    }
                }
                (None, Some(_)) => {}
                _ => {
                    return Err(SinkError::Config(format!(
                        "program {:?} must set exactly one of tracepoint or kprobe",
                        program.name
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Span and label names end up in Prometheus metric and label names
fn is_metric_safe(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_metrics_listen() -> String {
    DEFAULT_METRICS_LISTEN.to_string()
}
