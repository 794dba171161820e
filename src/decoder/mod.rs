//! Label decoders: turn record bytes into metric label values
//!
//! A span's labels are laid out back to back at the start of each record.
//! Every label runs its bytes through a chain of decoders; the first sees
//! the raw bytes and each later one sees the previous output.

mod builtin;

pub use builtin::{Hex, InetIp, StaticMap, Str, Uint};

use crate::config::{DecoderConfig, SpanConfig};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("record too short for label {label:?}: need bytes {offset}..{end}, record has {len}")]
    ShortRecord {
        label: String,
        offset: usize,
        end: usize,
        len: usize,
    },

    #[error("decoder {decoder:?} failed on label {label:?}: {reason}")]
    Failed {
        decoder: String,
        label: String,
        reason: String,
    },

    #[error("unknown decoder {0:?}")]
    Unknown(String),
}

pub trait Decoder: Send + Sync {
    fn decode(&self, input: &[u8], conf: &DecoderConfig) -> Result<Vec<u8>, String>;
}

/// Decoders by name
pub struct Registry {
    decoders: HashMap<&'static str, Box<dyn Decoder>>,
}

impl Registry {
    /// A registry holding every built-in decoder
    pub fn new() -> Self {
        let mut registry = Self {
            decoders: HashMap::new(),
        };
        registry.register("uint", Box::new(Uint));
        registry.register("string", Box::new(Str));
        registry.register("hex", Box::new(Hex));
        registry.register("inet_ip", Box::new(InetIp));
        registry.register("static_map", Box::new(StaticMap));
        registry
    }

    pub fn register(&mut self, name: &'static str, decoder: Box<dyn Decoder>) {
        self.decoders.insert(name, decoder);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.decoders.contains_key(name)
    }

    /// Decode every configured label of `span` out of `record`
    pub fn decode_labels(&self, record: &[u8], span: &SpanConfig) -> Result<Vec<String>, DecodeError> {
        let mut values = Vec::with_capacity(span.labels.len());
        let mut offset = 0;

        for label in &span.labels {
            let end = offset + label.size;
            let input = record.get(offset..end).ok_or_else(|| DecodeError::ShortRecord {
                label: label.name.clone(),
                offset,
                end,
                len: record.len(),
            })?;

            let mut value = input.to_vec();
            for conf in &label.decoders {
                let decoder = self
                    .decoders
                    .get(conf.name.as_str())
                    .ok_or_else(|| DecodeError::Unknown(conf.name.clone()))?;
                value = decoder
                    .decode(&value, conf)
                    .map_err(|reason| DecodeError::Failed {
                        decoder: conf.name.clone(),
                        label: label.name.clone(),
                        reason,
                    })?;
            }

            values.push(String::from_utf8_lossy(&value).into_owned());
            offset = end;
        }

        Ok(values)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LabelConfig;

    fn label(name: &str, size: usize, decoders: &[&str]) -> LabelConfig {
        LabelConfig {
            name: name.to_string(),
            size,
            decoders: decoders.iter().map(|d| DecoderConfig::named(d)).collect(),
        }
    }

    fn sched_span() -> SpanConfig {
        let mut span = SpanConfig::new("sched", "events");
        span.labels = vec![label("pid", 4, &["uint"]), label("comm", 16, &["string"])];
        span
    }

    #[test]
    fn test_decode_labels_in_order() {
        let mut record = 4242u32.to_ne_bytes().to_vec();
        let mut comm = [0u8; 16];
        comm[..4].copy_from_slice(b"bash");
        record.extend_from_slice(&comm);

        let values = Registry::new().decode_labels(&record, &sched_span()).unwrap();
        assert_eq!(values, vec!["4242", "bash"]);
    }

    #[test]
    fn test_trailing_bytes_are_ignored() {
        let mut record = 7u32.to_ne_bytes().to_vec();
        record.extend_from_slice(&[0u8; 16]);
        record.extend_from_slice(b"payload");

        let values = Registry::new().decode_labels(&record, &sched_span()).unwrap();
        assert_eq!(values, vec!["7", ""]);
    }

    #[test]
    fn test_short_record() {
        let err = Registry::new()
            .decode_labels(&[1, 2, 3, 4, 5], &sched_span())
            .unwrap_err();
        assert_eq!(
            err,
            DecodeError::ShortRecord {
                label: "comm".to_string(),
                offset: 4,
                end: 20,
                len: 5,
            }
        );
    }

    #[test]
    fn test_decoder_chain() {
        let mut span = SpanConfig::new("exit", "events");
        let mut to_name = DecoderConfig::named("static_map");
        to_name.static_map.insert("1".to_string(), "SIGHUP".to_string());
        span.labels = vec![LabelConfig {
            name: "signal".to_string(),
            size: 1,
            decoders: vec![DecoderConfig::named("uint"), to_name],
        }];

        let values = Registry::new().decode_labels(&[1], &span).unwrap();
        assert_eq!(values, vec!["SIGHUP"]);

        let err = Registry::new().decode_labels(&[9], &span).unwrap_err();
        assert!(matches!(err, DecodeError::Failed { ref decoder, .. } if decoder == "static_map"));
    }

    #[test]
    fn test_label_without_decoders_keeps_raw_bytes() {
        let mut span = SpanConfig::new("raw", "events");
        span.labels = vec![label("tag", 3, &[])];

        let values = Registry::new().decode_labels(b"abc", &span).unwrap();
        assert_eq!(values, vec!["abc"]);
    }

    #[test]
    fn test_custom_decoder() {
        struct Upper;
        impl Decoder for Upper {
            fn decode(&self, input: &[u8], _conf: &DecoderConfig) -> Result<Vec<u8>, String> {
                Ok(input.to_ascii_uppercase())
            }
        }

        let mut registry = Registry::new();
        registry.register("upper", Box::new(Upper));
        let mut span = SpanConfig::new("raw", "events");
        span.labels = vec![label("tag", 3, &["upper"])];

        assert!(registry.contains("upper"));
        assert_eq!(registry.decode_labels(b"abc", &span).unwrap(), vec!["ABC"]);
    }
}
