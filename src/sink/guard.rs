//! Ring buffer attachment, checked before anything polls

use crate::config::SpanConfig;
use crate::ebpf::{Module, RingBufReader};
use crate::{Result, SinkError};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Attach a reader to the span's ring buffer.
///
/// Any failure is fatal for the span and carries the ring buffer name.
pub fn attach(module: &mut dyn Module, span: &SpanConfig) -> Result<Box<dyn RingBufReader>> {
    if span.ring_buf.is_empty() {
        return Err(SinkError::RingBufAttach {
            ring_buf: span.ring_buf.clone(),
            cause: format!("span {:?} names no ring buffer", span.name),
        });
    }

    let reader = module
        .ring_buf(&span.ring_buf)
        .map_err(|e| SinkError::RingBufAttach {
            ring_buf: span.ring_buf.clone(),
            cause: e.to_string(),
        })?;

    info!(span = %span.name, "Attached ring buffer {}", span.ring_buf);
    Ok(reader)
}

/// Attach every span or none.
///
/// On failure the readers attached so far are dropped before returning.
pub fn attach_all(
    module: &mut dyn Module,
    spans: &[Arc<SpanConfig>],
) -> Result<Vec<(Arc<SpanConfig>, Box<dyn RingBufReader>)>> {
    let mut owners: HashMap<&str, &str> = HashMap::new();
    let mut attached = Vec::with_capacity(spans.len());

    for span in spans {
        if let Some(owner) = owners.insert(span.ring_buf.as_str(), span.name.as_str()) {
            return Err(SinkError::AlreadyAttached {
                ring_buf: span.ring_buf.clone(),
                span: owner.to_string(),
            });
        }

        let reader = attach(module, span)?;
        attached.push((Arc::clone(span), reader));
    }

    Ok(attached)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ebpf::fake::FakeModule;
    use crate::ebpf::AttachError;

    #[test]
    fn test_missing_ring_buf_names_buffer_and_cause() {
        let mut module = FakeModule::new();
        module.add_ring_buf("other");

        let err = attach(&mut module, &SpanConfig::new("sched", "events"))
            .err()
            .unwrap();
        let message = err.to_string();

        assert!(err.is_fatal());
        assert!(message.contains("\"events\""), "{}", message);
        assert!(message.contains("map not found"), "{}", message);
        assert!(message.contains("other"), "{}", message);
    }

    #[test]
    fn test_incompatible_map() {
        let mut module = FakeModule::new();
        module.fail_ring_buf(
            "events",
            AttachError::Incompatible("map type is hash".to_string()),
        );

        let err = attach(&mut module, &SpanConfig::new("sched", "events"))
            .err()
            .unwrap();
        assert!(matches!(err, SinkError::RingBufAttach { ref ring_buf, .. } if ring_buf == "events"));
        assert!(err.to_string().contains("map type is hash"));
    }

    #[test]
    fn test_attach_all_rejects_shared_ring_buf() {
        let mut module = FakeModule::new();
        let events = module.add_ring_buf("events");
        let spans = vec![
            Arc::new(SpanConfig::new("a", "events")),
            Arc::new(SpanConfig::new("b", "events")),
        ];

        let err = attach_all(&mut module, &spans).err().unwrap();
        assert!(matches!(err, SinkError::AlreadyAttached { ref span, .. } if span == "a"));
        assert_eq!(events.polls(), 0);
    }

    #[test]
    fn test_attach_all_is_all_or_nothing() {
        let mut module = FakeModule::new();
        let first = module.add_ring_buf("first");
        let spans = vec![
            Arc::new(SpanConfig::new("a", "first")),
            Arc::new(SpanConfig::new("b", "missing")),
        ];

        assert!(attach_all(&mut module, &spans).is_err());
        assert_eq!(first.polls(), 0);
    }
}
