pub mod collector;
pub mod exporter;

pub use collector::{PrometheusProvider, Provider, SinkMetrics};
pub use exporter::MetricsExporter;

use crate::Result;
use prometheus::{Registry, TextEncoder};

/// Registry for a running sink, with process metrics where supported
pub fn registry() -> Result<Registry> {
    let registry = Registry::new();

    #[cfg(target_os = "linux")]
    registry.register(Box::new(
        prometheus::process_collector::ProcessCollector::for_self(),
    ))?;

    Ok(registry)
}

/// Render every metric family in Prometheus text format
pub fn render(registry: &Registry) -> Result<String> {
    let mut body = String::new();
    TextEncoder::new().encode_utf8(&registry.gather(), &mut body)?;
    Ok(body)
}
