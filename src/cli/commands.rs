use crate::cli::Commands;
use crate::config::Config;
use crate::decoder::Registry;
use crate::ebpf::fake::FakeModule;
use crate::metrics::{self, PrometheusProvider, SinkMetrics};
use crate::pipeline::DecodePipeline;
use crate::sink::{Sink, SinkOptions};
use anyhow::{Context, Result};
use bytes::Bytes;
use prometheus::Registry as MetricsRegistry;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Run { config } => handle_run(&config).await,
        Commands::Check { config } => handle_check(&config),
        Commands::Simulate { config, records } => handle_simulate(&config, records).await,
    }
}

/// Stop every span, giving up on dispatchers still busy after `limit`.
///
/// Returns `false` if the deadline passed.
async fn stop_sink(sink: Sink, limit: Duration) -> bool {
    match tokio::time::timeout(limit, sink.shutdown()).await {
        Ok(exits) => {
            for (span, exit) in exits {
                info!("Span {} stopped: {}", span, exit);
            }
            true
        }
        Err(_) => {
            warn!("Timed out waiting for spans to drain");
            false
        }
    }
}

fn load_config(path: &Path) -> Result<Config> {
    Config::from_file(path).with_context(|| format!("Failed to load {}", path.display()))
}

/// Intake counters and the decode pipeline, both reporting into `registry`
fn build_pipeline(
    registry: &MetricsRegistry,
) -> Result<(Arc<SinkMetrics>, Arc<DecodePipeline>)> {
    let sink_metrics = Arc::new(SinkMetrics::new()?);
    sink_metrics.register(registry)?;

    let provider = Arc::new(PrometheusProvider::new(registry.clone()));
    let pipeline = Arc::new(DecodePipeline::new(
        Arc::new(Registry::new()),
        provider,
        Arc::clone(&sink_metrics),
    ));
    Ok((sink_metrics, pipeline))
}

fn handle_check(path: &Path) -> Result<()> {
    let config = load_config(path)?;

    let spans: Vec<_> = config
        .spans
        .iter()
        .map(|span| {
            json!({
                "name": span.name,
                "ring_buf": span.ring_buf,
                "labels": span.label_names(),
                "record_size": span.record_size(),
            })
        })
        .collect();

    let summary = json!({
        "object": config.object,
        "programs": config.programs.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
        "poll_interval_ms": config.poll_interval_ms,
        "max_consecutive_poll_errors": config.max_consecutive_poll_errors,
        "metrics_listen": config.metrics.listen,
        "spans": spans,
    });

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn handle_simulate(path: &Path, records: usize) -> Result<()> {
    let config = load_config(path)?;

    let registry = MetricsRegistry::new();
    let (sink_metrics, pipeline) = build_pipeline(&registry)?;

    let mut module = FakeModule::new();
    for span in &config.spans {
        let ring_buf = module.add_ring_buf(&span.ring_buf);
        let record = Bytes::from(vec![0u8; span.record_size()]);
        ring_buf.push_batch(std::iter::repeat(record).take(records));
        ring_buf.close();
    }

    let options = SinkOptions::from_config(&config, sink_metrics);
    let mut sink = Sink::start(&mut module, &config.spans, pipeline, &options)?;

    while sink.next_exit().await.is_some() {}
    stop_sink(sink, SHUTDOWN_TIMEOUT).await;

    print!("{}", metrics::render(&registry)?);
    Ok(())
}

#[cfg(not(target_os = "linux"))]
async fn handle_run(path: &Path) -> Result<()> {
    load_config(path)?;
    Err(crate::SinkError::UnsupportedPlatform(
        "`run` requires Linux to load eBPF programs; try `simulate`".to_string(),
    )
    .into())
}

#[cfg(target_os = "linux")]
async fn handle_run(path: &Path) -> Result<()> {
    use crate::ebpf::loader::EbpfModule;
    use crate::metrics::MetricsExporter;
    use tokio::signal;
    use tokio_util::sync::CancellationToken;

    let config = load_config(path)?;

    let registry = metrics::registry()?;
    let (sink_metrics, pipeline) = build_pipeline(&registry)?;

    let mut module = EbpfModule::load(&config)?;
    info!("Maps in object: {:?}", module.map_names());

    let options = SinkOptions::from_config(&config, sink_metrics);
    let mut sink = Sink::start(&mut module, &config.spans, pipeline, &options)?;

    let shutdown = CancellationToken::new();
    let exporter = MetricsExporter::new(registry, config.metrics.listen.clone());
    let mut server = tokio::spawn(exporter.serve(shutdown.clone()));

    info!("ringsink running. Press Ctrl+C to exit.");

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            exit = sink.next_exit() => match exit {
                Some((span, reason)) => {
                    warn!("Span {} stopped: {}", span, reason);
                }
                None => {
                    warn!("All spans stopped");
                    break;
                }
            },
            served = &mut server => {
                shutdown.cancel();
                stop_sink(sink, SHUTDOWN_TIMEOUT).await;
                return match served {
                    Ok(result) => result.context("Metrics server failed"),
                    Err(e) => Err(e).context("Metrics server task failed"),
                };
            }
        }
    }

    shutdown.cancel();
    stop_sink(sink, SHUTDOWN_TIMEOUT).await;

    match server.await {
        Ok(result) => result.context("Metrics server failed")?,
        Err(e) => warn!("Metrics server task failed: {}", e),
    }

    drop(module);
    info!("ringsink stopped");
    Ok(())
}
