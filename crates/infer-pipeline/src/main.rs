//! Inference Pipeline Demo - Main Entry Point

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use infer_context::{InferenceContext, MockContext};
use infer_pipeline::{init_logging, AppConfig, JsonLinesSink, StreamItem, SyntheticStream};
use infer_scheduler::InferPipeline;
use metrics_exporter_prometheus::PrometheusBuilder;
use surface_transform::HostConverter;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load(path.as_deref())?;
    init_logging(&config.logging)?;

    info!("=== Inference Pipeline v{} ===", env!("CARGO_PKG_VERSION"));

    if let Some(addr) = &config.metrics.prometheus_addr {
        let addr: SocketAddr = addr
            .parse()
            .with_context(|| format!("invalid prometheus address '{}'", addr))?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        info!(%addr, "Prometheus exporter listening");
    }

    if config.model.kind != config.scheduler.network_kind {
        warn!(
            model = config.model.kind.as_str(),
            scheduler = config.scheduler.network_kind.as_str(),
            "Model kind differs from scheduler network kind"
        );
    }

    let context = Arc::new(MockContext::new(config.model.clone()));
    let converter = Arc::new(HostConverter::new(context.network_info()?));
    let sink = Arc::new(JsonLinesSink::stdout());
    let pipeline = Arc::new(InferPipeline::new(
        config.scheduler.clone(),
        context,
        converter,
        sink,
    ));
    pipeline.start()?;

    let cancelled = Arc::new(AtomicBool::new(false));
    let mut feeder = {
        let pipeline = pipeline.clone();
        let cancelled = cancelled.clone();
        let stream = SyntheticStream::new(config.stream.clone());
        let interval = Duration::from_millis(config.stream.frame_interval_ms);
        tokio::task::spawn_blocking(move || feed(&pipeline, stream, interval, &cancelled))
    };

    tokio::select! {
        joined = &mut feeder => joined??,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Interrupted, draining pipeline");
            cancelled.store(true, Ordering::Relaxed);
            feeder.await??;
        }
    }

    let stopped = tokio::task::spawn_blocking({
        let pipeline = pipeline.clone();
        move || pipeline.stop()
    })
    .await?;
    if let Err(e) = stopped {
        error!("Failed to stop pipeline: {}", e);
    }

    info!(
        stats = %serde_json::to_string(&pipeline.stats())?,
        "Final statistics"
    );
    Ok(())
}

/// Push the stream through the pipeline until it ends or is cancelled
fn feed(
    pipeline: &InferPipeline,
    stream: SyntheticStream,
    interval: Duration,
    cancelled: &AtomicBool,
) -> Result<()> {
    for item in stream {
        if cancelled.load(Ordering::Relaxed) {
            break;
        }
        match item {
            StreamItem::Event(event) => pipeline.handle_event(event),
            StreamItem::Buffer(buffer) => {
                pipeline.submit(buffer)?;
                if !interval.is_zero() {
                    std::thread::sleep(interval);
                }
            }
        }
    }
    Ok(())
}
