//! Demo binary: exports a single log record and waits for Ctrl-C

use otel_async_exporter::{Config, LogExporter, LogLevel, LogRecord, Resource, ResourceLogs};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> otel_async_exporter::Result<()> {
    // Initialize tracing
    initialize_tracing();

    info!("Starting async log exporter demo v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::from_env();

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    info!(
        "Exporter configuration - Collector: {}, Concurrency: {}, Queue capacity: {}",
        config.collector_addr,
        config.concurrency,
        config.queue_capacity()
    );

    let exporter = LogExporter::start_new(config).await?;

    let logs = ResourceLogs::new(
        Resource::new().with_tenant("default"),
        vec![LogRecord::new(LogLevel::Error, "hello, world")],
    );
    if let Err(e) = exporter.export_logs([logs]) {
        warn!("Demo record was not queued: {}", e);
    }

    info!("Record queued, press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
    }

    exporter.shutdown(SHUTDOWN_DEADLINE).await?;

    let metrics = exporter.metrics();
    info!(
        "Demo finished - exported: {}, failed: {}, dropped: {}",
        metrics.exported_records, metrics.failed_records, metrics.dropped_records
    );

    Ok(())
}

/// Initialize structured logging
fn initialize_tracing() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .json();

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&log_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
