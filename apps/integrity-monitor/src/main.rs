//! Integrity Monitor Binary
//!
//! Starts ingestion for every configured stream and keeps the in-memory
//! store and live-update fan-out running until shutdown.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin integrity-monitor
//! ```
//!
//! # Environment Variables
//!
//! ## Required (one of)
//! - `MONITOR_STREAMS`: JSON array of stream sources
//! - `MONITOR_STREAMS_FILE`: Path to a file holding the same JSON
//!
//! ## Optional
//! - `MONITOR_RETENTION_MODE`: count | age (default: count)
//! - `MONITOR_THROUGHPUT_POINTS` / `MONITOR_INTEGRITY_POINTS` / `MONITOR_ALERT_POINTS`
//! - `MONITOR_RETENTION_SECONDS`: Maximum point age under the age mode (default: 3600)
//! - `MONITOR_BATCH_DELAY_MS`: Trade batch window (default: 500)
//! - `MONITOR_POLL_INTERVAL_MS` / `MONITOR_JOIN_TIMEOUT_MS`: Worker timing
//! - `MONITOR_BACKLOG_WARN`: Delivery backlog warning threshold (default: 10000)
//! - `MONITOR_QUERY_LIMIT`: Default integrity query limit (default: 180)
//! - `MONITOR_METRICS_PORT`: Prometheus metrics port (default: 9090, 0 = no listener)
//! - `MONITOR_PRUNE_INTERVAL_SECS`: Age housekeeping interval (default: 30)
//! - `MONITOR_RECONNECT_*`: WebSocket reconnect backoff
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use integrity_monitor::domain::payload::coerce::now_secs;
use integrity_monitor::domain::store::MetricStore;
use integrity_monitor::infrastructure::telemetry;
use integrity_monitor::{MonitorConfig, Pipeline, WebSocketTransport, init_metrics};
use tokio::runtime::Handle;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting Integrity Monitor");

    let config = MonitorConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let _metrics_handle =
        init_metrics(config.server.metrics_port).context("failed to install metrics exporter")?;

    let runtime = Handle::current();
    let transport = WebSocketTransport::new(runtime.clone(), config.transport.reconnect());
    let pipeline = Pipeline::start(&config, &transport, &runtime)?;

    let shutdown_token = CancellationToken::new();
    let housekeeping = config.retention_policy().is_age().then(|| {
        tokio::spawn(housekeeping(
            Arc::clone(pipeline.store()),
            config.server.prune_interval,
            shutdown_token.clone(),
        ))
    });

    tracing::info!("Integrity monitor ready");

    await_shutdown(shutdown_token).await;

    if let Some(task) = housekeeping {
        let _ = task.await;
    }
    pipeline.shutdown().await;

    tracing::info!("Integrity monitor stopped");
    Ok(())
}

/// Periodically drop points older than the age bound.
async fn housekeeping(store: Arc<MetricStore>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period.max(Duration::from_secs(1)));
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {
                store.prune_expired(now_secs());
            }
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &MonitorConfig) {
    tracing::info!(
        streams = config.streams.len(),
        retention = config.retention.mode.as_str(),
        batch_delay_ms = config.ingest.batch_delay.as_millis(),
        metrics_port = config.server.metrics_port,
        "Configuration loaded"
    );
    for stream in &config.streams {
        tracing::debug!(
            stream = %stream.name,
            kind = stream.kind.as_str(),
            endpoint = %stream.endpoint,
            topic = %stream.topic,
            batch_trades = stream.batch_trades,
            "Stream configured"
        );
    }
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
