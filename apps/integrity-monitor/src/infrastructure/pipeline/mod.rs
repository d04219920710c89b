//! Pipeline Wiring
//!
//! Builds the store, delivery context, aggregator and one ingestion worker
//! per configured stream, and tears them down in order.
//!
//! # Shutdown Order
//!
//! 1. stop every worker (cancel and close its subscription)
//! 2. join each worker with a bounded timeout
//! 3. flush pending trade batches
//! 4. close the delivery context and wait for its queue to drain

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::application::ports::{Transport, TransportError};
use crate::application::services::{BatchAggregator, IngestHandler, SeriesWriter};
use crate::domain::store::MetricStore;
use crate::infrastructure::broadcast::DeliveryContext;
use crate::infrastructure::config::MonitorConfig;
use crate::infrastructure::ingest::IngestionWorker;

/// Startup failure.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A stream could not be subscribed.
    #[error("stream {stream}: {source}")]
    Subscribe {
        /// Stream name.
        stream: String,
        /// Transport error.
        source: TransportError,
    },

    /// A worker thread could not be created.
    #[error("stream {stream}: failed to spawn worker: {source}")]
    Spawn {
        /// Stream name.
        stream: String,
        /// OS error.
        source: std::io::Error,
    },
}

/// A running monitor pipeline.
#[derive(Debug)]
pub struct Pipeline {
    store: Arc<MetricStore>,
    delivery: Arc<DeliveryContext>,
    aggregator: BatchAggregator,
    workers: Vec<IngestionWorker>,
    join_timeout: Duration,
}

impl Pipeline {
    /// Wire everything and start one worker per stream.
    ///
    /// # Errors
    ///
    /// Fails on the first stream that cannot be subscribed or spawned;
    /// workers already started are stopped.
    pub fn start(
        config: &MonitorConfig,
        transport: &dyn Transport,
        runtime: &Handle,
    ) -> Result<Self, PipelineError> {
        let policy = config.retention_policy();
        info!(
            streams = config.streams.len(),
            retention = config.retention.mode.as_str(),
            batch_delay_ms = config.ingest.batch_delay.as_millis(),
            "Starting pipeline"
        );

        let store = Arc::new(MetricStore::new(policy));
        let delivery = Arc::new(DeliveryContext::spawn(
            Arc::clone(&store),
            config.delivery.backlog_warn,
            runtime,
        ));
        let writer = Arc::new(SeriesWriter::new(Arc::clone(&store), delivery.clone()));
        let aggregator =
            BatchAggregator::new(config.ingest.batch_delay, writer.clone(), runtime.clone());
        let handler = Arc::new(IngestHandler::new(writer, Some(aggregator.clone())));

        let mut workers = Vec::with_capacity(config.streams.len());
        for stream in &config.streams {
            let source = Arc::new(stream.clone());
            let subscription = transport
                .subscribe(&source.endpoint, &source.topic)
                .map_err(|source_err| PipelineError::Subscribe {
                    stream: source.name.clone(),
                    source: source_err,
                })?;
            let worker = IngestionWorker::spawn(
                Arc::clone(&source),
                subscription,
                handler.clone(),
                config.ingest.poll_interval,
            )
            .map_err(|source_err| PipelineError::Spawn {
                stream: source.name.clone(),
                source: source_err,
            })?;
            workers.push(worker);
        }

        info!(workers = workers.len(), "Pipeline started");
        Ok(Self {
            store,
            delivery,
            aggregator,
            workers,
            join_timeout: config.ingest.join_timeout,
        })
    }

    /// Shared store for reads.
    #[must_use]
    pub fn store(&self) -> &Arc<MetricStore> {
        &self.store
    }

    /// Delivery context for registering sinks.
    #[must_use]
    pub fn delivery(&self) -> &Arc<DeliveryContext> {
        &self.delivery
    }

    /// Trade batch aggregator.
    #[must_use]
    pub const fn aggregator(&self) -> &BatchAggregator {
        &self.aggregator
    }

    /// Running workers.
    #[must_use]
    pub fn workers(&self) -> &[IngestionWorker] {
        &self.workers
    }

    /// Stop ingestion, flush batches and drain delivery.
    pub async fn shutdown(self) {
        info!(workers = self.workers.len(), "Shutting down pipeline");
        for worker in &self.workers {
            worker.stop();
        }

        let mut abandoned = 0_usize;
        for worker in self.workers {
            if !worker.join(self.join_timeout).await {
                abandoned += 1;
            }
        }
        if abandoned > 0 {
            warn!(abandoned, "Some ingestion workers were abandoned");
        }

        self.aggregator.drain();
        self.delivery.close().await;
        info!("Pipeline stopped");
    }
}
