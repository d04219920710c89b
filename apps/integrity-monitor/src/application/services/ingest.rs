//! Ingest Handler
//!
//! Routes decoded payloads into the metric store and schedules the
//! resulting updates onto the delivery context. Single `trade` events on
//! batching streams detour through the [`BatchAggregator`].

use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value};
use tracing::debug;

use super::aggregator::{BatchAggregator, normalize_batch};
use crate::application::ports::{
    BatchProcessor, FlushedBatch, HandlerError, PayloadHandler, UpdatePublisher,
};
use crate::domain::messages::{HubMessage, Update};
use crate::domain::payload::{IntegrityEvent, Payload, ThroughputSample};
use crate::domain::source::{SourceDefaults, StreamSource};
use crate::domain::store::MetricStore;
use crate::infrastructure::metrics;

// =============================================================================
// Series Writer
// =============================================================================

/// Store-then-publish step shared by the handler and the batch processor.
pub struct SeriesWriter {
    store: Arc<MetricStore>,
    publisher: Arc<dyn UpdatePublisher>,
}

impl std::fmt::Debug for SeriesWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeriesWriter").finish_non_exhaustive()
    }
}

impl SeriesWriter {
    /// Create a writer.
    #[must_use]
    pub fn new(store: Arc<MetricStore>, publisher: Arc<dyn UpdatePublisher>) -> Self {
        Self { store, publisher }
    }

    /// Store a throughput sample and publish it.
    pub fn write_throughput(&self, source: &StreamSource, topic: &str, mut sample: ThroughputSample) {
        let defaults = source.defaults();
        if sample.hostname.is_empty() {
            sample.hostname = defaults.hostname().to_string();
        }
        if sample.interface.is_empty() {
            sample.interface = defaults.interface().to_string();
        }
        let (key, point) = self.store.add_throughput(&sample, &source.name);
        self.publish(HubMessage::Update(Update::throughput(key, topic, point)));
    }

    /// Store an integrity event and publish every resulting update.
    pub fn write_integrity(
        &self,
        source: &StreamSource,
        topic: &str,
        event: &IntegrityEvent,
        defaults: &SourceDefaults,
    ) {
        for update in self.store.add_integrity(event, &source.name, defaults) {
            self.publish(HubMessage::Update(Update::integrity(
                update.key,
                topic,
                update.point,
                update.alerted,
            )));
        }
    }

    fn publish(&self, message: HubMessage) {
        if !self.publisher.schedule(message) {
            debug!("Delivery context closed, dropping update");
        }
    }
}

impl BatchProcessor for SeriesWriter {
    fn process(&self, batch: FlushedBatch) -> Result<(), HandlerError> {
        if batch.events.is_empty() {
            return Ok(());
        }
        let event = normalize_batch(&batch.events);
        self.write_integrity(&batch.source, &batch.topic, &event, &batch.defaults);
        Ok(())
    }
}

// =============================================================================
// Payload Handler
// =============================================================================

/// Handler registered with every ingestion worker.
#[derive(Debug)]
pub struct IngestHandler {
    writer: Arc<SeriesWriter>,
    aggregator: Option<BatchAggregator>,
}

impl IngestHandler {
    /// Create a handler. Without an aggregator every event is stored directly.
    #[must_use]
    pub const fn new(writer: Arc<SeriesWriter>, aggregator: Option<BatchAggregator>) -> Self {
        Self { writer, aggregator }
    }
}

impl PayloadHandler for IngestHandler {
    fn handle(
        &self,
        source: &Arc<StreamSource>,
        topic: &str,
        payload: Map<String, Value>,
    ) -> Result<(), HandlerError> {
        let started = Instant::now();
        let result = match Payload::classify(source.kind, payload) {
            Payload::Throughput(sample) => {
                self.writer.write_throughput(source, topic, sample);
                Ok(())
            }
            Payload::Integrity(event) => {
                let defaults = source.defaults();
                match &self.aggregator {
                    Some(aggregator) if source.batch_trades && event.is_batchable_trade() => {
                        aggregator.add(source, topic, event, &defaults);
                    }
                    _ => self.writer.write_integrity(source, topic, &event, &defaults),
                }
                Ok(())
            }
            Payload::Unknown(_) => Err(HandlerError::UnrecognizedPayload {
                kind: source.kind.as_str(),
            }),
        };
        metrics::record_handler_duration(&source.name, started.elapsed());
        result
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::runtime::Handle;

    use super::*;
    use crate::application::ports::MockUpdatePublisher;
    use crate::domain::source::StreamKind;

    #[derive(Default)]
    struct Collect {
        messages: Mutex<Vec<HubMessage>>,
    }

    impl UpdatePublisher for Collect {
        fn schedule(&self, message: HubMessage) -> bool {
            self.messages.lock().push(message);
            true
        }
    }

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn integrity_source() -> Arc<StreamSource> {
        Arc::new(
            StreamSource::new("bn", StreamKind::Integrity, "ws://h:1", "")
                .with_defaults(Some("h1"), Some("eth0")),
        )
    }

    #[test]
    fn throughput_payload_is_stored_and_published() {
        let store = Arc::new(MetricStore::default());
        let publisher = Arc::new(Collect::default());
        let handler = IngestHandler::new(
            Arc::new(SeriesWriter::new(store.clone(), publisher.clone())),
            None,
        );
        let source = Arc::new(StreamSource::new(
            "xdp",
            StreamKind::Throughput,
            "ws://h:1",
            "xdp",
        ));

        handler
            .handle(
                &source,
                "xdp",
                object(json!({"hostname": "h1", "interface": "eth0", "metrics": {"bps_avg": 8}})),
            )
            .unwrap();

        assert_eq!(store.throughput_snapshot().len(), 1);
        let messages = publisher.messages.lock();
        match &messages[0] {
            HubMessage::Update(update) => {
                assert_eq!(update.scope(), "throughput");
                assert_eq!(update.key(), "h1|eth0");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_payload_is_an_error() {
        let mut publisher = MockUpdatePublisher::new();
        publisher.expect_schedule().never();
        let handler = IngestHandler::new(
            Arc::new(SeriesWriter::new(
                Arc::new(MetricStore::default()),
                Arc::new(publisher),
            )),
            None,
        );
        let err = handler
            .handle(&integrity_source(), "", object(json!({"hello": "world"})))
            .unwrap_err();
        assert!(matches!(
            err,
            HandlerError::UnrecognizedPayload { kind: "integrity" }
        ));
    }

    #[test]
    fn closed_publisher_is_not_an_error() {
        let mut publisher = MockUpdatePublisher::new();
        publisher.expect_schedule().times(1).return_const(false);
        let handler = IngestHandler::new(
            Arc::new(SeriesWriter::new(
                Arc::new(MetricStore::default()),
                Arc::new(publisher),
            )),
            None,
        );
        handler
            .handle(
                &integrity_source(),
                "",
                object(json!({"exchange": "ex", "status": "ok"})),
            )
            .unwrap();
    }

    #[tokio::test]
    async fn trades_are_batched_and_others_are_not() {
        let store = Arc::new(MetricStore::default());
        let publisher = Arc::new(Collect::default());
        let writer = Arc::new(SeriesWriter::new(store.clone(), publisher.clone()));
        let aggregator =
            BatchAggregator::new(Duration::from_millis(50), writer.clone(), Handle::current());
        let handler = IngestHandler::new(writer, Some(aggregator));
        let source = integrity_source();

        for symbol in ["BTCUSDT", "ETHUSDT"] {
            handler
                .handle(
                    &source,
                    "",
                    object(json!({
                        "exchange": "ex", "symbol": symbol, "type": "trade",
                        "status": "ok", "timestamp": 1000
                    })),
                )
                .unwrap();
        }
        handler
            .handle(
                &source,
                "",
                object(json!({"exchange": "ex", "type": "depth", "status": "ok", "timestamp": 1000})),
            )
            .unwrap();
        assert_eq!(publisher.messages.lock().len(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let series = store.integrity_snapshot();
        let batch = &series["bn|h1|eth0|ex|trade"];
        assert_eq!(batch.len(), 1);
        assert!(batch[0].batch);
        assert_eq!(batch[0].batch_size, 2);
        assert_eq!(publisher.messages.lock().len(), 2);
    }

    #[test]
    fn non_batching_stream_stores_trades_directly() {
        let store = Arc::new(MetricStore::default());
        let writer = Arc::new(SeriesWriter::new(
            store.clone(),
            Arc::new(Collect::default()),
        ));
        let handler = IngestHandler::new(writer, None);
        let source = Arc::new(
            StreamSource::new("bn", StreamKind::Integrity, "ws://h:1", "").with_batch_trades(false),
        );
        handler
            .handle(
                &source,
                "",
                object(json!({"exchange": "ex", "symbol": "A", "type": "trade", "status": "ok"})),
            )
            .unwrap();
        let series = store.integrity_snapshot();
        assert!(!series["bn|ex|trade"][0].batch);
    }
}
