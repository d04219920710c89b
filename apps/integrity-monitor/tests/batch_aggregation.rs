//! Batch Aggregation Integration Tests
//!
//! Timing and grouping behaviour of the trade batch aggregator against a
//! recording processor.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::cast_precision_loss)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::json;
use tokio::runtime::Handle;

use integrity_monitor::application::ports::{BatchProcessor, FlushedBatch};
use integrity_monitor::{
    BatchAggregator, HandlerError, IntegrityEvent, StreamKind, StreamSource, normalize_batch,
};

#[derive(Default)]
struct Recorder {
    batches: Mutex<Vec<(Instant, FlushedBatch)>>,
}

impl BatchProcessor for Recorder {
    fn process(&self, batch: FlushedBatch) -> Result<(), HandlerError> {
        self.batches.lock().push((Instant::now(), batch));
        Ok(())
    }
}

fn source() -> Arc<StreamSource> {
    Arc::new(
        StreamSource::new("bn", StreamKind::Integrity, "bus", "").with_defaults(Some("h1"), None),
    )
}

fn trade(exchange: &str, symbol: &str, timestamp: f64) -> IntegrityEvent {
    let value = json!({
        "exchange": exchange,
        "symbol": symbol,
        "type": "trade",
        "status": "ok",
        "timestamp": timestamp,
    });
    IntegrityEvent::from_map(value.as_object().unwrap())
}

#[tokio::test]
async fn burst_is_flushed_once_after_the_window() {
    let recorder = Arc::new(Recorder::default());
    let delay = Duration::from_millis(100);
    let aggregator = BatchAggregator::new(delay, recorder.clone(), Handle::current());
    let source = source();
    let defaults = source.defaults();

    let first = Instant::now();
    for (i, symbol) in ["A", "B", "C", "D"].iter().enumerate() {
        aggregator.add(&source, "t", trade("ex", symbol, 1000.0 + i as f64), &defaults);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    let batches = recorder.batches.lock();
    assert_eq!(batches.len(), 1);
    let (flushed_at, batch) = &batches[0];
    assert!(flushed_at.duration_since(first) >= delay);
    let symbols: Vec<&str> = batch.events.iter().map(|e| e.symbol.as_str()).collect();
    assert_eq!(symbols, ["A", "B", "C", "D"]);
    assert_eq!(batch.topic, "t");
    assert_eq!(aggregator.pending_len(), 0);
}

#[tokio::test]
async fn exchanges_and_minutes_split_batches() {
    let recorder = Arc::new(Recorder::default());
    let aggregator =
        BatchAggregator::new(Duration::from_millis(50), recorder.clone(), Handle::current());
    let source = source();
    let defaults = source.defaults();

    aggregator.add(&source, "t", trade("ex", "A", 1000.0), &defaults);
    aggregator.add(&source, "t", trade("EX", "B", 1010.0), &defaults);
    aggregator.add(&source, "t", trade("other", "C", 1000.0), &defaults);
    aggregator.add(&source, "t", trade("ex", "D", 1100.0), &defaults);
    assert_eq!(aggregator.pending_len(), 3);

    tokio::time::sleep(Duration::from_millis(150)).await;
    let mut sizes: Vec<usize> = recorder
        .batches
        .lock()
        .iter()
        .map(|(_, b)| b.events.len())
        .collect();
    sizes.sort_unstable();
    assert_eq!(sizes, [1, 1, 2]);
}

#[tokio::test]
async fn events_after_a_flush_open_a_new_batch() {
    let recorder = Arc::new(Recorder::default());
    let aggregator =
        BatchAggregator::new(Duration::from_millis(30), recorder.clone(), Handle::current());
    let source = source();
    let defaults = source.defaults();

    aggregator.add(&source, "t", trade("ex", "A", 1000.0), &defaults);
    tokio::time::sleep(Duration::from_millis(100)).await;
    aggregator.add(&source, "t", trade("ex", "B", 1001.0), &defaults);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(recorder.batches.lock().len(), 2);
}

#[test]
fn normalized_batch_summarizes_failures() {
    let mut failing = trade("ex", "ETHUSDT", 1000.0);
    failing.status = "fail".to_string();
    failing.detail = Some("gap".to_string());
    let events = vec![trade("ex", "BTCUSDT", 1000.0), failing];

    let merged = normalize_batch(&events);
    assert_eq!(merged.status, "fail");
    assert_eq!(merged.event_type, "trade");
    assert_eq!(merged.exchange, "ex");
    let summary = merged.batch.unwrap();
    assert_eq!(summary.size, 2);
    assert_eq!(summary.failures, 1);
}
