//! Pipeline Integration Tests
//!
//! Drives the full pipeline over the in-memory transport: frames in,
//! store contents and sink messages out.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

use integrity_monitor::{
    ChannelSink, Frame, HubMessage, IntegrityQuery, MemoryTransport, MonitorConfig, Pipeline,
    StreamKind, StreamSource, Update,
};

const BUS: &str = "bus";

fn config(batch_delay: Duration) -> MonitorConfig {
    let mut config = MonitorConfig::new(vec![
        StreamSource::new("xdp-h1", StreamKind::Throughput, BUS, "xdp"),
        StreamSource::new("bn", StreamKind::Integrity, BUS, "integrity")
            .with_defaults(Some("h1"), Some("eth0")),
    ]);
    config.ingest.poll_interval = Duration::from_millis(20);
    config.ingest.batch_delay = batch_delay;
    config
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

async fn next_message(rx: &mut UnboundedReceiver<Arc<HubMessage>>) -> Arc<HubMessage> {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a hub message")
        .expect("sink channel closed")
}

fn trade(symbol: &str, status: &str) -> Frame {
    Frame::with_topic(
        "integrity",
        format!(
            r#"{{"exchange":"ex","symbol":"{symbol}","type":"trade","status":"{status}","timestamp":1000}}"#
        ),
    )
}

#[tokio::test]
async fn throughput_sample_reaches_store_and_sink() {
    let bus = MemoryTransport::new();
    let pipeline = Pipeline::start(&config(Duration::from_millis(100)), &bus, &Handle::current())
        .unwrap();

    let (sink, mut rx) = ChannelSink::new();
    assert!(pipeline.delivery().join(Arc::new(sink)));
    assert!(matches!(*next_message(&mut rx).await, HubMessage::Snapshot { .. }));

    bus.publish(
        BUS,
        Frame::with_topic(
            "xdp.h1",
            r#"{"hostname":"h1","interface":"eth0","timestamp":1000.0,
                "metrics":{"bps_avg":100,"bps_max":200}}"#,
        ),
    );

    let store = Arc::clone(pipeline.store());
    assert!(wait_until(|| store.latest_throughput().is_some()).await);
    let (key, point) = store.latest_throughput().unwrap();
    assert_eq!(key, "h1|eth0");
    assert!((point.avg_mbps - 0.0001).abs() < 1e-12);
    assert!((point.max_mbps - 0.0002).abs() < 1e-12);

    match &*next_message(&mut rx).await {
        HubMessage::Update(Update::Throughput { series }) => {
            assert_eq!(series.key, "h1|eth0");
            assert_eq!(series.topic, "xdp.h1");
        }
        other => panic!("unexpected message {other:?}"),
    }

    pipeline.shutdown().await;
}

#[tokio::test]
async fn failed_check_is_alerted_and_broadcast() {
    let bus = MemoryTransport::new();
    let pipeline = Pipeline::start(&config(Duration::from_millis(100)), &bus, &Handle::current())
        .unwrap();
    let (sink, mut rx) = ChannelSink::new();
    pipeline.delivery().join(Arc::new(sink));
    next_message(&mut rx).await;

    bus.publish(
        BUS,
        Frame::with_topic(
            "integrity",
            r#"{"exchange":"ex","symbol":"BTCUSDT","status":"fail","detail":"gap","timestamp":1000}"#,
        ),
    );

    let store = Arc::clone(pipeline.store());
    assert!(wait_until(|| !store.alerts().is_empty()).await);
    let alerts = store.alerts();
    assert_eq!(alerts.len(), 1);
    assert!(!alerts[0].is_ok);
    assert_eq!(alerts[0].detail.as_deref(), Some("gap"));

    match &*next_message(&mut rx).await {
        HubMessage::Update(Update::Integrity { series, alert }) => {
            assert!(!series.point.is_ok);
            assert!(alert.is_some());
        }
        other => panic!("unexpected message {other:?}"),
    }

    pipeline.shutdown().await;
}

#[tokio::test]
async fn trade_burst_becomes_one_batch() {
    let bus = MemoryTransport::new();
    let pipeline = Pipeline::start(&config(Duration::from_millis(100)), &bus, &Handle::current())
        .unwrap();

    bus.publish(BUS, trade("BTCUSDT", "ok"));
    tokio::time::sleep(Duration::from_millis(10)).await;
    bus.publish(BUS, trade("ETHUSDT", "fail"));

    let store = Arc::clone(pipeline.store());
    let trades = || store.query_integrity(&IntegrityQuery::default().event_type("trade"));
    assert!(wait_until(|| !trades().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(150)).await;

    let points = trades();
    assert_eq!(points.len(), 1);
    assert!(points[0].batch);
    assert_eq!(points[0].batch_size, 2);
    assert_eq!(points[0].batch_failures, 1);
    assert!(!points[0].is_ok);
    assert_eq!(store.alerts().len(), 1);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn shutdown_flushes_open_batches() {
    let bus = MemoryTransport::new();
    let pipeline =
        Pipeline::start(&config(Duration::from_secs(30)), &bus, &Handle::current()).unwrap();

    bus.publish(BUS, trade("BTCUSDT", "ok"));
    let aggregator = pipeline.aggregator().clone();
    assert!(wait_until(|| aggregator.pending_len() == 1).await);

    let store = Arc::clone(pipeline.store());
    pipeline.shutdown().await;

    let points = store.query_integrity(&IntegrityQuery::default());
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].batch_size, 1);
    assert_eq!(aggregator.pending_len(), 0);
}

#[tokio::test]
async fn malformed_frames_do_not_stop_ingestion() {
    let bus = MemoryTransport::new();
    let pipeline = Pipeline::start(&config(Duration::from_millis(100)), &bus, &Handle::current())
        .unwrap();

    bus.publish(BUS, Frame::with_topic("xdp.h1", "{oops"));
    bus.publish(BUS, Frame::with_topic("xdp.h1", r#"{"unrelated":true}"#));
    bus.publish(
        BUS,
        Frame::with_topic(
            "xdp.h1",
            r#"{"hostname":"h1","interface":"eth0","timestamp":1,"metrics":{"bps_avg":8}}"#,
        ),
    );

    let store = Arc::clone(pipeline.store());
    assert!(wait_until(|| store.latest_throughput().is_some()).await);

    let stats = pipeline
        .workers()
        .iter()
        .find(|w| w.source().kind == StreamKind::Throughput)
        .unwrap()
        .stats();
    assert_eq!(stats.messages(), 3);
    assert_eq!(stats.decode_errors(), 1);
    assert_eq!(stats.discarded(), 1);
    assert_eq!(stats.handler_errors(), 0);

    pipeline.shutdown().await;
}
