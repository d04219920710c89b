//! Trade Batch Aggregator
//!
//! Buffers same-key `trade` integrity events for a fixed window and hands
//! each window to a [`BatchProcessor`] exactly once.
//!
//! # Windowing
//!
//! The first event for a key opens a batch and arms a one-shot timer on the
//! tokio runtime. The timer is never reset, so worst-case latency is the
//! configured delay regardless of arrival pattern.
//!
//! # Ordering
//!
//! The processor runs while the pending map is locked. A later `add` for
//! the same key therefore cannot open a new batch until the previous flush
//! has completed. The processor must not call back into the aggregator.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, error, info};

use crate::application::ports::{BatchProcessor, FlushedBatch};
use crate::domain::payload::coerce::{isoformat, now_secs};
use crate::domain::payload::{BatchItem, BatchSummary, IntegrityEvent, TRADE_EVENT_TYPE};
use crate::domain::source::{SourceDefaults, StreamSource};
use crate::infrastructure::metrics;

/// Default batch window.
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(500);

// =============================================================================
// Batch Key
// =============================================================================

/// Coarse grouping key: every symbol of one exchange and minute shares it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchKey {
    stream: String,
    topic: String,
    hostname: String,
    interface: String,
    exchange: String,
    minute: Option<i64>,
    minute_bucket: i64,
    event_type: String,
}

impl BatchKey {
    /// Compute the key for an event.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(
        source: &StreamSource,
        topic: &str,
        event: &IntegrityEvent,
        defaults: &SourceDefaults,
    ) -> Self {
        let ts = event.timestamp.unwrap_or_else(now_secs);
        Self {
            stream: source.name.clone(),
            topic: topic.to_string(),
            hostname: defaults.hostname().to_string(),
            interface: defaults.interface().to_string(),
            exchange: event.exchange.to_lowercase(),
            minute: event.minute,
            minute_bucket: (ts / 60.0).floor() as i64,
            event_type: event.event_type.to_lowercase(),
        }
    }
}

impl std::fmt::Display for BatchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}|",
            self.stream, self.topic, self.hostname, self.interface, self.exchange
        )?;
        if let Some(minute) = self.minute {
            write!(f, "{minute}|")?;
        }
        write!(f, "{}|{}", self.minute_bucket, self.event_type)
    }
}

// =============================================================================
// Aggregator
// =============================================================================

struct PendingBatch {
    generation: u64,
    source: Arc<StreamSource>,
    topic: String,
    events: Vec<IntegrityEvent>,
    defaults: SourceDefaults,
    timer: AbortHandle,
}

struct Inner {
    delay: Duration,
    processor: Arc<dyn BatchProcessor>,
    pending: Mutex<HashMap<BatchKey, PendingBatch>>,
    generation: AtomicU64,
}

impl Inner {
    fn fire(&self, key: &BatchKey, generation: u64) {
        let mut pending = self.pending.lock();
        if pending.get(key).is_none_or(|b| b.generation != generation) {
            return;
        }
        if let Some(batch) = pending.remove(key) {
            self.run(key, batch);
        }
    }

    fn run(&self, key: &BatchKey, batch: PendingBatch) {
        let stream = batch.source.name.clone();
        let size = batch.events.len();
        let flushed = FlushedBatch {
            source: batch.source,
            topic: batch.topic,
            events: batch.events,
            defaults: batch.defaults,
        };

        debug!(stream = %stream, key = %key, size, "Flushing trade batch");
        metrics::record_batch_flushed(&stream, size);
        if let Err(e) = self.processor.process(flushed) {
            error!(stream = %stream, key = %key, error = %e, "Batch processor failed");
        }
    }
}

/// Delayed micro-batcher for `trade` integrity events.
#[derive(Clone)]
pub struct BatchAggregator {
    inner: Arc<Inner>,
    runtime: Handle,
}

impl std::fmt::Debug for BatchAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchAggregator")
            .field("delay", &self.inner.delay)
            .field("pending", &self.pending_len())
            .finish_non_exhaustive()
    }
}

impl BatchAggregator {
    /// Create an aggregator whose timers run on `runtime`.
    #[must_use]
    pub fn new(delay: Duration, processor: Arc<dyn BatchProcessor>, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                delay,
                processor,
                pending: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
            runtime,
        }
    }

    /// Configured window.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.inner.delay
    }

    /// Add an event, opening a batch for its key when none is pending.
    pub fn add(
        &self,
        source: &Arc<StreamSource>,
        topic: &str,
        event: IntegrityEvent,
        defaults: &SourceDefaults,
    ) {
        let key = BatchKey::new(source, topic, &event, defaults);
        let mut pending = self.inner.pending.lock();

        if let Some(batch) = pending.get_mut(&key) {
            batch.events.push(event);
            batch.defaults.merge(defaults);
            return;
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let timer_key = key.clone();
        let delay = self.inner.delay;
        let timer = self
            .runtime
            .spawn(async move {
                tokio::time::sleep(delay).await;
                inner.fire(&timer_key, generation);
            })
            .abort_handle();

        debug!(stream = %source.name, key = %key, "Opened trade batch");
        pending.insert(
            key,
            PendingBatch {
                generation,
                source: Arc::clone(source),
                topic: topic.to_string(),
                events: vec![event],
                defaults: defaults.clone(),
                timer,
            },
        );
    }

    /// Flush every pending batch now and cancel its timer.
    pub fn drain(&self) {
        let mut pending = self.inner.pending.lock();
        let count = pending.len();
        for (key, batch) in pending.drain() {
            batch.timer.abort();
            self.inner.run(&key, batch);
        }
        drop(pending);
        if count > 0 {
            info!(batches = count, "Drained pending trade batches");
        }
    }

    /// Number of open batches.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().len()
    }
}

// =============================================================================
// Normalization
// =============================================================================

/// Collapse a flushed batch into one aggregate integrity event.
#[must_use]
pub fn normalize_batch(events: &[IntegrityEvent]) -> IntegrityEvent {
    let exchange = first_non_empty(events.iter().map(|e| e.exchange.as_str()))
        .or_else(|| events.last().map(|e| e.exchange.clone()))
        .unwrap_or_default();

    let timestamp = events
        .iter()
        .filter_map(|e| e.timestamp)
        .reduce(f64::max)
        .unwrap_or_else(now_secs);

    let event_type = first_non_empty(events.iter().map(|e| e.event_type.as_str()))
        .unwrap_or_else(|| TRADE_EVENT_TYPE.to_string());
    let stage = first_non_empty(events.iter().map(|e| e.stage.as_str())).unwrap_or_default();
    let mode = events.iter().find_map(|e| e.mode.clone());

    let items: Vec<BatchItem> = events
        .iter()
        .map(|e| {
            let ts = e.timestamp.unwrap_or(timestamp);
            BatchItem {
                exchange: if e.exchange.is_empty() {
                    exchange.clone()
                } else {
                    e.exchange.clone()
                },
                symbol: e.symbol.clone(),
                status: e.status.clone(),
                detail: e.detail.clone(),
                minute: e.minute,
                timestamp: ts,
                timestamp_iso: isoformat(ts),
            }
        })
        .collect();

    let failed: Vec<&BatchItem> = items.iter().filter(|i| !i.is_ok()).collect();
    let size = items.len();
    let failures = failed.len();
    let detail = if failures == 0 {
        format!("{size} symbols ok")
    } else {
        let listing = failed
            .iter()
            .map(|i| match &i.detail {
                Some(detail) => format!("{} ({detail})", i.symbol),
                None => i.symbol.clone(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("{failures}/{size} failed: {listing}")
    };

    IntegrityEvent {
        exchange,
        symbol: String::new(),
        event_type,
        stage,
        mode,
        period: None,
        status: if failures == 0 { "ok" } else { "fail" }.to_string(),
        detail: Some(detail),
        timestamp: Some(timestamp),
        minute: events.iter().find_map(|e| e.minute),
        results: Vec::new(),
        batch: Some(BatchSummary {
            size,
            failures,
            items,
        }),
    }
}

fn first_non_empty<'a>(mut values: impl Iterator<Item = &'a str>) -> Option<String> {
    values.find(|v| !v.is_empty()).map(str::to_string)
}
