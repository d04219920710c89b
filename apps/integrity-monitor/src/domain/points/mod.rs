//! Series Points and Composite Keys
//!
//! Points are built once from a decoded payload and never mutated. The
//! store keeps them behind `Arc` so the same point can sit in its series,
//! the alert log and outgoing updates without copying.

use serde::Serialize;

use super::payload::coerce::{isoformat, now_secs};
use super::payload::{
    BatchItem, IntegrityEvent, SampleWindow, SymbolResult, ThroughputSample,
};
use super::source::SourceDefaults;

/// Key used when every integrity key component is empty.
pub const SENTINEL_KEY: &str = "integrity";

/// Separator between key components.
pub const KEY_SEPARATOR: &str = "|";

/// Anything with a seconds timestamp can live in a bounded series.
pub trait TimedPoint {
    /// Point timestamp in seconds.
    fn timestamp(&self) -> f64;
}

// =============================================================================
// Throughput
// =============================================================================

/// One ingested bandwidth sample window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[allow(non_snake_case)]
pub struct ThroughputPoint {
    /// Measuring host.
    pub hostname: String,
    /// Measured interface.
    pub interface: String,
    /// Sample timestamp (seconds).
    pub timestamp: f64,
    /// RFC 3339 timestamp.
    pub timestamp_iso: String,
    /// Average bits per second.
    pub avg_bps: f64,
    /// Peak bits per second.
    pub max_bps: f64,
    /// Average megabits per second.
    pub avg_mbps: f64,
    /// Peak megabits per second.
    pub max_mbps: f64,
    /// Average megabytes per second.
    pub avg_MBps: f64,
    /// Peak megabytes per second.
    pub max_MBps: f64,
    /// Bytes in the window.
    pub bytes_total: u64,
    /// Packets in the window.
    pub packets_total: u64,
    /// Attach mode.
    pub mode: Option<String>,
    /// Sampling window.
    pub window: Option<SampleWindow>,
    /// Ticks in the window.
    pub sample_count: u64,
    /// Stream name.
    pub source: String,
    /// Metrics field that supplied `avg_bps`.
    pub avg_source: Option<&'static str>,
    /// Metrics field that supplied `max_bps`.
    pub max_source: Option<&'static str>,
}

impl ThroughputPoint {
    /// Build a point from a sample. Never fails; rates are clamped to `>= 0`.
    #[must_use]
    pub fn from_sample(sample: &ThroughputSample, source: &str) -> Self {
        let timestamp = sample.timestamp.unwrap_or_else(now_secs);
        let avg_bps = sample.avg.map_or(0.0, |r| r.bps).max(0.0);
        let max_bps = sample.max.map_or(0.0, |r| r.bps).max(0.0);

        Self {
            hostname: sample.hostname.clone(),
            interface: sample.interface.clone(),
            timestamp,
            timestamp_iso: sample
                .timestamp_iso
                .clone()
                .unwrap_or_else(|| isoformat(timestamp)),
            avg_bps,
            max_bps,
            avg_mbps: avg_bps / 1_000_000.0,
            max_mbps: max_bps / 1_000_000.0,
            avg_MBps: avg_bps / 8_000_000.0,
            max_MBps: max_bps / 8_000_000.0,
            bytes_total: sample.bytes_total,
            packets_total: sample.packets_total,
            mode: sample.mode.clone(),
            window: sample.window,
            sample_count: sample.samples,
            source: source.to_string(),
            avg_source: sample.avg.map(|r| r.field),
            max_source: sample.max.map(|r| r.field),
        }
    }

    /// Series key: `hostname|interface`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}{KEY_SEPARATOR}{}", self.hostname, self.interface)
    }
}

impl TimedPoint for ThroughputPoint {
    fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

// =============================================================================
// Integrity
// =============================================================================

/// One ingested (or aggregated) integrity event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegrityPoint {
    /// Series key.
    pub key: String,
    /// Exchange identifier.
    pub exchange: String,
    /// Symbol (empty for batches and multi-symbol checks).
    pub symbol: String,
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Check stage.
    pub stage: String,
    /// Producer mode.
    pub mode: Option<String>,
    /// Checked period.
    pub period: Option<String>,
    /// Lower-cased status.
    pub status: String,
    /// Free-form detail.
    pub detail: Option<String>,
    /// Minute field when present.
    pub minute: Option<i64>,
    /// Event timestamp (seconds).
    pub timestamp: f64,
    /// RFC 3339 timestamp.
    pub timestamp_iso: String,
    /// Host tag.
    pub hostname: String,
    /// Interface tag.
    pub interface: String,
    /// Stream name.
    pub source: String,
    /// Per-symbol results.
    pub results: Vec<SymbolResult>,
    /// Symbols whose result failed.
    pub failed_symbols: Vec<String>,
    /// `SYMBOL:request` for failed nested requests.
    pub failed_requests: Vec<String>,
    /// Whether the check passed.
    pub is_ok: bool,
    /// Whether this point aggregates a trade batch.
    pub batch: bool,
    /// Members in the batch.
    pub batch_size: usize,
    /// Failed members in the batch.
    pub batch_failures: usize,
    /// Normalized batch members.
    pub batch_items: Vec<BatchItem>,
}

impl IntegrityPoint {
    /// Build a point from an event, applying default tags.
    #[must_use]
    pub fn from_event(event: &IntegrityEvent, source: &str, defaults: &SourceDefaults) -> Self {
        let hostname = defaults.hostname().to_string();
        let interface = defaults.interface().to_string();
        let timestamp = event.timestamp.unwrap_or_else(now_secs);
        let failed_symbols = event.failed_symbols();
        let failed_requests = event.failed_requests();
        let is_ok = if event.status.is_empty() {
            failed_symbols.is_empty() && failed_requests.is_empty()
        } else {
            event.status == "ok"
        };

        let key = composite_key(&KeyParts {
            stream: source,
            hostname: &hostname,
            interface: &interface,
            exchange: &event.exchange,
            stage: &event.stage,
            event_type: &event.event_type,
            symbol: &event.symbol,
        });

        let (batch_size, batch_failures, batch_items) = event
            .batch
            .as_ref()
            .map_or((0, 0, Vec::new()), |b| (b.size, b.failures, b.items.clone()));

        Self {
            key,
            exchange: event.exchange.clone(),
            symbol: event.symbol.clone(),
            event_type: event.event_type.clone(),
            stage: event.stage.clone(),
            mode: event.mode.clone(),
            period: event.period.clone(),
            status: event.status.clone(),
            detail: event.detail.clone(),
            minute: event.minute,
            timestamp,
            timestamp_iso: isoformat(timestamp),
            hostname,
            interface,
            source: source.to_string(),
            results: event.results.clone(),
            failed_symbols,
            failed_requests,
            is_ok,
            batch: event.batch.is_some(),
            batch_size,
            batch_failures,
            batch_items,
        }
    }
}

impl TimedPoint for IntegrityPoint {
    fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

// =============================================================================
// Composite Key
// =============================================================================

/// Raw components of an integrity series key.
#[derive(Debug, Clone, Copy)]
pub struct KeyParts<'a> {
    /// Stream name.
    pub stream: &'a str,
    /// Host tag.
    pub hostname: &'a str,
    /// Interface tag.
    pub interface: &'a str,
    /// Exchange.
    pub exchange: &'a str,
    /// Stage.
    pub stage: &'a str,
    /// Event type.
    pub event_type: &'a str,
    /// Symbol.
    pub symbol: &'a str,
}

/// Build the deterministic series key for an integrity event.
///
/// Components are joined in fixed order with `|`, skipping empty ones:
/// stream, hostname, interface, exchange, stage, type. Stream, exchange,
/// stage and type are lower-cased. The upper-cased symbol is appended only
/// when exchange, stage and type are all empty. Falls back to
/// [`SENTINEL_KEY`].
#[must_use]
pub fn composite_key(parts: &KeyParts<'_>) -> String {
    let exchange = parts.exchange.trim().to_lowercase();
    let stage = parts.stage.trim().to_lowercase();
    let event_type = parts.event_type.trim().to_lowercase();
    let symbol = if exchange.is_empty() && stage.is_empty() && event_type.is_empty() {
        parts.symbol.trim().to_uppercase()
    } else {
        String::new()
    };

    let components = [
        parts.stream.trim().to_lowercase(),
        parts.hostname.trim().to_string(),
        parts.interface.trim().to_string(),
        exchange,
        stage,
        event_type,
        symbol,
    ];

    let key = components
        .iter()
        .filter(|c| !c.is_empty())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(KEY_SEPARATOR);

    if key.is_empty() {
        SENTINEL_KEY.to_string()
    } else {
        key
    }
}
