//! Inbound Payload Shapes
//!
//! Typed views over the JSON objects published by the upstream producers.
//! Decoding is lenient: missing or malformed fields become `None`/defaults
//! rather than errors.
//!
//! # Wire Contract
//!
//! Throughput:
//! ```json
//! {"hostname":"h1","interface":"eth0","timestamp":1700000000.0,"mode":"native",
//!  "window":{"start":..,"end":..,"duration":..},"samples":100,
//!  "metrics":{"bps_avg":..,"bps_max":..,"bytes_total":..,"packets_total":..}}
//! ```
//!
//! Integrity:
//! ```json
//! {"exchange":"binance","symbol":"BTCUSDT","type":"trade","stage":"1m","status":"fail",
//!  "detail":"gap","timestamp_ms":1700000000000,
//!  "results":[{"symbol":"BTCUSDT","status":"ok","requests":[{"request":"depth","status":"ok"}]}]}
//! ```

pub mod coerce;

use serde::Serialize;
use serde_json::{Map, Value};

use self::coerce::{
    as_detail, as_flag, as_i64, as_string, as_u64, first_nonzero, first_timestamp, lower_field,
    str_field,
};
use super::source::StreamKind;

/// Metrics keys that may carry the average rate, in priority order.
pub const AVG_RATE_KEYS: &[&str] = &["bps_avg", "avg_bps", "avg", "bps_mean"];

/// Metrics keys that may carry the peak rate, in priority order.
pub const MAX_RATE_KEYS: &[&str] = &["bps_max", "max_bps", "max"];

/// Integrity timestamp fields, in priority order.
pub const INTEGRITY_TIMESTAMP_KEYS: &[&str] =
    &["timestamp", "timestamp_ms", "period_end_ts", "close_tp", "tp"];

/// Event type routed through the batch aggregator.
pub const TRADE_EVENT_TYPE: &str = "trade";

// =============================================================================
// Tagged Union
// =============================================================================

/// A decoded payload, classified by the stream it arrived on.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Bandwidth sample window.
    Throughput(ThroughputSample),
    /// Integrity check result.
    Integrity(IntegrityEvent),
    /// Object carrying none of the identifying fields for its stream kind.
    Unknown(Value),
}

impl Payload {
    /// Classify a decoded JSON object according to the stream kind.
    #[must_use]
    pub fn classify(kind: StreamKind, map: Map<String, Value>) -> Self {
        match kind {
            StreamKind::Throughput => {
                if ["hostname", "interface", "metrics"]
                    .iter()
                    .any(|k| map.contains_key(*k))
                {
                    Self::Throughput(ThroughputSample::from_map(&map))
                } else {
                    Self::Unknown(Value::Object(map))
                }
            }
            StreamKind::Integrity => {
                if ["exchange", "symbol", "type", "status", "results"]
                    .iter()
                    .any(|k| map.contains_key(*k))
                {
                    Self::Integrity(IntegrityEvent::from_map(&map))
                } else {
                    Self::Unknown(Value::Object(map))
                }
            }
        }
    }
}

// =============================================================================
// Throughput
// =============================================================================

/// Sampling window reported by the bandwidth producer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SampleWindow {
    /// Window start (seconds).
    pub start: f64,
    /// Window end (seconds).
    pub end: f64,
    /// Window duration (seconds).
    pub duration: f64,
}

impl SampleWindow {
    fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let field = |key: &str| map.get(key).and_then(coerce::as_f64).unwrap_or(0.0);
        Some(Self {
            start: field("start"),
            end: field("end"),
            duration: field("duration"),
        })
    }

    /// Effective duration: `duration` when positive, else `end - start`.
    #[must_use]
    pub fn effective_duration(&self) -> f64 {
        if self.duration > 0.0 {
            self.duration
        } else {
            (self.end - self.start).max(0.0)
        }
    }
}

/// A rate value together with the metrics key that supplied it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rate {
    /// Bits per second.
    pub bps: f64,
    /// Source field name.
    pub field: &'static str,
}

/// One throughput sample window as published by the XDP sampler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThroughputSample {
    /// Host that measured the traffic.
    pub hostname: String,
    /// Measured interface.
    pub interface: String,
    /// Sample timestamp (seconds).
    pub timestamp: Option<f64>,
    /// Producer-formatted timestamp.
    pub timestamp_iso: Option<String>,
    /// Attach mode (native, skb, ...).
    pub mode: Option<String>,
    /// Sampling window.
    pub window: Option<SampleWindow>,
    /// Number of ticks in the window.
    pub samples: u64,
    /// Average rate.
    pub avg: Option<Rate>,
    /// Peak rate.
    pub max: Option<Rate>,
    /// Bytes observed in the window.
    pub bytes_total: u64,
    /// Packets observed in the window.
    pub packets_total: u64,
}

impl ThroughputSample {
    /// Decode from a JSON object.
    #[must_use]
    pub fn from_map(map: &Map<String, Value>) -> Self {
        let empty = Map::new();
        let metrics = map
            .get("metrics")
            .and_then(Value::as_object)
            .unwrap_or(&empty);

        Self {
            hostname: str_field(map, "hostname").unwrap_or_default(),
            interface: str_field(map, "interface").unwrap_or_default(),
            timestamp: map.get("timestamp").and_then(coerce::as_f64),
            timestamp_iso: str_field(map, "timestamp_iso"),
            mode: str_field(map, "mode"),
            window: map.get("window").and_then(SampleWindow::from_value),
            samples: map.get("samples").and_then(as_u64).unwrap_or(0),
            avg: first_nonzero(metrics, AVG_RATE_KEYS).map(|(bps, field)| Rate { bps, field }),
            max: first_nonzero(metrics, MAX_RATE_KEYS).map(|(bps, field)| Rate { bps, field }),
            bytes_total: metrics.get("bytes_total").and_then(as_u64).unwrap_or(0),
            packets_total: metrics.get("packets_total").and_then(as_u64).unwrap_or(0),
        }
    }
}

// =============================================================================
// Integrity
// =============================================================================

/// Status of one request made while checking a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestResult {
    /// Request name.
    pub request: String,
    /// Lower-cased status.
    pub status: String,
    /// Optional detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Per-symbol check result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolResult {
    /// Symbol, upper-cased.
    pub symbol: String,
    /// Lower-cased status.
    pub status: String,
    /// Optional detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Nested request statuses.
    pub requests: Vec<RequestResult>,
}

impl SymbolResult {
    fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let requests = map
            .get("requests")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_object)
                    .map(|req| RequestResult {
                        request: str_field(req, "request")
                            .or_else(|| str_field(req, "name"))
                            .unwrap_or_default(),
                        status: lower_field(req, "status").unwrap_or_default(),
                        detail: req.get("detail").and_then(as_detail),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            symbol: str_field(map, "symbol")
                .map(|s| s.to_uppercase())
                .unwrap_or_default(),
            status: lower_field(map, "status").unwrap_or_default(),
            detail: map.get("detail").and_then(as_detail),
            requests,
        })
    }
}

/// One normalized member of a trade batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchItem {
    /// Exchange of the member event.
    pub exchange: String,
    /// Symbol of the member event.
    pub symbol: String,
    /// Lower-cased status.
    pub status: String,
    /// Optional detail.
    pub detail: Option<String>,
    /// Minute field when present.
    pub minute: Option<i64>,
    /// Member timestamp (seconds).
    pub timestamp: f64,
    /// RFC 3339 form of `timestamp`.
    pub timestamp_iso: String,
}

impl BatchItem {
    /// Whether this member reported success.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Aggregate of many same-minute trade checks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    /// Number of member events.
    pub size: usize,
    /// Number of failed members.
    pub failures: usize,
    /// Normalized members.
    pub items: Vec<BatchItem>,
}

impl BatchSummary {
    fn from_map(map: &Map<String, Value>, fallback_ts: f64) -> Option<Self> {
        let flagged = ["batch", "trade_batch"]
            .iter()
            .any(|k| map.get(*k).is_some_and(as_flag));
        if !flagged {
            return None;
        }

        let items: Vec<BatchItem> = ["batch_items", "trade_batch_items"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_array))
            .map(|raw| {
                raw.iter()
                    .filter_map(Value::as_object)
                    .map(|item| {
                        let ts = item
                            .get("timestamp")
                            .and_then(coerce::as_timestamp)
                            .unwrap_or(fallback_ts);
                        BatchItem {
                            exchange: str_field(item, "exchange").unwrap_or_default(),
                            symbol: str_field(item, "symbol")
                                .map(|s| s.to_uppercase())
                                .unwrap_or_default(),
                            status: lower_field(item, "status").unwrap_or_default(),
                            detail: item.get("detail").and_then(as_detail),
                            minute: item.get("minute").and_then(as_i64),
                            timestamp: ts,
                            timestamp_iso: coerce::isoformat(ts),
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        let counted_failures = items.iter().filter(|i| !i.is_ok()).count();
        let size = ["batch_size", "trade_batch_size"]
            .iter()
            .find_map(|k| map.get(*k).and_then(as_u64))
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(items.len());
        let failures = ["batch_failures", "trade_batch_failures"]
            .iter()
            .find_map(|k| map.get(*k).and_then(as_u64))
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(counted_failures);

        Some(Self {
            size,
            failures,
            items,
        })
    }
}

/// One integrity check event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntegrityEvent {
    /// Exchange identifier.
    pub exchange: String,
    /// Symbol, upper-cased (empty for multi-symbol events).
    pub symbol: String,
    /// Event type (`trade`, `inc_seq`, ...).
    pub event_type: String,
    /// Check stage (`1m`, `5m`, ...).
    pub stage: String,
    /// Producer mode.
    pub mode: Option<String>,
    /// Checked period label.
    pub period: Option<String>,
    /// Lower-cased status; may be empty.
    pub status: String,
    /// Free-form detail.
    pub detail: Option<String>,
    /// Event timestamp (seconds).
    pub timestamp: Option<f64>,
    /// Minute field when present.
    pub minute: Option<i64>,
    /// Per-symbol results.
    pub results: Vec<SymbolResult>,
    /// Batch aggregate, when this event summarizes many.
    pub batch: Option<BatchSummary>,
}

impl IntegrityEvent {
    /// Decode from a JSON object.
    #[must_use]
    pub fn from_map(map: &Map<String, Value>) -> Self {
        let timestamp = first_timestamp(map, INTEGRITY_TIMESTAMP_KEYS);
        let results = map
            .get("results")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(SymbolResult::from_value).collect())
            .unwrap_or_default();

        Self {
            exchange: str_field(map, "exchange").unwrap_or_default(),
            symbol: str_field(map, "symbol")
                .map(|s| s.to_uppercase())
                .unwrap_or_default(),
            event_type: str_field(map, "type").unwrap_or_default(),
            stage: str_field(map, "stage").unwrap_or_default(),
            mode: str_field(map, "mode"),
            period: map.get("period").and_then(as_string),
            status: lower_field(map, "status").unwrap_or_default(),
            detail: map.get("detail").and_then(as_detail),
            timestamp,
            minute: map.get("minute").and_then(as_i64),
            results,
            batch: BatchSummary::from_map(map, timestamp.unwrap_or_else(coerce::now_secs)),
        }
    }

    /// Whether this is a single `trade` event eligible for batching.
    #[must_use]
    pub fn is_batchable_trade(&self) -> bool {
        self.batch.is_none() && self.event_type.eq_ignore_ascii_case(TRADE_EVENT_TYPE)
    }

    /// Symbols whose result status is not `ok`.
    #[must_use]
    pub fn failed_symbols(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| r.status != "ok")
            .map(|r| r.symbol.clone())
            .collect()
    }

    /// `SYMBOL:request` for every nested request whose status is not `ok`.
    #[must_use]
    pub fn failed_requests(&self) -> Vec<String> {
        self.results
            .iter()
            .flat_map(|r| {
                r.requests
                    .iter()
                    .filter(|req| req.status != "ok")
                    .map(move |req| format!("{}:{}", r.symbol, req.request))
            })
            .collect()
    }
}
