//! Read-side Views
//!
//! Derived shapes consumed by the query layer. All of them are computed
//! from copied-out points and carry no references into the store.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::domain::points::{IntegrityPoint, ThroughputPoint};

/// Full point-in-time copy of every series and the alert log.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    /// Throughput series by `hostname|interface`.
    pub throughput: BTreeMap<String, Vec<Arc<ThroughputPoint>>>,
    /// Integrity series by composite key.
    pub integrity: BTreeMap<String, Vec<Arc<IntegrityPoint>>>,
    /// Failing integrity points, oldest first.
    pub alerts: Vec<Arc<IntegrityPoint>>,
}

/// Result of one integrity insertion.
#[derive(Debug, Clone)]
pub struct IntegrityUpdate {
    /// Series key.
    pub key: String,
    /// Stored point.
    pub point: Arc<IntegrityPoint>,
    /// Whether the point was appended to the alert log.
    pub alerted: bool,
}

/// Exact-match filters for [`super::MetricStore::query_integrity`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityQuery {
    /// Exchange filter.
    pub exchange: Option<String>,
    /// Symbol filter.
    pub symbol: Option<String>,
    /// Hostname filter.
    pub hostname: Option<String>,
    /// Interface filter.
    pub interface: Option<String>,
    /// Event type filter.
    pub event_type: Option<String>,
    /// Stage filter.
    pub stage: Option<String>,
    /// Keep only the most recent `limit` matches.
    pub limit: Option<usize>,
}

impl IntegrityQuery {
    /// Restrict to one exchange.
    #[must_use]
    pub fn exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    /// Restrict to one symbol.
    #[must_use]
    pub fn symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    /// Restrict to one host.
    #[must_use]
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Restrict to one interface.
    #[must_use]
    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    /// Restrict to one event type.
    #[must_use]
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Restrict to one stage.
    #[must_use]
    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    /// Cap the result length.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn matches(&self, point: &IntegrityPoint) -> bool {
        fn check(filter: Option<&String>, value: &str) -> bool {
            filter.is_none_or(|f| f.is_empty() || f == value)
        }

        check(self.exchange.as_ref(), &point.exchange)
            && check(self.symbol.as_ref(), &point.symbol)
            && check(self.hostname.as_ref(), &point.hostname)
            && check(self.interface.as_ref(), &point.interface)
            && check(self.event_type.as_ref(), &point.event_type)
            && check(self.stage.as_ref(), &point.stage)
    }
}

/// One row describing a live integrity series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityKeyRow {
    /// Series key.
    pub key: String,
    /// Host tag of the latest point.
    pub hostname: String,
    /// Interface tag of the latest point.
    pub interface: String,
    /// Distinct event types in the retained window.
    pub types: Vec<String>,
    /// Distinct stages in the retained window.
    pub stages: Vec<String>,
}

/// Bucket view of one throughput sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThroughputBucket {
    /// Window start.
    pub start_ts: f64,
    /// Window end.
    pub end_ts: f64,
    /// Average bits per second.
    pub avg_bps: f64,
    /// Peak bits per second.
    pub max_bps: f64,
    /// Field that supplied `avg_bps`.
    pub avg_source: Option<&'static str>,
    /// Field that supplied `max_bps`.
    pub max_source: Option<&'static str>,
    /// Ticks in the window.
    pub sample_count: u64,
}

impl ThroughputBucket {
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn from_point(point: &ThroughputPoint) -> Self {
        let window = point.window.unwrap_or_default();
        let start_ts = if window.start > 0.0 {
            window.start
        } else {
            point.timestamp
        };
        let end_ts = if window.end > 0.0 {
            window.end
        } else {
            start_ts + window.duration
        };
        let duration = if window.duration > 0.0 {
            window.duration
        } else {
            (end_ts - start_ts).max(0.0)
        };

        let mut avg_bps = point.avg_bps;
        let mut avg_source = point.avg_source;
        if avg_bps == 0.0 && duration > 0.0 && point.bytes_total > 0 {
            avg_bps = point.bytes_total as f64 * 8.0 / duration;
            avg_source = Some("bytes_total");
        }

        Self {
            start_ts,
            end_ts,
            avg_bps,
            max_bps: point.max_bps,
            avg_source,
            max_source: point.max_source,
            sample_count: point.sample_count,
        }
    }
}

/// Summary of the feed behind the latest throughput sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedStatus {
    /// Interface of the latest sample.
    pub interface: String,
    /// Attach mode of the latest sample.
    pub mode: String,
    /// Window length in seconds.
    pub window_seconds: f64,
    /// Milliseconds per tick.
    pub tick_ms: f64,
}

impl FeedStatus {
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn from_point(point: &ThroughputPoint) -> Self {
        let window_seconds = point
            .window
            .map_or(0.0, |w| w.effective_duration());
        let tick_ms = if point.sample_count > 0 && window_seconds > 0.0 {
            window_seconds / point.sample_count as f64 * 1000.0
        } else {
            0.0
        };

        Self {
            interface: point.interface.clone(),
            mode: point.mode.clone().unwrap_or_default(),
            window_seconds: round3(window_seconds),
            tick_ms: round3(tick_ms),
        }
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
