//! Metric Store
//!
//! Thread-safe bounded cache of throughput and integrity series plus the
//! alert log.
//!
//! # Locking
//!
//! Throughput series sit behind one mutex; integrity series and the alert
//! log share a second one so a point and its alert entry land atomically.
//! Readers take the same locks and copy out before returning.
//!
//! # Eviction
//!
//! See [`RetentionPolicy`]. Count bounds are applied to the touched series
//! on insertion. The age bound is applied to every series on each mutation,
//! using the inserted point's timestamp as the reference, and on demand via
//! [`MetricStore::prune_expired`].

mod retention;
mod series;
mod views;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

pub use retention::{
    CountBounds, DEFAULT_ALERT_POINTS, DEFAULT_INTEGRITY_POINTS, DEFAULT_THROUGHPUT_POINTS,
    RetentionPolicy,
};
pub use views::{
    FeedStatus, IntegrityKeyRow, IntegrityQuery, IntegrityUpdate, Snapshot, ThroughputBucket,
};

use self::series::{Series, SeriesMap, prune_front, truncate_front};
use super::payload::{IntegrityEvent, ThroughputSample};
use super::points::{IntegrityPoint, ThroughputPoint};
use super::source::SourceDefaults;

#[derive(Debug, Default)]
struct IntegrityState {
    series: SeriesMap<IntegrityPoint>,
    alerts: Series<IntegrityPoint>,
}

/// Bounded in-memory series store.
#[derive(Debug, Default)]
pub struct MetricStore {
    policy: RetentionPolicy,
    throughput: Mutex<SeriesMap<ThroughputPoint>>,
    integrity: Mutex<IntegrityState>,
}

impl MetricStore {
    /// Create an empty store governed by `policy`.
    #[must_use]
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            policy,
            throughput: Mutex::new(SeriesMap::default()),
            integrity: Mutex::new(IntegrityState::default()),
        }
    }

    /// Active retention policy.
    #[must_use]
    pub const fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Append a throughput sample to its `hostname|interface` series.
    pub fn add_throughput(
        &self,
        sample: &ThroughputSample,
        source: &str,
    ) -> (String, Arc<ThroughputPoint>) {
        let point = Arc::new(ThroughputPoint::from_sample(sample, source));
        let key = point.key();

        let is_new = {
            let mut throughput = self.throughput.lock();
            let is_new = throughput.push(
                &key,
                Arc::clone(&point),
                self.policy.throughput_bound(source),
            );
            if let Some(cutoff) = self.policy.cutoff(point.timestamp) {
                throughput.prune(cutoff);
            }
            is_new
        };
        if let Some(cutoff) = self.policy.cutoff(point.timestamp) {
            self.prune_integrity(cutoff);
        }

        if is_new {
            info!(
                key = %key,
                hostname = %point.hostname,
                interface = %point.interface,
                "First throughput sample for series"
            );
        }

        (key, point)
    }

    /// Append an integrity event, recording an alert when it failed.
    pub fn add_integrity(
        &self,
        event: &IntegrityEvent,
        source: &str,
        defaults: &SourceDefaults,
    ) -> Vec<IntegrityUpdate> {
        let point = Arc::new(IntegrityPoint::from_event(event, source, defaults));
        let alerted = !point.is_ok;

        let is_new = {
            let mut state = self.integrity.lock();
            let is_new = state.series.push(
                &point.key,
                Arc::clone(&point),
                self.policy.integrity_bound(source),
            );
            if alerted {
                state.alerts.push_back(Arc::clone(&point));
                if let Some(bound) = self.policy.alert_bound() {
                    truncate_front(&mut state.alerts, bound);
                }
            }
            if let Some(cutoff) = self.policy.cutoff(point.timestamp) {
                state.series.prune(cutoff);
                prune_front(&mut state.alerts, cutoff);
            }
            is_new
        };
        if let Some(cutoff) = self.policy.cutoff(point.timestamp) {
            self.throughput.lock().prune(cutoff);
        }

        if is_new {
            info!(
                key = %point.key,
                exchange = %point.exchange,
                symbol = %point.symbol,
                "First integrity event for series"
            );
        }
        if alerted {
            warn!(
                key = %point.key,
                exchange = %point.exchange,
                symbol = %point.symbol,
                status = %point.status,
                detail = point.detail.as_deref().unwrap_or_default(),
                "Integrity check failed"
            );
        }

        vec![IntegrityUpdate {
            key: point.key.clone(),
            point,
            alerted,
        }]
    }

    /// Apply the age bound against a wall-clock `now`. No-op for count bounds.
    pub fn prune_expired(&self, now: f64) {
        let Some(cutoff) = self.policy.cutoff(now) else {
            return;
        };
        self.throughput.lock().prune(cutoff);
        self.prune_integrity(cutoff);
    }

    /// Drop integrity points and alerts older than `cutoff`.
    ///
    /// Never called while the throughput lock is held.
    fn prune_integrity(&self, cutoff: f64) {
        let mut state = self.integrity.lock();
        state.series.prune(cutoff);
        prune_front(&mut state.alerts, cutoff);
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Copy of every series and the alert log.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let throughput = self.throughput.lock().copy_out();
        let state = self.integrity.lock();
        Snapshot {
            throughput,
            integrity: state.series.copy_out(),
            alerts: state.alerts.iter().cloned().collect(),
        }
    }

    /// Copy of every throughput series.
    #[must_use]
    pub fn throughput_snapshot(&self) -> BTreeMap<String, Vec<Arc<ThroughputPoint>>> {
        self.throughput.lock().copy_out()
    }

    /// Copy of every integrity series.
    #[must_use]
    pub fn integrity_snapshot(&self) -> BTreeMap<String, Vec<Arc<IntegrityPoint>>> {
        self.integrity.lock().series.copy_out()
    }

    /// Failing integrity points, oldest first.
    #[must_use]
    pub fn alerts(&self) -> Vec<Arc<IntegrityPoint>> {
        self.integrity.lock().alerts.iter().cloned().collect()
    }

    /// Integrity points matching every supplied filter, ascending by
    /// timestamp, truncated to the most recent `limit`.
    #[must_use]
    pub fn query_integrity(&self, query: &IntegrityQuery) -> Vec<Arc<IntegrityPoint>> {
        let mut records: Vec<Arc<IntegrityPoint>> = {
            let state = self.integrity.lock();
            state
                .series
                .iter()
                .flat_map(|(_, series)| series.iter())
                .filter(|point| query.matches(point))
                .cloned()
                .collect()
        };

        records.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        if let Some(limit) = query.limit.filter(|l| *l > 0 && records.len() > *l) {
            records.drain(..records.len() - limit);
        }
        records
    }

    /// Newest throughput point across all series.
    ///
    /// Series are visited in key order and ties keep the later key, so the
    /// lexicographically greatest key wins on equal timestamps.
    #[must_use]
    pub fn latest_throughput(&self) -> Option<(String, Arc<ThroughputPoint>)> {
        let throughput = self.throughput.lock();
        let mut latest: Option<(&String, &Arc<ThroughputPoint>)> = None;
        for (key, series) in throughput.iter() {
            let Some(candidate) = series.back() else {
                continue;
            };
            if latest.is_none_or(|(_, best)| candidate.timestamp >= best.timestamp) {
                latest = Some((key, candidate));
            }
        }
        latest.map(|(key, point)| (key.clone(), Arc::clone(point)))
    }

    /// One row per live integrity series, sorted by host, interface, key.
    #[must_use]
    pub fn distinct_integrity_keys(&self) -> Vec<IntegrityKeyRow> {
        let mut rows: Vec<IntegrityKeyRow> = {
            let state = self.integrity.lock();
            state
                .series
                .iter()
                .filter_map(|(key, series)| {
                    let latest = series.back()?;
                    let types: BTreeSet<&str> = series
                        .iter()
                        .map(|p| p.event_type.as_str())
                        .filter(|t| !t.is_empty())
                        .collect();
                    let stages: BTreeSet<&str> = series
                        .iter()
                        .map(|p| p.stage.as_str())
                        .filter(|s| !s.is_empty())
                        .collect();
                    Some(IntegrityKeyRow {
                        key: key.clone(),
                        hostname: latest.hostname.clone(),
                        interface: latest.interface.clone(),
                        types: types.into_iter().map(str::to_string).collect(),
                        stages: stages.into_iter().map(str::to_string).collect(),
                    })
                })
                .collect()
        };

        rows.sort_by(|a, b| {
            (&a.hostname, &a.interface, &a.key).cmp(&(&b.hostname, &b.interface, &b.key))
        });
        rows
    }

    /// Bucket view of every throughput sample, sorted by window start.
    #[must_use]
    pub fn throughput_buckets(&self) -> Vec<ThroughputBucket> {
        let mut buckets: Vec<ThroughputBucket> = {
            let throughput = self.throughput.lock();
            throughput
                .iter()
                .flat_map(|(_, series)| series.iter())
                .map(|point| ThroughputBucket::from_point(point))
                .collect()
        };
        buckets.sort_by(|a, b| a.start_ts.total_cmp(&b.start_ts));
        buckets
    }

    /// Feed summary derived from the latest throughput sample.
    #[must_use]
    pub fn feed_status(&self) -> FeedStatus {
        self.latest_throughput()
            .map(|(_, point)| FeedStatus::from_point(&point))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use proptest::prelude::*;
    use serde_json::{Map, Value, json};

    use super::*;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn sample(host: &str, iface: &str, ts: f64, avg: f64) -> ThroughputSample {
        ThroughputSample::from_map(&object(json!({
            "hostname": host,
            "interface": iface,
            "timestamp": ts,
            "metrics": {"bps_avg": avg, "bps_max": avg * 2.0}
        })))
    }

    fn event(value: Value) -> IntegrityEvent {
        IntegrityEvent::from_map(&object(value))
    }

    #[test]
    fn throughput_scenario() {
        let store = MetricStore::default();
        let (key, point) = store.add_throughput(&sample("h1", "eth0", 1000.0, 100.0), "xdp");
        assert_eq!(key, "h1|eth0");
        assert!((point.avg_mbps - 0.0001).abs() < 1e-12);
        assert_eq!(store.throughput_snapshot()["h1|eth0"].len(), 1);
    }

    #[test]
    fn failed_integrity_is_alerted() {
        let store = MetricStore::default();
        let updates = store.add_integrity(
            &event(json!({
                "exchange": "ex", "symbol": "BTCUSDT", "status": "fail",
                "detail": "gap", "timestamp": 1000
            })),
            "bn",
            &SourceDefaults::default(),
        );
        assert_eq!(updates.len(), 1);
        assert!(updates[0].alerted);
        assert!(!updates[0].point.is_ok);
        let alerts = store.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].detail.as_deref(), Some("gap"));
    }

    #[test]
    fn ok_integrity_is_not_alerted() {
        let store = MetricStore::default();
        let updates = store.add_integrity(
            &event(json!({"exchange": "ex", "status": "OK", "timestamp": 1000})),
            "bn",
            &SourceDefaults::default(),
        );
        assert!(!updates[0].alerted);
        assert!(store.alerts().is_empty());
    }

    #[test]
    fn query_keeps_most_recent_ascending() {
        let store = MetricStore::default();
        for (i, exchange) in ["X", "Y", "X", "X", "Y", "X", "X"].iter().enumerate() {
            store.add_integrity(
                &event(json!({
                    "exchange": exchange, "type": "depth", "status": "ok",
                    "timestamp": 1000 + i
                })),
                "bn",
                &SourceDefaults::default(),
            );
        }
        let got = store.query_integrity(&IntegrityQuery::default().exchange("X").limit(2));
        let ts: Vec<f64> = got.iter().map(|p| p.timestamp).collect();
        assert_eq!(ts, vec![1005.0, 1006.0]);

        let all = store.query_integrity(&IntegrityQuery::default().exchange("X"));
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn query_filters_by_host_and_interface() {
        let store = MetricStore::default();
        for (host, iface, ts) in [("h1", "eth0", 1), ("h1", "eth1", 2), ("h2", "eth0", 3)] {
            let defaults = SourceDefaults {
                hostname: Some(host.to_string()),
                interface: Some(iface.to_string()),
            };
            store.add_integrity(
                &event(json!({"exchange": "ex", "status": "ok", "timestamp": ts})),
                "bn",
                &defaults,
            );
        }

        let by_host = store.query_integrity(&IntegrityQuery::default().hostname("h1"));
        assert_eq!(by_host.len(), 2);
        let by_both =
            store.query_integrity(&IntegrityQuery::default().hostname("h1").interface("eth0"));
        assert_eq!(by_both.len(), 1);
        assert!((by_both[0].timestamp - 1.0).abs() < f64::EPSILON);
        let by_iface = store.query_integrity(&IntegrityQuery::default().interface("eth0"));
        let hosts: Vec<&str> = by_iface.iter().map(|p| p.hostname.as_str()).collect();
        assert_eq!(hosts, ["h1", "h2"]);
    }

    #[test]
    fn latest_throughput_tie_prefers_greatest_key() {
        let store = MetricStore::default();
        store.add_throughput(&sample("h2", "eth0", 50.0, 1.0), "xdp");
        store.add_throughput(&sample("h1", "eth0", 50.0, 1.0), "xdp");
        store.add_throughput(&sample("h0", "eth0", 10.0, 1.0), "xdp");
        let (key, _) = store.latest_throughput().unwrap();
        assert_eq!(key, "h2|eth0");
        assert!(MetricStore::default().latest_throughput().is_none());
    }

    #[test]
    fn distinct_keys_collect_types_and_stages() {
        let store = MetricStore::default();
        let defaults = SourceDefaults {
            hostname: Some("h1".to_string()),
            interface: Some("eth0".to_string()),
        };
        for stage in ["1m", "5m"] {
            store.add_integrity(
                &event(json!({"symbol": "abc", "stage": stage, "status": "ok", "timestamp": 1})),
                "",
                &defaults,
            );
        }
        let rows = store.distinct_integrity_keys();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, "h1|eth0|1m");
        assert_eq!(rows[0].stages, vec!["1m"]);
        assert!(rows[0].types.is_empty());
    }

    #[test]
    fn buckets_reconstruct_rate_from_bytes() {
        let store = MetricStore::default();
        store.add_throughput(
            &ThroughputSample::from_map(&object(json!({
                "hostname": "h1",
                "interface": "eth0",
                "timestamp": 20.0,
                "samples": 100,
                "window": {"start": 10.0, "end": 20.0, "duration": 10.0},
                "metrics": {"bytes_total": 1000}
            }))),
            "xdp",
        );
        let buckets = store.throughput_buckets();
        assert_eq!(buckets.len(), 1);
        assert!((buckets[0].avg_bps - 800.0).abs() < 1e-9);
        assert_eq!(buckets[0].avg_source, Some("bytes_total"));
        assert!((buckets[0].start_ts - 10.0).abs() < f64::EPSILON);

        let status = store.feed_status();
        assert_eq!(status.interface, "eth0");
        assert!((status.window_seconds - 10.0).abs() < f64::EPSILON);
        assert!((status.tick_ms - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn feed_status_defaults_when_empty() {
        assert_eq!(MetricStore::default().feed_status(), FeedStatus::default());
    }

    #[test]
    fn age_policy_prunes_on_insert_and_housekeeping() {
        let store = MetricStore::new(RetentionPolicy::age(Duration::from_secs(60)));
        store.add_throughput(&sample("h1", "eth0", 1000.0, 1.0), "xdp");
        store.add_throughput(&sample("h2", "eth0", 1030.0, 1.0), "xdp");
        store.add_throughput(&sample("h2", "eth0", 1070.0, 1.0), "xdp");
        let snapshot = store.throughput_snapshot();
        assert!(!snapshot.contains_key("h1|eth0"));
        assert_eq!(snapshot["h2|eth0"].len(), 2);

        store.add_integrity(
            &event(json!({"exchange": "ex", "status": "fail", "timestamp": 1070})),
            "bn",
            &SourceDefaults::default(),
        );
        store.prune_expired(2000.0);
        let snapshot = store.snapshot();
        assert!(snapshot.throughput.is_empty());
        assert!(snapshot.integrity.is_empty());
        assert!(snapshot.alerts.is_empty());
    }

    #[test]
    fn age_policy_prunes_every_series_on_any_insert() {
        let store = MetricStore::new(RetentionPolicy::age(Duration::from_secs(60)));
        store.add_integrity(
            &event(json!({"exchange": "ex", "status": "fail", "timestamp": 1000})),
            "bn",
            &SourceDefaults::default(),
        );
        store.add_throughput(&sample("h1", "eth0", 5000.0, 1.0), "xdp");
        let snapshot = store.snapshot();
        assert!(snapshot.integrity.is_empty());
        assert!(snapshot.alerts.is_empty());
        assert_eq!(snapshot.throughput.len(), 1);

        store.add_throughput(&sample("h2", "eth0", 6000.0, 1.0), "xdp");
        store.add_integrity(
            &event(json!({"exchange": "ex", "status": "ok", "timestamp": 9000})),
            "bn",
            &SourceDefaults::default(),
        );
        let snapshot = store.snapshot();
        assert!(snapshot.throughput.is_empty());
        assert_eq!(snapshot.integrity.len(), 1);
    }

    #[test]
    fn alert_log_is_bounded() {
        let store = MetricStore::new(RetentionPolicy::count(10, 10, 2));
        for ts in 1..=4 {
            store.add_integrity(
                &event(json!({"exchange": "ex", "status": "fail", "timestamp": ts})),
                "bn",
                &SourceDefaults::default(),
            );
        }
        let ts: Vec<f64> = store.alerts().iter().map(|p| p.timestamp).collect();
        assert_eq!(ts, vec![3.0, 4.0]);
    }

    proptest! {
        #[test]
        fn count_bound_holds_and_evicts_fifo(
            bound in 1usize..8,
            writes in proptest::collection::vec((0usize..3, 0.0f64..1e6), 1..60)
        ) {
            let store = MetricStore::new(
                RetentionPolicy::count(bound, bound, bound).with_stream_bound("tight", 1),
            );
            let mut expected: std::collections::BTreeMap<String, Vec<f64>> = Default::default();
            for (host, avg) in &writes {
                let host = format!("h{host}");
                let ts = expected.values().map(Vec::len).sum::<usize>() as f64 + 1.0;
                let (key, _) = store.add_throughput(&sample(&host, "eth0", ts, *avg), "xdp");
                let series = expected.entry(key).or_default();
                series.push(ts);
                if series.len() > bound {
                    series.remove(0);
                }
            }
            let snapshot = store.throughput_snapshot();
            for (key, points) in &snapshot {
                prop_assert!(points.len() <= bound);
                prop_assert!(points.iter().all(|p| p.avg_bps >= 0.0));
                let ts: Vec<f64> = points.iter().map(|p| p.timestamp).collect();
                prop_assert_eq!(&ts, &expected[key]);
            }
        }

        #[test]
        fn alerts_are_exactly_failures(statuses in proptest::collection::vec(any::<bool>(), 1..40)) {
            let store = MetricStore::new(RetentionPolicy::count(100, 100, 100));
            for (i, ok) in statuses.iter().enumerate() {
                let status = if *ok { "ok" } else { "fail" };
                store.add_integrity(
                    &event(json!({"exchange": "ex", "status": status, "timestamp": i + 1})),
                    "bn",
                    &SourceDefaults::default(),
                );
            }
            let failures = statuses.iter().filter(|ok| !**ok).count();
            let alerts = store.alerts();
            prop_assert_eq!(alerts.len(), failures);
            prop_assert!(alerts.iter().all(|p| !p.is_ok));
        }
    }
}
