//! Live Update Messages
//!
//! Messages delivered to broadcast sinks. Serialized form:
//!
//! ```json
//! {"type":"snapshot","payload":{"throughput":{..},"integrity":{..},"alerts":[..]}}
//! {"type":"update","scope":"throughput","series":{"key":"h1|eth0","topic":"xdp","point":{..}}}
//! {"type":"update","scope":"integrity","series":{..},"alert":{..}}
//! ```

use std::sync::Arc;

use serde::Serialize;

use super::points::{IntegrityPoint, ThroughputPoint};
use super::store::Snapshot;

/// Message pushed to a sink.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HubMessage {
    /// Full state sent once on join.
    Snapshot {
        /// Store snapshot.
        payload: Snapshot,
    },
    /// One new point.
    Update(Update),
}

/// Incremental update, tagged by scope.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "scope", rename_all = "lowercase")]
pub enum Update {
    /// New throughput point.
    Throughput {
        /// Series the point was appended to.
        series: SeriesUpdate<ThroughputPoint>,
    },
    /// New integrity point, echoed under `alert` when it failed.
    Integrity {
        /// Series the point was appended to.
        series: SeriesUpdate<IntegrityPoint>,
        /// Same point when it was recorded as an alert.
        #[serde(skip_serializing_if = "Option::is_none")]
        alert: Option<Arc<IntegrityPoint>>,
    },
}

/// Series coordinates of an update.
#[derive(Debug, Clone, Serialize)]
pub struct SeriesUpdate<P> {
    /// Series key.
    pub key: String,
    /// Transport topic the payload arrived on.
    pub topic: String,
    /// Stored point.
    pub point: Arc<P>,
}

impl Update {
    /// Update for a throughput point.
    #[must_use]
    pub fn throughput(key: String, topic: &str, point: Arc<ThroughputPoint>) -> Self {
        Self::Throughput {
            series: SeriesUpdate {
                key,
                topic: topic.to_string(),
                point,
            },
        }
    }

    /// Update for an integrity point.
    #[must_use]
    pub fn integrity(key: String, topic: &str, point: Arc<IntegrityPoint>, alerted: bool) -> Self {
        let alert = alerted.then(|| Arc::clone(&point));
        Self::Integrity {
            series: SeriesUpdate {
                key,
                topic: topic.to_string(),
                point,
            },
            alert,
        }
    }

    /// Scope name.
    #[must_use]
    pub const fn scope(&self) -> &'static str {
        match self {
            Self::Throughput { .. } => "throughput",
            Self::Integrity { .. } => "integrity",
        }
    }

    /// Series key.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Throughput { series } => &series.key,
            Self::Integrity { series, .. } => &series.key,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::payload::{IntegrityEvent, ThroughputSample};
    use crate::domain::source::SourceDefaults;

    #[test]
    fn snapshot_wire_shape() {
        let message = HubMessage::Snapshot {
            payload: Snapshot::default(),
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "snapshot");
        assert!(value["payload"]["alerts"].as_array().unwrap().is_empty());
    }

    #[test]
    fn throughput_update_wire_shape() {
        let sample = ThroughputSample {
            hostname: "h1".to_string(),
            interface: "eth0".to_string(),
            timestamp: Some(1.0),
            ..ThroughputSample::default()
        };
        let point = Arc::new(ThroughputPoint::from_sample(&sample, "xdp"));
        let message = HubMessage::Update(Update::throughput(point.key(), "xdp", point));
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "update");
        assert_eq!(value["scope"], "throughput");
        assert_eq!(value["series"]["key"], "h1|eth0");
        assert_eq!(value["series"]["topic"], "xdp");
        assert!(value["series"]["point"].get("avg_MBps").is_some());
        assert!(value.get("alert").is_none());
    }

    #[test]
    fn failed_integrity_update_carries_alert() {
        let event = IntegrityEvent::from_map(
            json!({"exchange": "ex", "status": "fail", "timestamp": 5})
                .as_object()
                .unwrap(),
        );
        let point = Arc::new(IntegrityPoint::from_event(
            &event,
            "bn",
            &SourceDefaults::default(),
        ));
        let update = Update::integrity(point.key.clone(), "", point, true);
        assert_eq!(update.scope(), "integrity");
        assert_eq!(update.key(), "bn|ex");
        let value = serde_json::to_value(HubMessage::Update(update)).unwrap();
        assert_eq!(value["alert"]["status"], "fail");
        assert_eq!(value["series"]["point"]["type"], "");
    }
}
