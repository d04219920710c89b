//! Stream Source Descriptors
//!
//! A stream source identifies one subscription on the publish/subscribe
//! transport together with the tags applied to everything it delivers.
//! Sources are loaded once at startup and shared read-only with their
//! ingestion worker.

use serde::{Deserialize, Serialize};

// =============================================================================
// Stream Kind
// =============================================================================

/// Payload family carried by a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Bandwidth samples from the XDP sampler.
    #[serde(alias = "xdp")]
    Throughput,
    /// Exchange market data integrity checks.
    Integrity,
}

impl StreamKind {
    /// Get the kind name used in logs, metrics and update scopes.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Throughput => "throughput",
            Self::Integrity => "integrity",
        }
    }
}

// =============================================================================
// Stream Source
// =============================================================================

/// One configured subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSource {
    /// Unique name within a running instance.
    pub name: String,
    /// Payload family.
    pub kind: StreamKind,
    /// Transport endpoint, e.g. `ws://10.0.0.5:16666`.
    pub endpoint: String,
    /// Topic prefix filter (empty = everything).
    #[serde(default)]
    pub topic: String,
    /// Hostname tag applied when the payload carries none.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Interface tag applied when the payload carries none.
    #[serde(default)]
    pub interface: Option<String>,
    /// Per-stream point bound overriding the global default.
    #[serde(default)]
    pub retention_points: Option<usize>,
    /// Per-stream default limit for integrity queries.
    #[serde(default)]
    pub query_limit: Option<usize>,
    /// Route `trade` events through the batch aggregator.
    #[serde(default = "default_batch_trades")]
    pub batch_trades: bool,
}

const fn default_batch_trades() -> bool {
    true
}

impl StreamSource {
    /// Create a source with no overrides.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        kind: StreamKind,
        endpoint: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            endpoint: endpoint.into(),
            topic: topic.into(),
            hostname: None,
            interface: None,
            retention_points: None,
            query_limit: None,
            batch_trades: true,
        }
    }

    /// Set the default hostname/interface tags.
    #[must_use]
    pub fn with_defaults(mut self, hostname: Option<&str>, interface: Option<&str>) -> Self {
        self.hostname = hostname.map(str::to_string);
        self.interface = interface.map(str::to_string);
        self
    }

    /// Set the per-stream point bound.
    #[must_use]
    pub const fn with_retention_points(mut self, points: usize) -> Self {
        self.retention_points = Some(points);
        self
    }

    /// Enable or disable trade batching.
    #[must_use]
    pub const fn with_batch_trades(mut self, enabled: bool) -> Self {
        self.batch_trades = enabled;
        self
    }

    /// Default tags handed to the store with every payload from this stream.
    #[must_use]
    pub fn defaults(&self) -> SourceDefaults {
        SourceDefaults {
            hostname: self.hostname.clone().filter(|h| !h.is_empty()),
            interface: self.interface.clone().filter(|i| !i.is_empty()),
        }
    }
}

// =============================================================================
// Default Tags
// =============================================================================

/// Host/interface tags applied to integrity events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceDefaults {
    /// Default hostname.
    pub hostname: Option<String>,
    /// Default interface.
    pub interface: Option<String>,
}

impl SourceDefaults {
    /// Merge in newly supplied tags. Empty values never overwrite.
    pub fn merge(&mut self, other: &Self) {
        if let Some(hostname) = other.hostname.as_ref().filter(|h| !h.is_empty()) {
            self.hostname = Some(hostname.clone());
        }
        if let Some(interface) = other.interface.as_ref().filter(|i| !i.is_empty()) {
            self.interface = Some(interface.clone());
        }
    }

    /// Hostname or empty string.
    #[must_use]
    pub fn hostname(&self) -> &str {
        self.hostname.as_deref().unwrap_or_default()
    }

    /// Interface or empty string.
    #[must_use]
    pub fn interface(&self) -> &str {
        self.interface.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_with_defaults() {
        let json = r#"{"name":"bn","kind":"integrity","endpoint":"ws://h:1"}"#;
        let source: StreamSource = serde_json::from_str(json).unwrap();
        assert_eq!(source.name, "bn");
        assert_eq!(source.kind, StreamKind::Integrity);
        assert!(source.topic.is_empty());
        assert!(source.batch_trades);
        assert!(source.retention_points.is_none());
    }

    #[test]
    fn xdp_alias_maps_to_throughput() {
        let json = r#"{"name":"x","kind":"xdp","endpoint":"ws://h:1","topic":"xdp"}"#;
        let source: StreamSource = serde_json::from_str(json).unwrap();
        assert_eq!(source.kind, StreamKind::Throughput);
    }

    #[test]
    fn empty_default_tags_are_dropped() {
        let source = StreamSource::new("a", StreamKind::Integrity, "ws://h:1", "")
            .with_defaults(Some(""), Some("eth0"));
        let defaults = source.defaults();
        assert!(defaults.hostname.is_none());
        assert_eq!(defaults.interface(), "eth0");
    }

    #[test]
    fn merge_keeps_existing_on_empty() {
        let mut base = SourceDefaults {
            hostname: Some("h1".to_string()),
            interface: None,
        };
        base.merge(&SourceDefaults {
            hostname: Some(String::new()),
            interface: Some("ens18".to_string()),
        });
        assert_eq!(base.hostname(), "h1");
        assert_eq!(base.interface(), "ens18");
    }
}
