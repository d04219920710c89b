//! Retention Policy
//!
//! One policy governs a store instance: either a point-count bound per
//! series or a maximum age applied uniformly to every series and the alert
//! log.

use std::collections::HashMap;
use std::time::Duration;

/// Default throughput points kept per series.
pub const DEFAULT_THROUGHPUT_POINTS: usize = 1440;

/// Default integrity points kept per series.
pub const DEFAULT_INTEGRITY_POINTS: usize = 720;

/// Default alert log length.
pub const DEFAULT_ALERT_POINTS: usize = 500;

/// Point-count bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountBounds {
    /// Points per throughput series.
    pub throughput_points: usize,
    /// Points per integrity series.
    pub integrity_points: usize,
    /// Alert log length.
    pub alert_points: usize,
    /// Per-stream override for both series types.
    pub per_stream: HashMap<String, usize>,
}

impl Default for CountBounds {
    fn default() -> Self {
        Self {
            throughput_points: DEFAULT_THROUGHPUT_POINTS,
            integrity_points: DEFAULT_INTEGRITY_POINTS,
            alert_points: DEFAULT_ALERT_POINTS,
            per_stream: HashMap::new(),
        }
    }
}

/// Eviction strategy for a metric store.
#[derive(Debug, Clone, PartialEq)]
pub enum RetentionPolicy {
    /// Pop oldest points while a series exceeds its bound.
    Count(CountBounds),
    /// Drop points older than `reference - max_age` seconds.
    Age {
        /// Maximum retained age in seconds.
        max_age: f64,
    },
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::Count(CountBounds::default())
    }
}

impl RetentionPolicy {
    /// Count policy with global bounds and no overrides.
    #[must_use]
    pub fn count(throughput_points: usize, integrity_points: usize, alert_points: usize) -> Self {
        Self::Count(CountBounds {
            throughput_points,
            integrity_points,
            alert_points,
            per_stream: HashMap::new(),
        })
    }

    /// Age policy.
    #[must_use]
    pub fn age(max_age: Duration) -> Self {
        Self::Age {
            max_age: max_age.as_secs_f64(),
        }
    }

    /// Add a per-stream point bound. Ignored under the age policy.
    #[must_use]
    pub fn with_stream_bound(mut self, stream: impl Into<String>, points: usize) -> Self {
        if let Self::Count(bounds) = &mut self {
            bounds.per_stream.insert(stream.into(), points);
        }
        self
    }

    /// Whether this is the age policy.
    #[must_use]
    pub const fn is_age(&self) -> bool {
        matches!(self, Self::Age { .. })
    }

    pub(crate) fn throughput_bound(&self, stream: &str) -> Option<usize> {
        match self {
            Self::Count(b) => Some(
                b.per_stream
                    .get(stream)
                    .copied()
                    .unwrap_or(b.throughput_points),
            ),
            Self::Age { .. } => None,
        }
    }

    pub(crate) fn integrity_bound(&self, stream: &str) -> Option<usize> {
        match self {
            Self::Count(b) => Some(
                b.per_stream
                    .get(stream)
                    .copied()
                    .unwrap_or(b.integrity_points),
            ),
            Self::Age { .. } => None,
        }
    }

    pub(crate) const fn alert_bound(&self) -> Option<usize> {
        match self {
            Self::Count(b) => Some(b.alert_points),
            Self::Age { .. } => None,
        }
    }

    /// Oldest timestamp still retained relative to `reference`.
    pub(crate) fn cutoff(&self, reference: f64) -> Option<f64> {
        match self {
            Self::Count(_) => None,
            Self::Age { max_age } => Some(reference - max_age),
        }
    }
}
