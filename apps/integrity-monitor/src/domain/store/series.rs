//! Bounded Series
//!
//! A keyed family of FIFO series. Points are appended at the back and
//! evicted from the front, so every series stays ordered by arrival.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use crate::domain::points::TimedPoint;

/// One bounded, append-only sequence of points.
pub type Series<P> = VecDeque<Arc<P>>;

/// Drop points with `timestamp < cutoff` from the front.
pub fn prune_front<P: TimedPoint>(series: &mut Series<P>, cutoff: f64) {
    while series.front().is_some_and(|p| p.timestamp() < cutoff) {
        series.pop_front();
    }
}

/// Pop the oldest points until `series.len() <= bound`.
pub fn truncate_front<P>(series: &mut Series<P>, bound: usize) {
    while series.len() > bound {
        series.pop_front();
    }
}

/// Series keyed by composite key, iterated in key order.
#[derive(Debug)]
pub struct SeriesMap<P> {
    series: BTreeMap<String, Series<P>>,
}

impl<P> Default for SeriesMap<P> {
    fn default() -> Self {
        Self {
            series: BTreeMap::new(),
        }
    }
}

impl<P: TimedPoint> SeriesMap<P> {
    /// Append a point and apply the count bound, if any.
    ///
    /// Returns `true` when the key was new.
    pub fn push(&mut self, key: &str, point: Arc<P>, bound: Option<usize>) -> bool {
        let is_new = !self.series.contains_key(key);
        let series = self.series.entry(key.to_string()).or_default();
        series.push_back(point);
        if let Some(bound) = bound {
            truncate_front(series, bound);
        }
        if series.is_empty() {
            self.series.remove(key);
        }
        is_new
    }

    /// Apply an age cutoff to every series, removing emptied ones.
    pub fn prune(&mut self, cutoff: f64) {
        self.series.retain(|_, series| {
            prune_front(series, cutoff);
            !series.is_empty()
        });
    }

    /// Iterate `(key, series)` in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Series<P>)> {
        self.series.iter()
    }

    /// Copy every series into independent containers.
    #[must_use]
    pub fn copy_out(&self) -> BTreeMap<String, Vec<Arc<P>>> {
        self.series
            .iter()
            .map(|(key, series)| (key.clone(), series.iter().cloned().collect()))
            .collect()
    }

    /// Number of series.
    #[must_use]
    pub fn len(&self) -> usize {
        self.series.len()
    }

    /// Whether no series exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}
