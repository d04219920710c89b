//! In-process transport.
//!
//! Endpoints are plain names. Publishing fans a frame out to every live
//! subscription on that endpoint whose prefix matches.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ChannelSubscription, matches_prefix};
use crate::application::ports::{Frame, Subscription, Transport, TransportError};

struct Route {
    id: u64,
    endpoint: String,
    prefix: String,
    tx: Sender<Frame>,
}

/// In-memory publish/subscribe bus.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    routes: Arc<Mutex<Vec<Route>>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("subscriptions", &self.routes.lock().len())
            .finish()
    }
}

impl MemoryTransport {
    /// Empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a frame; returns how many subscriptions received it.
    pub fn publish(&self, endpoint: &str, frame: Frame) -> usize {
        let mut routes = self.routes.lock();
        let mut delivered = 0;
        routes.retain(|route| {
            if route.endpoint != endpoint || !matches_prefix(&frame, &route.prefix) {
                return true;
            }
            if route.tx.send(frame.clone()).is_ok() {
                delivered += 1;
                true
            } else {
                false
            }
        });
        delivered
    }

    /// Live subscriptions on `endpoint`.
    #[must_use]
    pub fn subscriber_count(&self, endpoint: &str) -> usize {
        self.routes
            .lock()
            .iter()
            .filter(|route| route.endpoint == endpoint)
            .count()
    }
}

impl Transport for MemoryTransport {
    fn subscribe(
        &self,
        endpoint: &str,
        topic: &str,
    ) -> Result<Arc<dyn Subscription>, TransportError> {
        if endpoint.is_empty() {
            return Err(TransportError::Subscribe {
                endpoint: endpoint.to_string(),
                reason: "empty endpoint".to_string(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        self.routes.lock().push(Route {
            id,
            endpoint: endpoint.to_string(),
            prefix: topic.to_string(),
            tx,
        });
        debug!(endpoint, topic, id, "Memory subscription opened");

        let routes = Arc::clone(&self.routes);
        let subscription = ChannelSubscription::new(rx, CancellationToken::new())
            .with_close_hook(move || routes.lock().retain(|route| route.id != id));
        Ok(Arc::new(subscription))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn publish_respects_endpoint_and_prefix() {
        let bus = MemoryTransport::new();
        let all = bus.subscribe("a", "").unwrap();
        let xdp = bus.subscribe("a", "xdp").unwrap();
        let other = bus.subscribe("b", "").unwrap();

        assert_eq!(bus.publish("a", Frame::with_topic("xdp.h1", "{}")), 2);
        assert_eq!(bus.publish("a", Frame::with_topic("integrity", "{}")), 1);

        let wait = Duration::from_millis(5);
        assert!(all.recv(wait).unwrap().is_some());
        assert!(all.recv(wait).unwrap().is_some());
        assert!(xdp.recv(wait).unwrap().is_some());
        assert!(xdp.recv(wait).unwrap().is_none());
        assert!(other.recv(wait).unwrap().is_none());
    }

    #[test]
    fn close_removes_route() {
        let bus = MemoryTransport::new();
        let sub = bus.subscribe("a", "").unwrap();
        assert_eq!(bus.subscriber_count("a"), 1);
        sub.close();
        assert_eq!(bus.subscriber_count("a"), 0);
        assert_eq!(bus.publish("a", Frame::single("{}")), 0);
    }

    #[test]
    fn rejects_empty_endpoint() {
        let bus = MemoryTransport::new();
        assert!(matches!(
            bus.subscribe("", ""),
            Err(TransportError::Subscribe { .. })
        ));
    }
}
