//! Broadcast Hub and Delivery Context
//!
//! Fans live updates out to registered sinks.
//!
//! # Architecture
//!
//! The [`BroadcastHub`] is a plain single-owner registry. It is owned
//! exclusively by the [`DeliveryContext`] task, which executes
//! [`HubCommand`]s from an unbounded channel in order. Ingestion threads
//! and aggregator timers never touch the hub directly; they schedule
//! commands through the context.
//!
//! ```text
//! worker thread ──┐
//! worker thread ──┼──► HubCommand channel ──► DeliveryContext task ──► BroadcastHub ──► sinks
//! batch timer ────┘
//! ```
//!
//! Sinks that fail a delivery are removed after the pass completes.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::ports::{Sink, SinkError, SinkId, UpdatePublisher};
use crate::domain::messages::HubMessage;
use crate::domain::store::{MetricStore, Snapshot};
use crate::infrastructure::metrics;

/// Default backlog depth that triggers a warning.
pub const DEFAULT_BACKLOG_WARN: usize = 10_000;

// =============================================================================
// Broadcast Hub
// =============================================================================

/// Registry of live sinks.
#[derive(Default)]
pub struct BroadcastHub {
    sinks: Vec<Arc<dyn Sink>>,
}

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl BroadcastHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `snapshot` to the sink, then register it.
    ///
    /// Returns `false` (and does not register) when the snapshot could not
    /// be delivered.
    pub fn join(&mut self, sink: Arc<dyn Sink>, snapshot: Snapshot) -> bool {
        let message = Arc::new(HubMessage::Snapshot { payload: snapshot });
        if let Err(e) = sink.deliver(&message) {
            warn!(sink = %sink.id(), error = %e, "Snapshot delivery failed, not registering sink");
            return false;
        }
        debug!(sink = %sink.id(), "Sink joined");
        self.sinks.push(sink);
        metrics::set_registered_sinks(self.sinks.len());
        true
    }

    /// Unregister a sink. Returns whether it was registered.
    pub fn leave(&mut self, id: SinkId) -> bool {
        let before = self.sinks.len();
        self.sinks.retain(|s| s.id() != id);
        let removed = self.sinks.len() != before;
        if removed {
            debug!(sink = %id, "Sink left");
            metrics::set_registered_sinks(self.sinks.len());
        }
        removed
    }

    /// Deliver `message` to every sink, then prune the ones that failed.
    ///
    /// Returns the number of successful deliveries.
    pub fn publish(&mut self, message: HubMessage) -> usize {
        let message = Arc::new(message);
        let mut dead: Vec<(SinkId, SinkError)> = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.deliver(&message) {
                dead.push((sink.id(), e));
            }
        }

        let delivered = self.sinks.len() - dead.len();
        if !dead.is_empty() {
            for (id, e) in &dead {
                info!(sink = %id, error = %e, "Removing dead sink");
            }
            self.sinks.retain(|s| !dead.iter().any(|(id, _)| *id == s.id()));
            metrics::record_sinks_pruned(dead.len());
            metrics::set_registered_sinks(self.sinks.len());
        }
        delivered
    }

    /// Number of registered sinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Whether no sinks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

// =============================================================================
// Channel Sink
// =============================================================================

/// Sink backed by an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    id: SinkId,
    tx: mpsc::UnboundedSender<Arc<HubMessage>>,
}

impl ChannelSink {
    /// Create a sink and the receiver its messages arrive on.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Arc<HubMessage>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }
}

impl Sink for ChannelSink {
    fn id(&self) -> SinkId {
        self.id
    }

    fn deliver(&self, message: &Arc<HubMessage>) -> Result<(), SinkError> {
        self.tx
            .send(Arc::clone(message))
            .map_err(|_| SinkError::Disconnected)
    }
}

// =============================================================================
// Delivery Context
// =============================================================================

/// Work executed on the delivery context.
pub enum HubCommand {
    /// Snapshot the store, deliver it, register the sink.
    Join(Arc<dyn Sink>),
    /// Unregister a sink.
    Leave(SinkId),
    /// Broadcast a message.
    Publish(HubMessage),
}

impl std::fmt::Debug for HubCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Join(sink) => f.debug_tuple("Join").field(&sink.id()).finish(),
            Self::Leave(id) => f.debug_tuple("Leave").field(id).finish(),
            Self::Publish(_) => f.write_str("Publish"),
        }
    }
}

/// Single task owning the hub; the only path into it from other threads.
#[derive(Debug)]
pub struct DeliveryContext {
    tx: RwLock<Option<mpsc::UnboundedSender<HubCommand>>>,
    backlog: Arc<AtomicUsize>,
    backlog_warn: usize,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DeliveryContext {
    /// Spawn the context task on `runtime`.
    #[must_use]
    pub fn spawn(store: Arc<MetricStore>, backlog_warn: usize, runtime: &Handle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let backlog = Arc::new(AtomicUsize::new(0));
        let task = runtime.spawn(run(rx, store, Arc::clone(&backlog)));
        info!(backlog_warn, "Delivery context started");

        Self {
            tx: RwLock::new(Some(tx)),
            backlog,
            backlog_warn: backlog_warn.max(1),
            task: Mutex::new(Some(task)),
        }
    }

    /// Schedule a command. Returns `false` once closed.
    pub fn send(&self, command: HubCommand) -> bool {
        let guard = self.tx.read();
        let Some(tx) = guard.as_ref() else {
            debug!(?command, "Delivery context closed, ignoring command");
            return false;
        };

        let depth = self.backlog.fetch_add(1, Ordering::Relaxed) + 1;
        if tx.send(command).is_err() {
            self.backlog.fetch_sub(1, Ordering::Relaxed);
            return false;
        }
        if depth == self.backlog_warn {
            warn!(depth, "Delivery backlog crossed warning threshold");
        }
        true
    }

    /// Schedule a sink join.
    pub fn join(&self, sink: Arc<dyn Sink>) -> bool {
        self.send(HubCommand::Join(sink))
    }

    /// Schedule a sink leave.
    pub fn leave(&self, id: SinkId) -> bool {
        self.send(HubCommand::Leave(id))
    }

    /// Commands queued but not yet executed.
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.backlog.load(Ordering::Relaxed)
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.read().is_none()
    }

    /// Stop accepting commands, let the task drain its queue and await it.
    pub async fn close(&self) {
        self.tx.write().take();
        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "Delivery context task ended abnormally");
        }
    }
}

impl UpdatePublisher for DeliveryContext {
    fn schedule(&self, message: HubMessage) -> bool {
        self.send(HubCommand::Publish(message))
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<HubCommand>,
    store: Arc<MetricStore>,
    backlog: Arc<AtomicUsize>,
) {
    let mut hub = BroadcastHub::new();

    while let Some(command) = rx.recv().await {
        let depth = backlog.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        metrics::set_delivery_backlog(depth);

        match command {
            HubCommand::Join(sink) => {
                hub.join(sink, store.snapshot());
            }
            HubCommand::Leave(id) => {
                hub.leave(id);
            }
            HubCommand::Publish(message) => {
                hub.publish(message);
            }
        }
    }

    info!(sinks = hub.len(), "Delivery context stopped");
}

// =============================================================================
// Tests
// =============================================================================
