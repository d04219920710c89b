//! Port Interfaces
//!
//! Contracts between the pipeline and its adapters.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`Transport`] / [`Subscription`]: publish/subscribe frame source
//! - [`Sink`]: one live-update destination
//! - [`UpdatePublisher`]: schedules hub messages onto the delivery context
//!
//! ## Driver Ports (Inbound)
//!
//! - [`PayloadHandler`]: invoked by ingestion workers per decoded payload
//! - [`BatchProcessor`]: invoked by the aggregator per flushed batch

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::domain::messages::HubMessage;
use crate::domain::payload::IntegrityEvent;
use crate::domain::source::{SourceDefaults, StreamSource};

// =============================================================================
// Transport
// =============================================================================

/// One multi-part message received from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    parts: Vec<Vec<u8>>,
}

impl Frame {
    /// Frame from raw parts.
    #[must_use]
    pub const fn new(parts: Vec<Vec<u8>>) -> Self {
        Self { parts }
    }

    /// Frame with one payload part and no topic.
    #[must_use]
    pub fn single(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            parts: vec![payload.into()],
        }
    }

    /// Frame with a topic part followed by a payload part.
    #[must_use]
    pub fn with_topic(topic: &str, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            parts: vec![topic.as_bytes().to_vec(), payload.into()],
        }
    }

    /// Raw parts.
    #[must_use]
    pub fn parts(&self) -> &[Vec<u8>] {
        &self.parts
    }
}

/// Transport-level failure.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Endpoint could not be parsed or reached.
    #[error("failed to subscribe to {endpoint}: {reason}")]
    Subscribe {
        /// Endpoint that failed.
        endpoint: String,
        /// Failure description.
        reason: String,
    },

    /// A receive failed; the subscription may still recover.
    #[error("receive error: {0}")]
    Receive(String),

    /// Subscription was closed and will yield no more frames.
    #[error("subscription closed")]
    Closed,
}

/// Publish/subscribe capability.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Subscribe to frames whose topic starts with `topic` on `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Subscribe`] when the endpoint is unusable.
    fn subscribe(
        &self,
        endpoint: &str,
        topic: &str,
    ) -> Result<Arc<dyn Subscription>, TransportError>;
}

/// One live subscription.
///
/// `recv` is called from a single worker thread; `close` may be called
/// from any thread and must make a blocked `recv` return promptly.
pub trait Subscription: Send + Sync {
    /// Wait up to `timeout` for the next frame. `Ok(None)` on timeout.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] once closed; other variants are transient.
    fn recv(&self, timeout: Duration) -> Result<Option<Frame>, TransportError>;

    /// Close the subscription. Idempotent.
    fn close(&self);
}

// =============================================================================
// Handlers
// =============================================================================

/// Failure inside a payload handler or batch processor.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Object carried none of the fields expected for the stream kind.
    #[error("unrecognized {kind} payload")]
    UnrecognizedPayload {
        /// Stream kind name.
        kind: &'static str,
    },

    /// Handler-specific failure.
    #[error("{0}")]
    Failed(String),
}

/// Consumer of decoded payloads for one or more streams.
#[cfg_attr(test, mockall::automock)]
pub trait PayloadHandler: Send + Sync {
    /// Handle one decoded JSON object.
    ///
    /// # Errors
    ///
    /// Errors are logged by the caller and never stop ingestion.
    fn handle(
        &self,
        source: &Arc<StreamSource>,
        topic: &str,
        payload: Map<String, Value>,
    ) -> Result<(), HandlerError>;
}

/// Every event held by one flushed pending batch.
#[derive(Debug, Clone)]
pub struct FlushedBatch {
    /// Source stream.
    pub source: Arc<StreamSource>,
    /// Topic of the first event.
    pub topic: String,
    /// Events in arrival order.
    pub events: Vec<IntegrityEvent>,
    /// Default tags merged across adds.
    pub defaults: SourceDefaults,
}

/// Consumer of flushed batches.
#[cfg_attr(test, mockall::automock)]
pub trait BatchProcessor: Send + Sync {
    /// Process one batch.
    ///
    /// # Errors
    ///
    /// Errors are logged by the aggregator and never propagated.
    fn process(&self, batch: FlushedBatch) -> Result<(), HandlerError>;
}

// =============================================================================
// Delivery
// =============================================================================

/// Failure delivering to one sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Receiving side is gone.
    #[error("sink disconnected")]
    Disconnected,

    /// Delivery failed for another reason.
    #[error("delivery failed: {0}")]
    Failed(String),
}

/// Identifier of a registered sink.
pub type SinkId = uuid::Uuid;

/// One live-update destination.
#[cfg_attr(test, mockall::automock)]
pub trait Sink: Send + Sync {
    /// Stable identifier.
    fn id(&self) -> SinkId;

    /// Deliver one message without blocking.
    ///
    /// # Errors
    ///
    /// Any error marks the sink dead; the hub removes it after the pass.
    fn deliver(&self, message: &Arc<HubMessage>) -> Result<(), SinkError>;
}

/// Schedules messages onto the delivery context from any thread.
#[cfg_attr(test, mockall::automock)]
pub trait UpdatePublisher: Send + Sync {
    /// Queue a message for broadcast. Returns `false` once closed.
    fn schedule(&self, message: HubMessage) -> bool;
}
