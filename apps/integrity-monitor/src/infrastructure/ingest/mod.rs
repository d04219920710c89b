//! Ingestion Workers
//!
//! One named OS thread per stream source. Each worker blocks on its
//! subscription with a bounded poll, decodes frames and calls the shared
//! [`PayloadHandler`] synchronously. A bad frame or a failing handler only
//! costs that one message.
//!
//! # Shutdown
//!
//! [`IngestionWorker::stop`] cancels the worker and closes its subscription
//! so a blocked receive returns promptly. [`IngestionWorker::join`] waits a
//! bounded time for the thread to exit and abandons it otherwise.

pub mod codec;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use self::codec::{CodecError, decode_frame};
use crate::application::ports::{
    Frame, HandlerError, PayloadHandler, Subscription, TransportError,
};
use crate::domain::source::StreamSource;
use crate::infrastructure::metrics;

/// Default receive poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default bound on waiting for a worker to exit.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_millis(1500);

/// Interval between progress log lines.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(30);

/// Pause after a transient receive error.
const RECEIVE_ERROR_PAUSE: Duration = Duration::from_millis(200);

/// Poll step while waiting for a worker thread to finish.
const JOIN_POLL: Duration = Duration::from_millis(10);

// =============================================================================
// Worker Stats
// =============================================================================

/// Per-worker counters.
#[derive(Debug, Default)]
pub struct WorkerStats {
    messages: AtomicU64,
    decode_errors: AtomicU64,
    discarded: AtomicU64,
    handler_errors: AtomicU64,
    last_topic: RwLock<Option<String>>,
}

impl WorkerStats {
    /// Frames received.
    #[must_use]
    pub fn messages(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    /// Frames discarded as undecodable.
    #[must_use]
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    /// Objects that matched no payload shape for the stream.
    #[must_use]
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    /// Payloads whose handler failed or panicked.
    #[must_use]
    pub fn handler_errors(&self) -> u64 {
        self.handler_errors.load(Ordering::Relaxed)
    }

    /// Topic of the most recent decodable frame.
    #[must_use]
    pub fn last_topic(&self) -> Option<String> {
        self.last_topic.read().clone()
    }
}

// =============================================================================
// Worker
// =============================================================================

/// Handle to one running ingestion thread.
pub struct IngestionWorker {
    source: Arc<StreamSource>,
    cancel: CancellationToken,
    subscription: Arc<dyn Subscription>,
    stats: Arc<WorkerStats>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for IngestionWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionWorker")
            .field("stream", &self.source.name)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

struct WorkerLoop {
    source: Arc<StreamSource>,
    cancel: CancellationToken,
    subscription: Arc<dyn Subscription>,
    handler: Arc<dyn PayloadHandler>,
    stats: Arc<WorkerStats>,
    poll_interval: Duration,
}

impl IngestionWorker {
    /// Start a worker thread named `ingest-<stream>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to create the thread.
    pub fn spawn(
        source: Arc<StreamSource>,
        subscription: Arc<dyn Subscription>,
        handler: Arc<dyn PayloadHandler>,
        poll_interval: Duration,
    ) -> std::io::Result<Self> {
        let cancel = CancellationToken::new();
        let stats = Arc::new(WorkerStats::default());
        let worker = WorkerLoop {
            source: Arc::clone(&source),
            cancel: cancel.clone(),
            subscription: Arc::clone(&subscription),
            handler,
            stats: Arc::clone(&stats),
            poll_interval,
        };

        let thread = std::thread::Builder::new()
            .name(format!("ingest-{}", source.name))
            .spawn(move || worker.run())?;

        Ok(Self {
            source,
            cancel,
            subscription,
            stats,
            thread: Some(thread),
        })
    }

    /// Stream this worker serves.
    #[must_use]
    pub fn source(&self) -> &Arc<StreamSource> {
        &self.source
    }

    /// Shared counters.
    #[must_use]
    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Signal the worker to stop and unblock its receive.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            debug!(stream = %self.source.name, "Stopping ingestion worker");
            self.cancel.cancel();
            self.subscription.close();
        }
    }

    /// Wait up to `timeout` for the thread to exit.
    ///
    /// Returns `false` when the worker was abandoned.
    pub async fn join(mut self, timeout: Duration) -> bool {
        let Some(thread) = self.thread.take() else {
            return true;
        };
        let deadline = Instant::now() + timeout;
        while !thread.is_finished() {
            if Instant::now() >= deadline {
                warn!(
                    stream = %self.source.name,
                    timeout_ms = timeout.as_millis(),
                    "Ingestion worker did not exit in time, abandoning"
                );
                return false;
            }
            tokio::time::sleep(JOIN_POLL).await;
        }
        if thread.join().is_err() {
            error!(stream = %self.source.name, "Ingestion worker thread panicked");
        }
        true
    }
}

impl Drop for IngestionWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl WorkerLoop {
    fn run(self) {
        info!(
            stream = %self.source.name,
            kind = self.source.kind.as_str(),
            endpoint = %self.source.endpoint,
            topic = %self.source.topic,
            "Ingestion worker started"
        );
        let mut last_progress = Instant::now();

        while !self.cancel.is_cancelled() {
            match self.subscription.recv(self.poll_interval) {
                Ok(None) => {}
                Ok(Some(frame)) => {
                    self.on_frame(&frame, &mut last_progress);
                }
                Err(TransportError::Closed) => {
                    if !self.cancel.is_cancelled() {
                        warn!(stream = %self.source.name, "Subscription closed");
                    }
                    break;
                }
                Err(e) => {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    warn!(stream = %self.source.name, error = %e, "Receive failed, retrying");
                    std::thread::sleep(RECEIVE_ERROR_PAUSE);
                }
            }
        }

        info!(
            stream = %self.source.name,
            messages = self.stats.messages(),
            decode_errors = self.stats.decode_errors(),
            discarded = self.stats.discarded(),
            handler_errors = self.stats.handler_errors(),
            "Ingestion worker stopped"
        );
    }

    fn on_frame(&self, frame: &Frame, last_progress: &mut Instant) {
        let count = self.stats.messages.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::record_message_received(&self.source.name);

        let decoded = match decode_frame(frame) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                metrics::record_decode_error(&self.source.name);
                match e {
                    CodecError::NotAnObject(_) => {
                        debug!(stream = %self.source.name, error = %e, "Discarding frame");
                    }
                    _ => warn!(stream = %self.source.name, error = %e, "Discarding frame"),
                }
                return;
            }
        };

        if count == 1 || last_progress.elapsed() >= PROGRESS_INTERVAL {
            info!(
                stream = %self.source.name,
                messages = count,
                topic = %decoded.topic,
                "Ingestion progress"
            );
            *last_progress = Instant::now();
        }
        self.stats
            .last_topic
            .write()
            .replace(decoded.topic.clone());

        let topic = decoded.topic;
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.handler.handle(&self.source, &topic, decoded.payload)
        }));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e @ HandlerError::UnrecognizedPayload { .. })) => {
                self.stats.discarded.fetch_add(1, Ordering::Relaxed);
                metrics::record_payload_discarded(&self.source.name);
                debug!(
                    stream = %self.source.name,
                    topic = %topic,
                    error = %e,
                    "Discarding payload"
                );
            }
            Ok(Err(e)) => {
                self.stats.handler_errors.fetch_add(1, Ordering::Relaxed);
                metrics::record_handler_error(&self.source.name);
                error!(stream = %self.source.name, topic = %topic, error = %e, "Handler failed");
            }
            Err(panic) => {
                self.stats.handler_errors.fetch_add(1, Ordering::Relaxed);
                metrics::record_handler_error(&self.source.name);
                error!(
                    stream = %self.source.name,
                    topic = %topic,
                    panic = panic_message(panic.as_ref()),
                    "Handler panicked"
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
