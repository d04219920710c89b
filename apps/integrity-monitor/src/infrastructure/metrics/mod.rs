//! Prometheus Metrics Module
//!
//! Exposes pipeline metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Ingestion**: Messages received, decode and handler errors per stream
//! - **Batching**: Flushed trade batches and their sizes
//! - **Delivery**: Registered sinks, pruned sinks, delivery backlog
//! - **Latency**: Handler processing time
//!
//! # Integration
//!
//! With a non-zero port the exporter serves `/metrics` itself; with port 0
//! only the recorder is installed and the handle is returned for rendering.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder.
///
/// Must be called from within a tokio runtime when `port` is non-zero.
///
/// # Errors
///
/// Returns an error if a recorder is already installed or the listener
/// cannot be bound.
pub fn init_metrics(port: u16) -> Result<Option<PrometheusHandle>, BuildError> {
    let handle = if port == 0 {
        Some(PrometheusBuilder::new().install_recorder()?)
    } else {
        PrometheusBuilder::new()
            .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
            .install()?;
        None
    };
    register_metrics();
    Ok(handle)
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Ingestion counters
    describe_counter!(
        "integrity_monitor_messages_received_total",
        "Total frames received per stream"
    );
    describe_counter!(
        "integrity_monitor_decode_errors_total",
        "Total frames discarded because the payload was not a JSON object"
    );
    describe_counter!(
        "integrity_monitor_payloads_discarded_total",
        "Total objects discarded because they matched no payload shape"
    );
    describe_counter!(
        "integrity_monitor_handler_errors_total",
        "Total payloads whose handler failed or panicked"
    );
    describe_counter!(
        "integrity_monitor_reconnects_total",
        "Total transport reconnection attempts"
    );

    // Batching
    describe_counter!(
        "integrity_monitor_batches_flushed_total",
        "Total trade batches flushed"
    );
    describe_histogram!(
        "integrity_monitor_batch_size",
        "Number of events per flushed trade batch"
    );

    // Delivery
    describe_gauge!(
        "integrity_monitor_sinks",
        "Number of registered live-update sinks"
    );
    describe_counter!(
        "integrity_monitor_sinks_pruned_total",
        "Total sinks removed after a failed delivery"
    );
    describe_gauge!(
        "integrity_monitor_delivery_backlog",
        "Commands queued for the delivery context"
    );

    // Latency
    describe_histogram!(
        "integrity_monitor_handler_seconds",
        "Time to store and schedule one payload"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a frame received on a stream.
pub fn record_message_received(stream: &str) {
    counter!(
        "integrity_monitor_messages_received_total",
        "stream" => stream.to_string()
    )
    .increment(1);
}

/// Record a discarded, undecodable frame.
pub fn record_decode_error(stream: &str) {
    counter!(
        "integrity_monitor_decode_errors_total",
        "stream" => stream.to_string()
    )
    .increment(1);
}

/// Record an object that matched no payload shape.
pub fn record_payload_discarded(stream: &str) {
    counter!(
        "integrity_monitor_payloads_discarded_total",
        "stream" => stream.to_string()
    )
    .increment(1);
}

/// Record a handler failure.
pub fn record_handler_error(stream: &str) {
    counter!(
        "integrity_monitor_handler_errors_total",
        "stream" => stream.to_string()
    )
    .increment(1);
}

/// Record a transport reconnection attempt.
pub fn record_reconnect(endpoint: &str) {
    counter!(
        "integrity_monitor_reconnects_total",
        "endpoint" => endpoint.to_string()
    )
    .increment(1);
}

/// Record one flushed trade batch.
#[allow(clippy::cast_precision_loss)]
pub fn record_batch_flushed(stream: &str, size: usize) {
    counter!(
        "integrity_monitor_batches_flushed_total",
        "stream" => stream.to_string()
    )
    .increment(1);
    histogram!(
        "integrity_monitor_batch_size",
        "stream" => stream.to_string()
    )
    .record(size as f64);
}

/// Update the registered sink count.
#[allow(clippy::cast_precision_loss)]
pub fn set_registered_sinks(count: usize) {
    gauge!("integrity_monitor_sinks").set(count as f64);
}

/// Record sinks removed after a broadcast pass.
pub fn record_sinks_pruned(count: usize) {
    counter!("integrity_monitor_sinks_pruned_total").increment(count as u64);
}

/// Update the delivery backlog depth.
#[allow(clippy::cast_precision_loss)]
pub fn set_delivery_backlog(depth: usize) {
    gauge!("integrity_monitor_delivery_backlog").set(depth as f64);
}

/// Record handler duration.
pub fn record_handler_duration(stream: &str, duration: Duration) {
    histogram!(
        "integrity_monitor_handler_seconds",
        "stream" => stream.to_string()
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_a_noop() {
        record_message_received("bn");
        record_payload_discarded("bn");
        record_batch_flushed("bn", 3);
        set_registered_sinks(2);
        record_sinks_pruned(1);
        set_delivery_backlog(0);
        record_handler_duration("bn", Duration::from_millis(1));
    }
}
