#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )
)]

//! Integrity Monitor - Throughput & Market Data Integrity Backend
//!
//! Subscribes to publish/subscribe streams of bandwidth samples and exchange
//! integrity checks, keeps bounded in-memory series per key, records alerts
//! for failed checks, batches bursts of trade checks, and fans incremental
//! updates out to live viewers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure data and the store
//!   - `source`: Stream source descriptors and default tags
//!   - `payload`: Payload classification and lenient field coercion
//!   - `points`: Normalized throughput and integrity points
//!   - `store`: Bounded series store, alert log and read views
//!   - `messages`: Wire shapes for snapshots and updates
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Transport, handler, batch, sink and publisher contracts
//!   - `services`: Ingest routing and the trade batch aggregator
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `transport`: In-memory and WebSocket subscriptions
//!   - `ingest`: One worker thread per stream and the frame codec
//!   - `broadcast`: Hub and delivery context
//!   - `config`: Environment configuration
//!   - `pipeline`: Startup and ordered shutdown
//!
//! # Data Flow
//!
//! ```text
//! stream A ──► worker A ──┐
//!                         ├──► handler ──► store ──► delivery context ──► sinks
//! stream B ──► worker B ──┘       │                        ▲
//!                                 └──► trade batcher ──────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core data types and the store.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::messages::{HubMessage, SeriesUpdate, Update};
pub use domain::payload::{IntegrityEvent, Payload, ThroughputSample};
pub use domain::points::{IntegrityPoint, ThroughputPoint};
pub use domain::source::{SourceDefaults, StreamKind, StreamSource};
pub use domain::store::{IntegrityQuery, MetricStore, RetentionPolicy, Snapshot};

// Ports and services
pub use application::ports::{
    Frame, HandlerError, PayloadHandler, Sink, SinkError, SinkId, Subscription, Transport,
    TransportError, UpdatePublisher,
};
pub use application::services::{BatchAggregator, IngestHandler, SeriesWriter, normalize_batch};

// Infrastructure config
pub use infrastructure::config::{ConfigError, MonitorConfig};

// Delivery (for integration tests)
pub use infrastructure::broadcast::{BroadcastHub, ChannelSink, DeliveryContext, HubCommand};

// Transports
pub use infrastructure::transport::{MemoryTransport, ReconnectConfig, WebSocketTransport};

// Pipeline
pub use infrastructure::ingest::{IngestionWorker, WorkerStats};
pub use infrastructure::pipeline::{Pipeline, PipelineError};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
