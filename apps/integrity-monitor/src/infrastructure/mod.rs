//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the wiring that runs them.

/// Broadcast hub and the delivery context that owns it.
pub mod broadcast;

/// Configuration loading and validation.
pub mod config;

/// Ingestion worker threads and the frame codec.
pub mod ingest;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Startup and shutdown of the whole pipeline.
pub mod pipeline;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;

/// Publish/subscribe transport adapters.
pub mod transport;
