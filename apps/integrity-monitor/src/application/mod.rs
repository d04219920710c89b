//! Application Layer - Use cases and port definitions.
//!
//! Ports describe the transport, sinks and handlers; services implement
//! payload routing and trade batching on top of the domain store.

/// Port interfaces for transports, sinks and handlers.
pub mod ports;

/// Ingest routing and batch aggregation.
pub mod services;
