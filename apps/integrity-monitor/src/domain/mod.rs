//! Domain Layer - Payloads, points and the bounded metric store.
//!
//! This layer has no knowledge of threads, channels or transports. The
//! store is the only stateful type and guards itself with its own locks.

/// Stream source descriptors.
pub mod source;

/// Inbound payload shapes and lenient field coercion.
pub mod payload;

/// Stored points and composite keys.
pub mod points;

/// Thread-safe bounded series store.
pub mod store;

/// Messages delivered to live-update sinks.
pub mod messages;
