//! Application Services
//!
//! - `aggregator`: delayed micro-batching of `trade` integrity events
//! - `ingest`: payload routing into the store and onto the delivery context

pub mod aggregator;
pub mod ingest;

pub use aggregator::{BatchAggregator, BatchKey, DEFAULT_BATCH_DELAY, normalize_batch};
pub use ingest::{IngestHandler, SeriesWriter};
