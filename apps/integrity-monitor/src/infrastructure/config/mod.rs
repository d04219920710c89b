//! Configuration Module
//!
//! Environment-driven configuration for the monitor service. Stream sources
//! come from `MONITOR_STREAMS` (inline JSON) or `MONITOR_STREAMS_FILE`.

mod settings;

pub use settings::{
    ConfigError, DEFAULT_QUERY_LIMIT, DeliverySettings, IngestSettings, MonitorConfig,
    RetentionMode, RetentionSettings, ServerSettings, TransportSettings,
};
