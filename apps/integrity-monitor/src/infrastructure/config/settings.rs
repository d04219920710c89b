//! Configuration settings.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::application::services::DEFAULT_BATCH_DELAY;
use crate::domain::source::StreamSource;
use crate::domain::store::{
    DEFAULT_ALERT_POINTS, DEFAULT_INTEGRITY_POINTS, DEFAULT_THROUGHPUT_POINTS, RetentionPolicy,
};
use crate::infrastructure::broadcast::DEFAULT_BACKLOG_WARN;
use crate::infrastructure::ingest::{DEFAULT_JOIN_TIMEOUT, DEFAULT_POLL_INTERVAL};
use crate::infrastructure::transport::ReconnectConfig;

/// Default integrity query limit.
pub const DEFAULT_QUERY_LIMIT: usize = 180;

/// Eviction mode selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetentionMode {
    /// Bound every series by point count.
    #[default]
    Count,
    /// Drop points older than a maximum age.
    Age,
}

impl RetentionMode {
    /// Parse from string (case-insensitive). `None` for unknown modes.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "count" => Some(Self::Count),
            "age" | "time" => Some(Self::Age),
            _ => None,
        }
    }

    /// Get the mode name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Age => "age",
        }
    }
}

/// Store retention settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionSettings {
    /// Eviction mode.
    pub mode: RetentionMode,
    /// Points per throughput series.
    pub throughput_points: usize,
    /// Points per integrity series.
    pub integrity_points: usize,
    /// Alert log length.
    pub alert_points: usize,
    /// Maximum point age under the age mode.
    pub max_age: Duration,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            mode: RetentionMode::Count,
            throughput_points: DEFAULT_THROUGHPUT_POINTS,
            integrity_points: DEFAULT_INTEGRITY_POINTS,
            alert_points: DEFAULT_ALERT_POINTS,
            max_age: Duration::from_secs(3600),
        }
    }
}

impl RetentionSettings {
    /// Build the store policy, applying per-stream point overrides.
    #[must_use]
    pub fn policy(&self, streams: &[StreamSource]) -> RetentionPolicy {
        match self.mode {
            RetentionMode::Age => RetentionPolicy::age(self.max_age),
            RetentionMode::Count => streams
                .iter()
                .filter_map(|s| s.retention_points.map(|points| (s.name.as_str(), points)))
                .fold(
                    RetentionPolicy::count(
                        self.throughput_points,
                        self.integrity_points,
                        self.alert_points,
                    ),
                    |policy, (name, points)| policy.with_stream_bound(name, points),
                ),
        }
    }
}

/// Ingestion and batching settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSettings {
    /// Receive poll interval per worker.
    pub poll_interval: Duration,
    /// Bound on waiting for each worker at shutdown.
    pub join_timeout: Duration,
    /// Trade batch flush delay.
    pub batch_delay: Duration,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            batch_delay: DEFAULT_BATCH_DELAY,
        }
    }
}

/// Delivery and read-side settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverySettings {
    /// Backlog depth that triggers a warning.
    pub backlog_warn: usize,
    /// Default integrity query limit.
    pub query_limit: usize,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            backlog_warn: DEFAULT_BACKLOG_WARN,
            query_limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

/// Transport reconnect settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportSettings {
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for TransportSettings {
    fn default() -> Self {
        let reconnect = ReconnectConfig::default();
        Self {
            reconnect_delay_initial: reconnect.initial_delay,
            reconnect_delay_max: reconnect.max_delay,
            reconnect_delay_multiplier: reconnect.multiplier,
            max_reconnect_attempts: reconnect.max_attempts,
        }
    }
}

impl TransportSettings {
    /// Backoff configuration for transport adapters.
    #[must_use]
    pub fn reconnect(&self) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: self.reconnect_delay_initial,
            max_delay: self.reconnect_delay_max,
            multiplier: self.reconnect_delay_multiplier,
            max_attempts: self.max_reconnect_attempts,
            ..ReconnectConfig::default()
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Prometheus metrics port (0 = recorder only).
    pub metrics_port: u16,
    /// Housekeeping interval for age-based pruning.
    pub prune_interval: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            metrics_port: 9090,
            prune_interval: Duration::from_secs(30),
        }
    }
}

/// Complete monitor configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Configured stream sources.
    pub streams: Vec<StreamSource>,
    /// Store retention.
    pub retention: RetentionSettings,
    /// Ingestion and batching.
    pub ingest: IngestSettings,
    /// Delivery and read side.
    pub delivery: DeliverySettings,
    /// Transport reconnect behaviour.
    pub transport: TransportSettings,
    /// Ports and housekeeping.
    pub server: ServerSettings,
}

impl MonitorConfig {
    /// Configuration with defaults for everything but the streams.
    #[must_use]
    pub fn new(streams: Vec<StreamSource>) -> Self {
        Self {
            streams,
            retention: RetentionSettings::default(),
            ingest: IngestSettings::default(),
            delivery: DeliverySettings::default(),
            transport: TransportSettings::default(),
            server: ServerSettings::default(),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if no streams are configured, a set variable does not
    /// parse, or validation fails.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`MonitorConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars(lookup);
        let streams = load_streams(&vars)?;

        let retention_defaults = RetentionSettings::default();
        let retention = RetentionSettings {
            mode: vars.retention_mode("MONITOR_RETENTION_MODE")?,
            throughput_points: vars.usize(
                "MONITOR_THROUGHPUT_POINTS",
                retention_defaults.throughput_points,
            )?,
            integrity_points: vars.usize(
                "MONITOR_INTEGRITY_POINTS",
                retention_defaults.integrity_points,
            )?,
            alert_points: vars.usize("MONITOR_ALERT_POINTS", retention_defaults.alert_points)?,
            max_age: vars.duration_secs("MONITOR_RETENTION_SECONDS", retention_defaults.max_age)?,
        };

        let ingest_defaults = IngestSettings::default();
        let ingest = IngestSettings {
            poll_interval: vars.duration_millis(
                "MONITOR_POLL_INTERVAL_MS",
                ingest_defaults.poll_interval,
            )?,
            join_timeout: vars.duration_millis(
                "MONITOR_JOIN_TIMEOUT_MS",
                ingest_defaults.join_timeout,
            )?,
            batch_delay: vars.duration_millis("MONITOR_BATCH_DELAY_MS", ingest_defaults.batch_delay)?,
        };

        let delivery_defaults = DeliverySettings::default();
        let delivery = DeliverySettings {
            backlog_warn: vars.usize("MONITOR_BACKLOG_WARN", delivery_defaults.backlog_warn)?,
            query_limit: vars.usize("MONITOR_QUERY_LIMIT", delivery_defaults.query_limit)?,
        };

        let transport_defaults = TransportSettings::default();
        let transport = TransportSettings {
            reconnect_delay_initial: vars.duration_millis(
                "MONITOR_RECONNECT_DELAY_INITIAL_MS",
                transport_defaults.reconnect_delay_initial,
            )?,
            reconnect_delay_max: vars.duration_secs(
                "MONITOR_RECONNECT_DELAY_MAX_SECS",
                transport_defaults.reconnect_delay_max,
            )?,
            reconnect_delay_multiplier: vars.f64(
                "MONITOR_RECONNECT_DELAY_MULTIPLIER",
                transport_defaults.reconnect_delay_multiplier,
            )?,
            max_reconnect_attempts: vars.u32(
                "MONITOR_RECONNECT_MAX_ATTEMPTS",
                transport_defaults.max_reconnect_attempts,
            )?,
        };

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            metrics_port: vars.u16("MONITOR_METRICS_PORT", server_defaults.metrics_port)?,
            prune_interval: vars.duration_secs(
                "MONITOR_PRUNE_INTERVAL_SECS",
                server_defaults.prune_interval,
            )?,
        };

        let config = Self {
            streams,
            retention,
            ingest,
            delivery,
            transport,
            server,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check stream names, endpoints and retention bounds.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.streams.is_empty() {
            return Err(ConfigError::NoStreams);
        }

        let mut names = HashSet::new();
        for stream in &self.streams {
            if stream.name.trim().is_empty() {
                return Err(ConfigError::EmptyValue("stream name".to_string()));
            }
            if !names.insert(stream.name.as_str()) {
                return Err(ConfigError::DuplicateStream(stream.name.clone()));
            }
            if stream.endpoint.trim().is_empty() {
                return Err(ConfigError::EmptyValue(format!(
                    "endpoint of stream {}",
                    stream.name
                )));
            }
            if stream.retention_points == Some(0) {
                return Err(ConfigError::ZeroRetention(format!(
                    "retention_points of stream {}",
                    stream.name
                )));
            }
        }

        match self.retention.mode {
            RetentionMode::Count => {
                for (key, value) in [
                    ("MONITOR_THROUGHPUT_POINTS", self.retention.throughput_points),
                    ("MONITOR_INTEGRITY_POINTS", self.retention.integrity_points),
                    ("MONITOR_ALERT_POINTS", self.retention.alert_points),
                ] {
                    if value == 0 {
                        return Err(ConfigError::ZeroRetention(key.to_string()));
                    }
                }
            }
            RetentionMode::Age => {
                if self.retention.max_age.is_zero() {
                    return Err(ConfigError::ZeroRetention(
                        "MONITOR_RETENTION_SECONDS".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Store policy for these streams.
    #[must_use]
    pub fn retention_policy(&self) -> RetentionPolicy {
        self.retention.policy(&self.streams)
    }

    /// Integrity query limit for a stream, falling back to the global default.
    #[must_use]
    pub fn query_limit(&self, stream: &str) -> usize {
        self.streams
            .iter()
            .find(|s| s.name == stream)
            .and_then(|s| s.query_limit)
            .unwrap_or(self.delivery.query_limit)
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Value must not be empty.
    #[error("{0} cannot be empty")]
    EmptyValue(String),
    /// No stream sources configured.
    #[error("no stream sources configured")]
    NoStreams,
    /// Two streams share a name.
    #[error("duplicate stream name: {0}")]
    DuplicateStream(String),
    /// Variable is set but does not parse.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },
    /// A retention bound is zero.
    #[error("{0} must be greater than zero")]
    ZeroRetention(String),
    /// Stream list is not valid JSON.
    #[error("invalid stream list: {0}")]
    StreamsJson(#[from] serde_json::Error),
    /// Streams file could not be read.
    #[error("failed to read streams file {path}: {source}")]
    StreamsFile {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

fn load_streams<F>(vars: &Vars<F>) -> Result<Vec<StreamSource>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(inline) = vars.get("MONITOR_STREAMS") {
        return Ok(serde_json::from_str(&inline)?);
    }
    let Some(path) = vars.get("MONITOR_STREAMS_FILE") else {
        return Err(ConfigError::MissingEnvVar(
            "MONITOR_STREAMS or MONITOR_STREAMS_FILE".to_string(),
        ));
    };
    let path = PathBuf::from(path);
    let raw = std::fs::read_to_string(&path)
        .map_err(|source| ConfigError::StreamsFile { path, source })?;
    Ok(serde_json::from_str(&raw)?)
}

/// Typed access to configuration variables with defaults.
struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    /// Parse a present variable. Absent or blank is `Ok(None)`, anything
    /// unparseable is an error.
    fn parse_with<T>(
        &self,
        key: &str,
        parse: impl FnOnce(&str) -> Option<T>,
    ) -> Result<Option<T>, ConfigError> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        parse(value.trim())
            .map(Some)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            })
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        Ok(self.parse_with(key, |v| v.parse().ok())?.unwrap_or(default))
    }

    fn retention_mode(&self, key: &str) -> Result<RetentionMode, ConfigError> {
        Ok(self
            .parse_with(key, RetentionMode::from_str_case_insensitive)?
            .unwrap_or_default())
    }

    fn u16(&self, key: &str, default: u16) -> Result<u16, ConfigError> {
        self.parse(key, default)
    }

    fn u32(&self, key: &str, default: u32) -> Result<u32, ConfigError> {
        self.parse(key, default)
    }

    fn usize(&self, key: &str, default: usize) -> Result<usize, ConfigError> {
        self.parse(key, default)
    }

    fn f64(&self, key: &str, default: f64) -> Result<f64, ConfigError> {
        Ok(self
            .parse_with(key, |v| v.parse::<f64>().ok().filter(|f| f.is_finite()))?
            .unwrap_or(default))
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(self
            .parse_with(key, |v| v.parse::<u64>().ok())?
            .map_or(default, Duration::from_secs))
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(self
            .parse_with(key, |v| v.parse::<u64>().ok())?
            .map_or(default, Duration::from_millis))
    }
}
