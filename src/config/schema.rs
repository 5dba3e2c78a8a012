//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML, and every
//! section has defaults so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::wire::DEFAULT_MAX_MESSAGE_BYTES;

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ProxyConfig {
    /// Client-facing listener.
    pub listener: ListenerConfig,

    /// The MongoDB server being fronted.
    pub upstream: UpstreamConfig,

    /// Message decoding on the forwarding path.
    pub capture: CaptureConfig,

    /// Pending request bookkeeping.
    pub correlation: CorrelationConfig,

    /// Audit record output.
    pub audit: AuditConfig,

    pub shutdown: ShutdownConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:27018").
    pub bind_address: String,

    /// Maximum concurrent sessions (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:27018".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Upstream server configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Connection string, `mongodb://host[:port]`.
    pub uri: String,

    /// Upstream connect timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            connect_timeout_secs: 5,
        }
    }
}

/// Capture configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Decode and correlate write commands. Off means a plain byte pipe.
    pub enabled: bool,

    /// Largest acceptable wire message; anything bigger is a framing error.
    pub max_message_bytes: usize,

    /// Size of each socket read.
    pub read_buffer_bytes: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            read_buffer_bytes: 16 * 1024,
        }
    }
}

/// Correlation table bounds.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Maximum pending requests per session.
    pub max_pending: usize,

    /// Age in seconds after which a pending request is dropped.
    pub stale_after_secs: u64,

    /// Interval between sweeps for stale entries.
    pub sweep_interval_secs: u64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            max_pending: 4096,
            stale_after_secs: 30,
            sweep_interval_secs: 5,
        }
    }
}

/// Audit configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AuditConfig {
    /// Log full request and response documents.
    pub include_documents: bool,

    /// Fetch post-write snapshots of affected documents.
    /// Requires the `mongodb-enrichment` feature.
    pub enrichment: bool,

    /// Concurrent snapshot lookups before new ones are skipped.
    pub max_in_flight_lookups: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            include_documents: true,
            enrichment: false,
            max_in_flight_lookups: 16,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long to wait for live sessions after a shutdown signal.
    pub drain_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { drain_timeout_secs: 10 }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: ProxyConfig = toml::from_str("").unwrap();
        assert_eq!(config, ProxyConfig::default());
        assert_eq!(config.correlation.max_pending, 4096);
        assert_eq!(config.capture.max_message_bytes, 48_000_000);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [upstream]
            uri = "mongodb://db.internal:27017"

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.upstream.uri, "mongodb://db.internal:27017");
        assert_eq!(config.upstream.connect_timeout_secs, 5);
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert_eq!(config.observability.log_level, "info");
    }
}
