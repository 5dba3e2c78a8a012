//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (sizes and timeouts > 0)
//! - Parse addresses up front so startup fails fast
//! - Catch an upstream that loops back into the proxy itself
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Pure function: ProxyConfig → Result<(), Vec<ValidationError>>

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;
use crate::config::upstream::UpstreamAddr;
use crate::wire::HEADER_LEN;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let bind = match config.listener.bind_address.parse::<SocketAddr>() {
        Ok(addr) => Some(addr),
        Err(e) => {
            errors.push(ValidationError::new("listener.bind_address", e.to_string()));
            None
        }
    };
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }

    match UpstreamAddr::parse(&config.upstream.uri) {
        Ok(upstream) => {
            if let Some(bind) = bind {
                if upstream.is_loopback() && upstream.port == bind.port() {
                    errors.push(ValidationError::new(
                        "upstream.uri",
                        format!("{} points back at the proxy's own listener", upstream),
                    ));
                }
            }
        }
        Err(e) => errors.push(ValidationError::new("upstream.uri", e.to_string())),
    }
    if config.upstream.connect_timeout_secs == 0 {
        errors.push(ValidationError::new("upstream.connect_timeout_secs", "must be greater than 0"));
    }

    if config.capture.max_message_bytes < HEADER_LEN {
        errors.push(ValidationError::new(
            "capture.max_message_bytes",
            format!("must be at least the {}-byte header", HEADER_LEN),
        ));
    }
    if config.capture.read_buffer_bytes == 0 {
        errors.push(ValidationError::new("capture.read_buffer_bytes", "must be greater than 0"));
    }

    if config.correlation.max_pending == 0 {
        errors.push(ValidationError::new("correlation.max_pending", "must be greater than 0"));
    }
    if config.correlation.stale_after_secs == 0 {
        errors.push(ValidationError::new("correlation.stale_after_secs", "must be greater than 0"));
    }
    if config.correlation.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("correlation.sweep_interval_secs", "must be greater than 0"));
    }

    if config.audit.enrichment && config.audit.max_in_flight_lookups == 0 {
        errors.push(ValidationError::new(
            "audit.max_in_flight_lookups",
            "must be greater than 0 when enrichment is enabled",
        ));
    }

    if config.observability.metrics_enabled && config.observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("observability.metrics_address", "not a socket address"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
