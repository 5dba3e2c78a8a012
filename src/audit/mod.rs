//! Audit subsystem.
//!
//! # Data Flow
//! ```text
//! response matched in the correlation table
//!     → AuditRecord (request + response documents)
//!     → deliver() (error and panic isolation)
//!     → AuditSink::emit
//!         → LogSink (structured tracing event)
//!         → EnrichingSink (LogSink + background post-write lookups)
//! ```
//!
//! # Design Decisions
//! - Sinks are injected trait objects shared by every session
//! - `emit` is synchronous and must return promptly; slow work is spawned
//! - Delivery is best-effort: failures are logged and counted, never
//!   propagated to the byte path

pub mod enrich;
pub mod log_sink;
pub mod targets;

#[cfg(feature = "mongodb-enrichment")]
pub mod mongo;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use bson::Document;

use crate::config::{AuditConfig, UpstreamConfig};
use crate::net::connection::SessionId;
use crate::observability::metrics;
use crate::wire::OperationInfo;

pub use enrich::{DocumentFetcher, EnrichingSink};
pub use log_sink::LogSink;

/// A captured write command together with the upstream's answer.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    pub session: SessionId,
    pub request_id: i32,
    pub info: OperationInfo,
    pub request: Document,
    pub response: Document,
    /// Time between capturing the request and matching the response.
    pub round_trip: Duration,
}

/// Errors raised by audit sinks.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit sink rejected record: {0}")]
    Rejected(String),

    #[error("document lookup failed: {0}")]
    Lookup(String),

    #[error("no async runtime available for background lookups")]
    NoRuntime,
}

/// Receiver of captured request/response pairs.
///
/// Invoked from the forwarding tasks, so implementations must not block for
/// longer than a bounded time.
pub trait AuditSink: Send + Sync + 'static {
    fn emit(&self, record: AuditRecord) -> Result<(), AuditError>;
}

/// Hand `record` to `sink`, isolating errors and panics.
///
/// Returns whether the sink accepted the record.
pub fn deliver(sink: &dyn AuditSink, record: AuditRecord) -> bool {
    let session = record.session;
    let request_id = record.request_id;

    match catch_unwind(AssertUnwindSafe(|| sink.emit(record))) {
        Ok(Ok(())) => {
            metrics::record_audit_delivered();
            true
        }
        Ok(Err(err)) => {
            metrics::record_audit_failure();
            tracing::warn!(session = %session, request_id, error = %err, "Audit sink failed");
            false
        }
        Err(_) => {
            metrics::record_audit_failure();
            tracing::error!(session = %session, request_id, "Audit sink panicked");
            false
        }
    }
}

/// Build the process-wide sink from configuration.
pub async fn build_sink(audit: &AuditConfig, upstream: &UpstreamConfig) -> Arc<dyn AuditSink> {
    let log_sink = LogSink::new(audit.include_documents);

    if audit.enrichment {
        #[cfg(feature = "mongodb-enrichment")]
        {
            match mongo::MongoFetcher::connect(&upstream.uri).await {
                Ok(fetcher) => {
                    tracing::info!("Audit enrichment enabled");
                    return Arc::new(EnrichingSink::new(log_sink, fetcher, audit.max_in_flight_lookups));
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Audit enrichment unavailable, logging only");
                }
            }
        }

        #[cfg(not(feature = "mongodb-enrichment"))]
        {
            tracing::warn!(
                upstream = %upstream.uri,
                "Audit enrichment requested but built without the mongodb-enrichment feature"
            );
        }
    }

    Arc::new(log_sink)
}
