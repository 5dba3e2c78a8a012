//! Default audit sink: one structured log event per captured write.

use bson::{Bson, Document};

use super::targets::WriteOutcome;
use super::{AuditError, AuditRecord, AuditSink};

/// Writes audit records to the `audit` tracing target.
#[derive(Debug, Clone)]
pub struct LogSink {
    include_documents: bool,
}

impl LogSink {
    /// With `include_documents` off only the namespace, kind and reply
    /// summary are logged.
    pub fn new(include_documents: bool) -> Self {
        Self { include_documents }
    }
}

impl AuditSink for LogSink {
    fn emit(&self, record: AuditRecord) -> Result<(), AuditError> {
        let outcome = WriteOutcome::from_response(&record.response);

        if self.include_documents {
            tracing::info!(
                target: "audit",
                session = %record.session,
                request_id = record.request_id,
                namespace = %record.info.namespace(),
                operation = %record.info.kind,
                ok = outcome.ok,
                affected = ?outcome.affected,
                write_errors = outcome.failed_indexes.len(),
                round_trip_ms = record.round_trip.as_millis() as u64,
                request = %render(&record.request),
                response = %render(&record.response),
                "Captured write"
            );
        } else {
            tracing::info!(
                target: "audit",
                session = %record.session,
                request_id = record.request_id,
                namespace = %record.info.namespace(),
                operation = %record.info.kind,
                ok = outcome.ok,
                affected = ?outcome.affected,
                write_errors = outcome.failed_indexes.len(),
                round_trip_ms = record.round_trip.as_millis() as u64,
                "Captured write"
            );
        }

        Ok(())
    }
}

/// Relaxed extended JSON, the form the mongo shell prints.
pub(crate) fn render(document: &Document) -> serde_json::Value {
    Bson::Document(document.clone()).into_relaxed_extjson()
}
