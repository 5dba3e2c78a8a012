//! Per-direction message inspection.
//!
//! Inspectors see every chunk before it is forwarded. They decode what they
//! can and never alter or hold back the bytes; the only error they report is
//! a framing error, which ends the session.

use std::sync::Arc;

use crate::audit::{self, AuditRecord, AuditSink};
use crate::correlation::{CapturedCommand, SharedCorrelationTable};
use crate::net::connection::SessionId;
use crate::observability::metrics;
use crate::wire::{classify_operation, extract_command_section, Frame, FramingError, StreamReassembler};

use super::Direction;

/// Observes one direction's byte stream.
pub trait Inspector: Send + 'static {
    fn inspect(&mut self, chunk: &[u8]) -> Result<(), FramingError>;
}

/// Forwards without looking. Used when capture is disabled.
#[derive(Debug, Default)]
pub struct Passthrough;

impl Inspector for Passthrough {
    fn inspect(&mut self, _chunk: &[u8]) -> Result<(), FramingError> {
        Ok(())
    }
}

/// Client → upstream: records recognised write commands.
pub struct RequestInspector {
    session: SessionId,
    reassembler: StreamReassembler,
    table: SharedCorrelationTable,
}

impl RequestInspector {
    pub fn new(session: SessionId, max_message_bytes: usize, table: SharedCorrelationTable) -> Self {
        Self {
            session,
            reassembler: StreamReassembler::new(max_message_bytes),
            table,
        }
    }
}

impl Inspector for RequestInspector {
    fn inspect(&mut self, chunk: &[u8]) -> Result<(), FramingError> {
        let Self {
            session,
            reassembler,
            table,
        } = self;

        for frame in reassembler.feed(chunk) {
            let frame = frame?;
            metrics::record_message(Direction::ClientToUpstream.as_str());
            if let Some(command) = capture(*session, &frame) {
                table.insert(command);
            }
        }
        Ok(())
    }
}

fn capture(session: SessionId, frame: &Frame) -> Option<CapturedCommand> {
    let command = match extract_command_section(&frame.bytes, &frame.header) {
        Ok(command) => command?,
        Err(err) => {
            metrics::record_decode_failure(Direction::ClientToUpstream.as_str());
            tracing::debug!(
                session = %session,
                request_id = frame.header.request_id,
                error = %err,
                "Undecodable request forwarded as-is"
            );
            return None;
        }
    };

    let info = classify_operation(&command)?;
    metrics::record_capture(info.kind.command_name());
    tracing::debug!(
        session = %session,
        request_id = frame.header.request_id,
        namespace = %info.namespace(),
        operation = %info.kind,
        "Captured request"
    );

    Some(CapturedCommand {
        request_id: frame.header.request_id,
        info,
        command,
    })
}

/// Upstream → client: matches responses and emits audit records.
pub struct ResponseInspector {
    session: SessionId,
    reassembler: StreamReassembler,
    table: SharedCorrelationTable,
    sink: Arc<dyn AuditSink>,
}

impl ResponseInspector {
    pub fn new(
        session: SessionId,
        max_message_bytes: usize,
        table: SharedCorrelationTable,
        sink: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            session,
            reassembler: StreamReassembler::new(max_message_bytes),
            table,
            sink,
        }
    }
}

impl Inspector for ResponseInspector {
    fn inspect(&mut self, chunk: &[u8]) -> Result<(), FramingError> {
        let Self {
            session,
            reassembler,
            table,
            sink,
        } = self;

        for frame in reassembler.feed(chunk) {
            let frame = frame?;
            metrics::record_message(Direction::UpstreamToClient.as_str());

            // A miss is the normal case for reads and admin commands; keep
            // scanning the rest of the chunk.
            let Some(pending) = table.take_if_present(frame.header.response_to) else {
                metrics::record_correlation_miss();
                continue;
            };

            let response = match extract_command_section(&frame.bytes, &frame.header) {
                Ok(Some(response)) => response,
                Ok(None) => {
                    tracing::debug!(
                        session = %session,
                        request_id = frame.header.response_to,
                        op_code = frame.header.op_code,
                        "Matched response has no body document, not audited"
                    );
                    continue;
                }
                Err(err) => {
                    metrics::record_decode_failure(Direction::UpstreamToClient.as_str());
                    tracing::debug!(
                        session = %session,
                        request_id = frame.header.response_to,
                        error = %err,
                        "Undecodable response, not audited"
                    );
                    continue;
                }
            };

            let round_trip = pending.inserted_at.elapsed();
            let CapturedCommand {
                request_id,
                info,
                command,
            } = pending.command;

            audit::deliver(
                sink.as_ref(),
                AuditRecord {
                    session: *session,
                    request_id,
                    info,
                    request: command,
                    response,
                    round_trip,
                },
            );
        }
        Ok(())
    }
}
