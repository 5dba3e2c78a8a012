//! MongoDB wire protocol subsystem.
//!
//! # Data Flow
//! ```text
//! raw socket chunk
//!     → reassembler.rs (persistent accumulator, yields complete frames)
//!     → header.rs (16-byte little-endian header)
//!     → message.rs (OP_MSG section-0 body document)
//!     → operation.rs (classify into OperationKind)
//! ```
//!
//! # Design Decisions
//! - Only the subset needed to recognise write commands is decoded
//! - Every other opcode is treated as opaque bytes
//! - Framing errors are fatal to a direction; decode errors are not

pub mod header;
pub mod message;
pub mod operation;
pub mod reassembler;

pub use header::{parse_header, MessageHeader, OpCode, HEADER_LEN};
pub use message::extract_command_section;
pub use operation::{classify_operation, OperationInfo, OperationKind};
pub use reassembler::{Frame, StreamReassembler};

/// Largest message a MongoDB server will accept (`maxMessageSizeBytes`).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 48_000_000;

/// A direction's byte stream can no longer be split into messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    #[error("message length {0} is smaller than the {HEADER_LEN}-byte header")]
    LengthTooSmall(i32),

    #[error("message length {length} exceeds the {max} byte limit")]
    LengthTooLarge { length: usize, max: usize },
}

/// A single message body could not be decoded. Never fatal.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("message truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("invalid BSON document: {0}")]
    Bson(#[from] bson::de::Error),
}

#[cfg(test)]
pub(crate) mod testing {
    //! Message builders shared by the wire unit tests.

    use bson::Document;

    use super::header::OpCode;

    pub fn raw_message(request_id: i32, response_to: i32, op_code: i32, body: &[u8]) -> Vec<u8> {
        let length = (16 + body.len()) as i32;
        let mut out = Vec::with_capacity(length as usize);
        out.extend_from_slice(&length.to_le_bytes());
        out.extend_from_slice(&request_id.to_le_bytes());
        out.extend_from_slice(&response_to.to_le_bytes());
        out.extend_from_slice(&op_code.to_le_bytes());
        out.extend_from_slice(body);
        out
    }

    pub fn op_msg(request_id: i32, response_to: i32, doc: &Document) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&0u32.to_le_bytes());
        body.push(0);
        doc.to_writer(&mut body).expect("serialize test document");
        raw_message(request_id, response_to, OpCode::Msg.as_i32(), &body)
    }
}
