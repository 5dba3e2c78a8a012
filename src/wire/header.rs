//! Standard message header.
//!
//! ```text
//! +----------------+------------+-------------+-----------+
//! | messageLength  | requestID  | responseTo  | opCode    |
//! | int32 LE       | int32 LE   | int32 LE    | int32 LE  |
//! +----------------+------------+-------------+-----------+
//! ```
//! `messageLength` counts the header itself.

/// Size of the fixed header in bytes.
pub const HEADER_LEN: usize = 16;

/// Wire opcodes. Only [`OpCode::Msg`] is ever decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Reply,
    Update,
    Insert,
    Query,
    GetMore,
    Delete,
    Compressed,
    Msg,
    Other(i32),
}

impl OpCode {
    pub fn as_i32(self) -> i32 {
        match self {
            OpCode::Reply => 1,
            OpCode::Update => 2001,
            OpCode::Insert => 2002,
            OpCode::Query => 2004,
            OpCode::GetMore => 2005,
            OpCode::Delete => 2006,
            OpCode::Compressed => 2012,
            OpCode::Msg => 2013,
            OpCode::Other(code) => code,
        }
    }
}

impl From<i32> for OpCode {
    fn from(code: i32) -> Self {
        match code {
            1 => OpCode::Reply,
            2001 => OpCode::Update,
            2002 => OpCode::Insert,
            2004 => OpCode::Query,
            2005 => OpCode::GetMore,
            2006 => OpCode::Delete,
            2012 => OpCode::Compressed,
            2013 => OpCode::Msg,
            other => OpCode::Other(other),
        }
    }
}

/// The four header fields, as read off the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Total message size including this header. Not validated here.
    pub message_length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: i32,
}

impl MessageHeader {
    pub fn op_code(&self) -> OpCode {
        OpCode::from(self.op_code)
    }
}

/// Parse the header at the front of `bytes`.
///
/// Returns `None` when fewer than [`HEADER_LEN`] bytes are available.
pub fn parse_header(bytes: &[u8]) -> Option<MessageHeader> {
    if bytes.len() < HEADER_LEN {
        return None;
    }

    let field = |at: usize| i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);

    Some(MessageHeader {
        message_length: field(0),
        request_id: field(4),
        response_to: field(8),
        op_code: field(12),
    })
}
